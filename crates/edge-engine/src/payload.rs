//! Progressive payload protocol.
//!
//! The description phase writes one JSON row per line:
//!
//! ```text
//! {"type":"root","tree":{...}}                     shell, always first
//! {"type":"chunk","id":0,"node":{...}}              deferred loading content
//! {"type":"replace","boundary":3,"node":{...}}      boundary fallback after a late error
//! {"type":"redirect","location":"/login","kind":"replace","status":307}
//! {"type":"error","digest":"9f2c...","message":"..."}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::digest::ErrorInfo;
use crate::signal::RedirectKind;
use crate::view::Node;

/// Content type of payload-only responses.
pub const PAYLOAD_CONTENT_TYPE: &str = "text/x-component";

/// Result of a mutation action embedded in the root row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionResult {
    Ok { value: serde_json::Value },
    Error { error: ErrorInfo },
}

/// One payload line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Row {
    Root {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tree: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<ActionResult>,
    },
    Chunk {
        id: usize,
        node: Node,
    },
    Replace {
        boundary: usize,
        node: Node,
    },
    Redirect {
        location: String,
        kind: RedirectKind,
        status: u16,
    },
    Error {
        digest: String,
        message: String,
    },
}

impl Row {
    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> Bytes {
        let mut line = serde_json::to_string(self).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode payload row");
            r#"{"type":"error","digest":"","message":"payload encoding failed"}"#.to_string()
        });
        line.push('\n');
        Bytes::from(line)
    }

    /// Parse one line (without its newline).
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Splits a byte stream into lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and take every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// Bytes of an unterminated last line.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_wire_format() {
        let row = Row::Chunk {
            id: 2,
            node: Node::text("done"),
        };
        assert_eq!(&row.to_line()[..], b"{\"type\":\"chunk\",\"id\":2,\"node\":{\"text\":\"done\"}}\n");

        let root = Row::Root {
            tree: None,
            action: Some(ActionResult::Ok {
                value: serde_json::json!({"count": 3}),
            }),
        };
        let line = root.to_line();
        let text = std::str::from_utf8(&line).unwrap();
        assert_eq!(text, "{\"type\":\"root\",\"action\":{\"status\":\"ok\",\"value\":{\"count\":3}}}\n");
        assert_eq!(Row::parse(text.trim_end()).unwrap(), root);
    }

    #[test]
    fn test_line_buffer_splits_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"a\":").is_empty());
        assert_eq!(buffer.push(b"1}\n{\"b\":2}\n{\"c\""), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buffer.remainder(), b"{\"c\"");
    }
}
