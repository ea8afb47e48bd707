//! Markup phase: HTML generated from the payload stream.
//!
//! The payload is teed. One reader is parsed row by row into HTML; the other
//! is re-embedded verbatim as inline scripts so the client hydrates from
//! byte-identical data.

use bytes::Bytes;
use edge_streaming::{escape_html, Body, BodyError, Shell, TeeReader};
use futures::future;
use futures::stream::{self, StreamExt};

use crate::payload::{LineBuffer, Row};
use crate::signal::ControlSignal;
use crate::view::Node;

/// Client runtime swapping streamed chunks and replaced boundaries in place.
pub const SWAP_RUNTIME: &str = concat!(
    "self.$edge={",
    "c:function(i){var t=document.getElementById(\"edge-c:\"+i),s=document.getElementById(\"edge-s:\"+i);",
    "if(t&&s){s.replaceWith(t.content);t.remove()}},",
    "r:function(i){var t=document.getElementById(\"edge-r:\"+i),b=document.getElementById(\"edge-b:\"+i);",
    "if(t&&b){b.replaceChildren(t.content);t.remove()}},",
    "nav:function(u){location.replace(u)},",
    "e:function(d){console.error(\"server render error\",d)}",
    "};"
);

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

/// Render a node to HTML.
pub fn render_html(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Empty | Node::Outlet | Node::Slot(_) => {}
        Node::Text(text) => out.push_str(&escape_html(text)),
        Node::Element {
            tag,
            attrs,
            children,
        } => {
            if !valid_name(tag) {
                children.iter().for_each(|c| write_node(c, out));
                return;
            }
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs.iter().filter(|(name, _)| valid_name(name)) {
                out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                return;
            }
            children.iter().for_each(|c| write_node(c, out));
            out.push_str(&format!("</{}>", tag));
        }
        Node::Fragment(children) => children.iter().for_each(|c| write_node(c, out)),
        Node::Suspense { id, fallback } => {
            out.push_str(&format!("<edge-suspense id=\"edge-s:{}\">", id));
            write_node(fallback, out);
            out.push_str("</edge-suspense>");
        }
        Node::Boundary { id, child } => {
            out.push_str(&format!("<edge-boundary id=\"edge-b:{}\">", id));
            write_node(child, out);
            out.push_str("</edge-boundary>");
        }
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn navigate(shell: &Shell, location: &str) -> String {
    format!("{}\n", shell.script(&format!("$edge.nav({})", json_string(location))))
}

/// HTML for one payload row.
pub fn row_markup(shell: &Shell, row: &Row) -> String {
    match row {
        Row::Root { tree: Some(tree), .. } => format!("<div id=\"__edge\">{}</div>\n", render_html(tree)),
        Row::Root { tree: None, .. } => String::new(),
        Row::Chunk { id, node } => format!(
            "<template id=\"edge-c:{id}\">{}</template>{}\n",
            render_html(node),
            shell.script(&format!("$edge.c({id})"))
        ),
        Row::Replace { boundary, node } => format!(
            "<template id=\"edge-r:{boundary}\">{}</template>{}\n",
            render_html(node),
            shell.script(&format!("$edge.r({boundary})"))
        ),
        Row::Redirect { location, .. } => navigate(shell, location),
        Row::Error { digest, .. } => match ControlSignal::from_digest(digest) {
            Some(ControlSignal::Redirect { destination, .. }) => navigate(shell, &destination),
            _ => format!("{}\n", shell.script(&format!("$edge.e({})", json_string(digest)))),
        },
    }
}

/// Inline script pushing one raw payload chunk for the client.
pub fn embed_chunk(shell: &Shell, chunk: &[u8]) -> String {
    let push = format!(
        "(self.__edge_f=self.__edge_f||[]).push({})",
        json_string(&String::from_utf8_lossy(chunk))
    );
    format!("{}\n", shell.script(&push))
}

/// Build the HTML document body from the two payload readers.
pub fn markup_body(shell: &Shell, rows: TeeReader, payload: TeeReader) -> Body {
    let opening = shell.opening(SWAP_RUNTIME);
    let closing = shell.closing().to_string();

    let row_shell = shell.clone();
    let html = rows.scan(LineBuffer::new(), move |buffer, chunk| {
        let markup = chunk.map(|bytes| {
            buffer
                .push(&bytes)
                .iter()
                .filter_map(|line| match Row::parse(line) {
                    Ok(row) => Some(row_markup(&row_shell, &row)),
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping malformed payload row");
                        None
                    }
                })
                .collect::<String>()
        });
        future::ready(Some(markup))
    });
    let embed_shell = shell.clone();
    let embeds = payload.map(move |chunk| chunk.map(|bytes| embed_chunk(&embed_shell, &bytes)));

    let body = stream::once(future::ready(Ok::<_, BodyError>(opening)))
        .chain(stream::select(html, embeds))
        .chain(stream::once(future::ready(Ok(closing))))
        .filter(|chunk| future::ready(!matches!(chunk, Ok(s) if s.is_empty())))
        .map(|chunk| chunk.map(Bytes::from));
    Body::from_stream(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_streaming::{tee_pair, HeadContent};

    use crate::signal::RedirectKind;

    // === HTML Tests ===

    #[test]
    fn test_render_html_escapes_and_skips_placeholders() {
        let node = Node::element("p")
            .attr("title", "a\"b")
            .child(Node::text("<b>"))
            .child(Node::Outlet)
            .child(Node::element("br"));
        assert_eq!(render_html(&node), "<p title=\"a&quot;b\">&lt;b&gt;<br></p>");
    }

    #[test]
    fn test_invalid_tag_renders_children_only() {
        let node = Node::element("script onload=x").child(Node::text("t"));
        assert_eq!(render_html(&node), "t");
    }

    #[test]
    fn test_row_markup_for_late_rows() {
        let shell = Shell::default();
        let chunk = row_markup(&shell, &Row::Chunk {
            id: 1,
            node: Node::text("ok"),
        });
        assert_eq!(chunk, "<template id=\"edge-c:1\">ok</template><script>$edge.c(1)</script>\n");

        let redirect = row_markup(&shell, &Row::Redirect {
            location: "/login".to_string(),
            kind: RedirectKind::Replace,
            status: 307,
        });
        assert_eq!(redirect, "<script>$edge.nav(\"/login\")</script>\n");

        let digest_redirect = row_markup(&shell, &Row::Error {
            digest: ControlSignal::redirect("/x").digest(),
            message: "redirect".to_string(),
        });
        assert_eq!(digest_redirect, "<script>$edge.nav(\"/x\")</script>\n");
    }

    #[test]
    fn test_embed_escapes_script_close() {
        let embedded = embed_chunk(&Shell::default(), b"{\"text\":\"</script>\"}\n");
        assert!(!embedded.contains("</script>\"}"));
        assert!(embedded.contains("<\\/script>"));
    }

    // === Document Tests ===

    #[tokio::test]
    async fn test_markup_body_renders_rows_and_embeds_payload() {
        let lines = vec![
            Row::Root {
                tree: Some(Node::Suspense {
                    id: 0,
                    fallback: Box::new(Node::text("loading")),
                }),
                action: None,
            },
            Row::Chunk {
                id: 0,
                node: Node::text("ready"),
            },
        ];
        let source = stream::iter(lines.iter().map(|row| Ok(row.to_line())).collect::<Vec<_>>()).boxed();
        let (rows, payload) = tee_pair(source);

        let html = markup_body(&Shell::new(HeadContent::new("Test")), rows, payload)
            .collect_string()
            .await
            .unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<div id=\"__edge\"><edge-suspense id=\"edge-s:0\">loading</edge-suspense></div>"));
        assert!(html.contains("<template id=\"edge-c:0\">ready</template>"));
        assert_eq!(html.matches(".push(").count(), 2);
        assert!(html.ends_with("</body>\n</html>"));
    }
}
