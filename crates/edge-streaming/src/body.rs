//! Response and request bodies.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// Error raised while producing or reading a body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("body stream failed: {0}")]
    Stream(String),

    #[error("body stream aborted")]
    Aborted,
}

/// Boxed stream of body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, BodyError>>;

enum Kind {
    Full(Option<Bytes>),
    Stream(BodyStream),
}

/// A request or response body.
///
/// Either a single buffered chunk or a stream of chunks produced while the
/// response is being written.
pub struct Body {
    kind: Kind,
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self {
            kind: Kind::Full(None),
        }
    }

    /// A body holding one buffered chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            kind: Kind::Full((!bytes.is_empty()).then_some(bytes)),
        }
    }

    /// A body produced by a stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self {
            kind: Kind::Stream(stream.boxed()),
        }
    }

    /// A body streaming already-rendered strings.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(chunks).map(|chunk| Ok(Bytes::from(chunk))))
    }

    /// Exact length, if the body is buffered.
    pub fn size_hint(&self) -> Option<u64> {
        match &self.kind {
            Kind::Full(bytes) => Some(bytes.as_ref().map_or(0, |b| b.len() as u64)),
            Kind::Stream(_) => None,
        }
    }

    /// Whether the body is streamed rather than buffered.
    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, Kind::Stream(_))
    }

    /// Convert into a boxed stream.
    pub fn into_stream(self) -> BodyStream {
        match self.kind {
            Kind::Full(bytes) => stream::iter(bytes.map(Ok)).boxed(),
            Kind::Stream(stream) => stream,
        }
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes, BodyError> {
        match self.kind {
            Kind::Full(bytes) => Ok(bytes.unwrap_or_default()),
            Kind::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Read the whole body as UTF-8 text, replacing invalid sequences.
    pub async fn collect_string(self) -> Result<String, BodyError> {
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Stream for Body {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().kind {
            Kind::Full(bytes) => Poll::Ready(bytes.take().map(Ok)),
            Kind::Stream(stream) => stream.as_mut().poll_next(cx),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Full(bytes) => f
                .debug_struct("Body")
                .field("len", &bytes.as_ref().map_or(0, Bytes::len))
                .finish(),
            Kind::Stream(_) => f.debug_struct("Body").field("streaming", &true).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_body_collects() {
        let body = Body::from("hello");
        assert_eq!(body.size_hint(), Some(5));
        assert_eq!(body.collect_string().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_empty_body_yields_nothing() {
        let mut body = Body::empty();
        assert!(body.next().await.is_none());
        assert_eq!(Body::from_bytes(Vec::new()).size_hint(), Some(0));
    }

    #[tokio::test]
    async fn test_stream_body_collects_in_order() {
        let body = Body::from_chunks(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(body.is_streaming());
        assert_eq!(body.size_hint(), None);
        assert_eq!(body.collect_string().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let body = Body::from_stream(stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(BodyError::Aborted),
        ]));
        assert_eq!(body.collect().await, Err(BodyError::Aborted));
    }
}
