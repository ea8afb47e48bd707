//! Platform-controlled streaming sink.

use std::fmt::Display;
use std::time::Duration;

use edge_core::{LifecyclePhase, TimingContext};
use futures::{Sink, SinkExt, StreamExt};

use crate::body::{Body, BodyError};

/// Error type for sink operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("sink write failed: {0}")]
    Sink(String),

    #[error(transparent)]
    Body(#[from] BodyError),

    #[error("sink already completed")]
    Completed,
}

/// State of the streaming sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    /// Nothing written yet.
    Initial,
    /// At least one chunk has been written.
    Streaming,
    /// Response has been completed.
    Completed,
}

/// Totals for one forwarded body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub bytes: u64,
    pub chunks: u64,
    pub first_byte: Option<Duration>,
}

/// Writes a response body into a platform sink.
///
/// Generic over any `Sink<Vec<u8>>`, including Spin's `OutgoingBody`.
/// Records the time of the first written byte and completion in the
/// timing context.
pub struct StreamingSink<S, E>
where
    S: Sink<Vec<u8>, Error = E> + Unpin,
    E: Display,
{
    inner: S,
    state: SinkState,
    timing: TimingContext,
    stats: SinkStats,
}

impl<S, E> StreamingSink<S, E>
where
    S: Sink<Vec<u8>, Error = E> + Unpin,
    E: Display,
{
    /// Create a new streaming sink.
    pub fn new(sink: S, timing: TimingContext) -> Self {
        Self {
            inner: sink,
            state: SinkState::Initial,
            timing,
            stats: SinkStats::default(),
        }
    }

    /// Write one chunk.
    pub async fn send_chunk(&mut self, bytes: Vec<u8>) -> Result<(), StreamError> {
        if self.state == SinkState::Completed {
            return Err(StreamError::Completed);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let len = bytes.len() as u64;
        self.inner
            .send(bytes)
            .await
            .map_err(|e| StreamError::Sink(e.to_string()))?;

        if self.state == SinkState::Initial {
            self.timing.mark("first_byte");
            self.stats.first_byte = Some(self.timing.elapsed());
            self.state = SinkState::Streaming;
        }
        self.stats.bytes += len;
        self.stats.chunks += 1;
        Ok(())
    }

    /// Write every chunk of `body`, then complete.
    ///
    /// A body error stops forwarding; bytes already written stay written.
    pub async fn forward(&mut self, body: Body) -> Result<SinkStats, StreamError> {
        let mut stream = body.into_stream();
        while let Some(chunk) = stream.next().await {
            self.send_chunk(chunk?.to_vec()).await?;
        }
        self.complete()?;
        Ok(self.stats.clone())
    }

    /// Complete the response.
    pub fn complete(&mut self) -> Result<(), StreamError> {
        if self.state == SinkState::Completed {
            return Err(StreamError::Completed);
        }
        self.state = SinkState::Completed;
        self.timing.mark_phase(&LifecyclePhase::Completion);
        Ok(())
    }

    /// Totals so far.
    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Get the current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        match self.state {
            SinkState::Initial => LifecyclePhase::Start,
            SinkState::Streaming => LifecyclePhase::ShellReady,
            SinkState::Completed => LifecyclePhase::Completion,
        }
    }

    /// Get timing context reference.
    pub fn timing(&self) -> &TimingContext {
        &self.timing
    }

    /// Consume the sink and return the inner value.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> StreamingSink<Vec<Vec<u8>>, std::convert::Infallible> {
        StreamingSink::new(Vec::new(), TimingContext::new())
    }

    #[tokio::test]
    async fn test_forward_counts_bytes_and_chunks() {
        let mut sink = sink();
        let body = Body::from_chunks(vec!["<html>".to_string(), String::new(), "</html>".to_string()]);

        let stats = sink.forward(body).await.unwrap();
        assert_eq!(stats.bytes, 13);
        assert_eq!(stats.chunks, 2);
        assert!(stats.first_byte.is_some());
        assert_eq!(sink.phase(), LifecyclePhase::Completion);
        assert_eq!(sink.into_inner(), vec![b"<html>".to_vec(), b"</html>".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_after_complete_fails() {
        let mut sink = sink();
        assert_eq!(sink.phase(), LifecyclePhase::Start);
        sink.send_chunk(b"x".to_vec()).await.unwrap();
        assert_eq!(sink.phase(), LifecyclePhase::ShellReady);
        sink.complete().unwrap();
        assert!(matches!(
            sink.send_chunk(b"y".to_vec()).await,
            Err(StreamError::Completed)
        ));
    }

    #[tokio::test]
    async fn test_forward_stops_on_body_error() {
        let mut sink = sink();
        let body = Body::from_stream(futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"a")),
            Err(BodyError::Aborted),
        ]));
        assert!(matches!(sink.forward(body).await, Err(StreamError::Body(BodyError::Aborted))));
        assert_eq!(sink.stats().bytes, 1);
    }
}
