//! Request body limits.

use bytes::{Bytes, BytesMut};
use edge_streaming::{Body, BodyError};
use futures::StreamExt;

/// Errors from limit violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitsError {
    #[error("request size exceeded: {used} / {limit} bytes")]
    RequestSizeExceeded { used: u64, limit: u64 },

    #[error(transparent)]
    Body(#[from] BodyError),
}

/// Read a request body, failing as soon as more than `limit` bytes arrive.
///
/// The count is taken from the bytes actually received; a declared
/// `Content-Length` is never trusted.
pub async fn read_limited(body: Body, limit: u64) -> Result<Bytes, LimitsError> {
    let mut stream = body.into_stream();
    let mut buf = BytesMut::new();
    let mut used: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        used += chunk.len() as u64;
        if used > limit {
            tracing::warn!(used, limit, "request body over limit");
            return Err(LimitsError::RequestSizeExceeded { used, limit });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}
