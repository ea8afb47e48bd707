//! Error sanitization.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::signal::Failure;

/// Message delivered to view code and clients outside development.
pub const GENERIC_ERROR_MESSAGE: &str =
    "An error occurred while rendering. The details are hidden outside development; the digest identifies it in the server logs.";

/// Stable digest of an error: the first 8 bytes of SHA-256 over message and detail.
pub fn error_digest(message: &str, detail: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(b"\n");
    hasher.update(detail.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Error as seen by error-boundary views and clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub digest: String,
}

impl ErrorInfo {
    /// Sanitize a failure. In development the original message passes through.
    pub fn sanitize(failure: &Failure, dev: bool) -> Self {
        let digest = error_digest(&failure.message, &failure.detail);
        let message = if dev {
            failure.message.clone()
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        };
        Self { message, digest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_short() {
        let a = error_digest("boom", "stack");
        assert_eq!(a, error_digest("boom", "stack"));
        assert_ne!(a, error_digest("boom", "other stack"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_sanitize_hides_message_outside_dev() {
        let failure = Failure::new("password=hunter2");
        let prod = ErrorInfo::sanitize(&failure, false);
        assert_eq!(prod.message, GENERIC_ERROR_MESSAGE);
        let dev = ErrorInfo::sanitize(&failure, true);
        assert_eq!(dev.message, "password=hunter2");
        assert_eq!(prod.digest, dev.digest);
    }
}
