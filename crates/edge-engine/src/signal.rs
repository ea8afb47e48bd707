//! Control signals and view errors.
//!
//! View code reports routing outcomes by returning a `ViewError::Signal`.
//! Signals are not failures: boundaries match them by kind and they are
//! never logged as errors.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Digest prefix of a redirect signal.
pub const REDIRECT_DIGEST: &str = "EDGE_REDIRECT";
/// Digest prefix of an access-fallback signal.
pub const HTTP_FALLBACK_DIGEST: &str = "EDGE_HTTP_ERROR_FALLBACK";

/// How the client applies a redirect to its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKind {
    Push,
    Replace,
}

impl RedirectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Replace => "replace",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "push" => Some(Self::Push),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// A routing outcome raised from view code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    Redirect {
        destination: String,
        kind: RedirectKind,
        status: u16,
    },
    NotFound,
    Forbidden,
    Unauthorized,
}

impl ControlSignal {
    /// Temporary (307) redirect replacing the current history entry.
    pub fn redirect(destination: impl Into<String>) -> Self {
        Self::Redirect {
            destination: destination.into(),
            kind: RedirectKind::Replace,
            status: 307,
        }
    }

    /// Permanent (308) redirect.
    pub fn permanent_redirect(destination: impl Into<String>) -> Self {
        Self::Redirect {
            destination: destination.into(),
            kind: RedirectKind::Replace,
            status: 308,
        }
    }

    /// HTTP status the signal maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Redirect { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::TEMPORARY_REDIRECT)
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Redirect { .. } => "redirect",
            Self::NotFound => "not-found",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
        }
    }

    /// Whether this is an access fallback (404/403/401).
    pub fn is_access_fallback(&self) -> bool {
        !matches!(self, Self::Redirect { .. })
    }

    /// Serialized tag that survives the payload boundary.
    ///
    /// `EDGE_REDIRECT;<kind>;<destination>;<status>` or
    /// `EDGE_HTTP_ERROR_FALLBACK;<status>`.
    pub fn digest(&self) -> String {
        match self {
            Self::Redirect {
                destination,
                kind,
                status,
            } => format!("{};{};{};{}", REDIRECT_DIGEST, kind.as_str(), destination, status),
            other => format!("{};{}", HTTP_FALLBACK_DIGEST, other.status().as_u16()),
        }
    }

    /// Parse a digest produced by [`ControlSignal::digest`].
    pub fn from_digest(digest: &str) -> Option<Self> {
        let (prefix, rest) = digest.split_once(';')?;
        match prefix {
            REDIRECT_DIGEST => {
                let (kind, rest) = rest.split_once(';')?;
                // Destinations may contain ';', the status is always last.
                let (destination, status) = rest.rsplit_once(';')?;
                Some(Self::Redirect {
                    destination: destination.to_string(),
                    kind: RedirectKind::parse(kind)?,
                    status: status.parse().ok()?,
                })
            }
            HTTP_FALLBACK_DIGEST => match rest {
                "404" => Some(Self::NotFound),
                "403" => Some(Self::Forbidden),
                "401" => Some(Self::Unauthorized),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest())
    }
}

/// An error thrown by view code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    /// Diagnostic detail (error chain) hashed into the digest.
    pub detail: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            detail: message.clone(),
            message,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of a view, action or handler that did not return normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("control signal {0}")]
    Signal(ControlSignal),

    #[error("{0}")]
    Failure(Failure),

    #[error("{api}() read request state in a route declared `dynamic = \"error\"`")]
    StaticBailout { api: String },
}

impl ViewError {
    /// A failure with a plain message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(Failure::new(message))
    }

    /// The control signal, if this is one.
    pub fn signal(&self) -> Option<&ControlSignal> {
        match self {
            Self::Signal(signal) => Some(signal),
            _ => None,
        }
    }
}

impl From<ControlSignal> for ViewError {
    fn from(signal: ControlSignal) -> Self {
        Self::Signal(signal)
    }
}

impl From<anyhow::Error> for ViewError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failure(Failure {
            message: err.to_string(),
            detail: format!("{:?}", err),
        })
    }
}

/// Redirect to `destination` (307).
pub fn redirect(destination: impl Into<String>) -> ViewError {
    ControlSignal::redirect(destination).into()
}

/// Redirect to `destination` permanently (308).
pub fn permanent_redirect(destination: impl Into<String>) -> ViewError {
    ControlSignal::permanent_redirect(destination).into()
}

/// Render the nearest not-found view (404).
pub fn not_found() -> ViewError {
    ControlSignal::NotFound.into()
}

/// Render the nearest forbidden view (403).
pub fn forbidden() -> ViewError {
    ControlSignal::Forbidden.into()
}

/// Render the nearest unauthorized view (401).
pub fn unauthorized() -> ViewError {
    ControlSignal::Unauthorized.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Digest Tests ===

    #[test]
    fn test_redirect_digest_round_trip_with_semicolon() {
        let signal = ControlSignal::Redirect {
            destination: "/a;b?x=1".to_string(),
            kind: RedirectKind::Push,
            status: 303,
        };
        assert_eq!(signal.digest(), "EDGE_REDIRECT;push;/a;b?x=1;303");
        assert_eq!(ControlSignal::from_digest(&signal.digest()), Some(signal));
    }

    #[test]
    fn test_fallback_digests() {
        assert_eq!(ControlSignal::NotFound.digest(), "EDGE_HTTP_ERROR_FALLBACK;404");
        assert_eq!(
            ControlSignal::from_digest("EDGE_HTTP_ERROR_FALLBACK;401"),
            Some(ControlSignal::Unauthorized)
        );
        assert_eq!(ControlSignal::from_digest("EDGE_HTTP_ERROR_FALLBACK;500"), None);
        assert_eq!(ControlSignal::from_digest("a1b2c3"), None);
    }

    // === Signal Tests ===

    #[test]
    fn test_signal_status() {
        assert_eq!(ControlSignal::redirect("/x").status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(ControlSignal::permanent_redirect("/x").status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(ControlSignal::Forbidden.status(), StatusCode::FORBIDDEN);
        assert!(ControlSignal::NotFound.is_access_fallback());
        assert!(!ControlSignal::redirect("/").is_access_fallback());
    }

    #[test]
    fn test_anyhow_becomes_failure() {
        let err: ViewError = anyhow::anyhow!("db down").context("loading product").into();
        match err {
            ViewError::Failure(failure) => {
                assert_eq!(failure.message, "loading product");
                assert!(failure.detail.contains("db down"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(not_found().signal(), Some(&ControlSignal::NotFound));
    }
}
