//! Cross-site request forgery check for mutation actions.

use http::header::{HeaderMap, HOST, ORIGIN};
use url::Url;

use crate::allowlist::OriginAllowlist;

/// Errors from the origin check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("origin {origin} does not match host {host}")]
    OriginMismatch { origin: String, host: String },

    #[error("malformed origin header: {0}")]
    MalformedOrigin(String),

    #[error("request has an origin but no host")]
    MissingHost,
}

/// Compares the `Origin` of a mutation request with its `Host`.
///
/// Only the `Host` header is trusted; forwarded-host headers are ignored
/// because any client can set them.
#[derive(Debug, Clone, Default)]
pub struct CsrfGuard {
    allowlist: OriginAllowlist,
}

impl CsrfGuard {
    /// Create a guard with extra trusted origins.
    pub fn new(allowlist: OriginAllowlist) -> Self {
        Self { allowlist }
    }

    /// Check a request's headers.
    ///
    /// A request without an `Origin` header passes. An opaque (`null`) or
    /// malformed origin is always rejected.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), CsrfError> {
        let Some(origin) = headers.get(ORIGIN) else {
            return Ok(());
        };
        let origin = origin
            .to_str()
            .map_err(|_| CsrfError::MalformedOrigin("<non-ascii>".to_string()))?;

        let origin_host = origin_authority(origin)
            .ok_or_else(|| CsrfError::MalformedOrigin(origin.to_string()))?;

        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(|h| h.trim().to_ascii_lowercase())
            .ok_or(CsrfError::MissingHost)?;

        if origin_host == host || self.allowlist.is_allowed(&origin_host) {
            return Ok(());
        }

        tracing::warn!(origin = %origin_host, host = %host, "rejected cross-origin action request");
        Err(CsrfError::OriginMismatch {
            origin: origin_host,
            host,
        })
    }
}

/// `host[:port]` of an origin, with default ports omitted.
fn origin_authority(origin: &str) -> Option<String> {
    if origin.eq_ignore_ascii_case("null") {
        return None;
    }
    let url = Url::parse(origin).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    // === Origin Check Tests ===

    #[test]
    fn test_cross_origin_rejected() {
        let guard = CsrfGuard::default();
        let err = guard
            .check(&headers(&[("origin", "https://evil.com"), ("host", "example.com")]))
            .unwrap_err();
        assert!(matches!(err, CsrfError::OriginMismatch { .. }));
    }

    #[test]
    fn test_missing_origin_allowed() {
        let guard = CsrfGuard::default();
        assert!(guard.check(&headers(&[("host", "example.com")])).is_ok());
    }

    #[test]
    fn test_same_origin_allowed_with_port() {
        let guard = CsrfGuard::default();
        assert!(guard
            .check(&headers(&[("origin", "http://localhost:3000"), ("host", "localhost:3000")]))
            .is_ok());
        assert!(guard
            .check(&headers(&[("origin", "https://example.com"), ("host", "Example.com")]))
            .is_ok());
    }

    #[test]
    fn test_forwarded_host_ignored() {
        let guard = CsrfGuard::default();
        let result = guard.check(&headers(&[
            ("origin", "https://evil.com"),
            ("host", "example.com"),
            ("x-forwarded-host", "evil.com"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_allowlisted_origin_passes() {
        let guard = CsrfGuard::new(OriginAllowlist::from_entries(&["*.trusted.com".to_string()]));
        assert!(guard
            .check(&headers(&[("origin", "https://app.trusted.com"), ("host", "example.com")]))
            .is_ok());
    }

    #[test]
    fn test_null_and_malformed_origin_rejected() {
        let guard = CsrfGuard::default();
        assert!(matches!(
            guard.check(&headers(&[("origin", "null"), ("host", "example.com")])),
            Err(CsrfError::MalformedOrigin(_))
        ));
        assert!(matches!(
            guard.check(&headers(&[("origin", "not a url"), ("host", "example.com")])),
            Err(CsrfError::MalformedOrigin(_))
        ));
    }
}
