//! Development-mode guard against cross-site access to internal resources.

use http::header::{HeaderMap, ORIGIN};
use url::Url;

use crate::allowlist::{is_localhost, OriginAllowlist};

/// Path prefix of engine-internal resources.
pub const INTERNAL_PATH_PREFIX: &str = "/_edge/";

/// Blocks other sites from loading development resources.
///
/// Inactive outside development. In development, requests for internal
/// resources are rejected when they are cross-site `no-cors` loads or carry
/// an `Origin` that is neither loopback nor allowlisted.
#[derive(Debug, Clone, Default)]
pub struct DevOriginGuard {
    enabled: bool,
    allowlist: OriginAllowlist,
}

impl DevOriginGuard {
    /// Create a guard; `enabled` is the development flag.
    pub fn new(enabled: bool, allowlist: OriginAllowlist) -> Self {
        Self { enabled, allowlist }
    }

    /// Whether the request may proceed.
    pub fn allows(&self, path: &str, headers: &HeaderMap) -> bool {
        if !self.enabled || !path.starts_with(INTERNAL_PATH_PREFIX) {
            return true;
        }

        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        if header("sec-fetch-mode") == Some("no-cors") && header("sec-fetch-site") == Some("cross-site") {
            tracing::warn!(path, "blocked cross-site no-cors request to development resource");
            return false;
        }

        let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok()) else {
            return true;
        };
        let allowed = Url::parse(origin)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| is_localhost(&host) || self.allowlist.is_allowed(&host));
        if !allowed {
            tracing::warn!(path, origin, "blocked cross-origin request to development resource");
        }
        allowed
    }
}
