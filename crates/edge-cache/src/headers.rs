//! Cache response headers.

use http::HeaderMap;

use crate::policy::CacheDecision;

/// Header names for cache debugging.
pub mod header_names {
    /// Signal that decided the directive.
    pub const X_CACHE_REASON: &str = "x-cache-reason";
    /// Revalidation period in seconds, when one applies.
    pub const X_CACHE_REVALIDATE: &str = "x-cache-revalidate";
    /// Request header enabling debug output.
    pub const X_DEBUG_CACHE: &str = "x-debug-cache";
}

/// Builder for cache response headers.
#[derive(Debug, Default)]
pub struct CacheHeadersBuilder {
    cache_control: Option<String>,
    vary: Vec<String>,
    explain: Option<CacheDecision>,
    include_debug: bool,
}

impl CacheHeadersBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set Cache-Control header.
    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    /// Set Cache-Control from a decision, remembering it for debug output.
    pub fn decision(mut self, decision: CacheDecision) -> Self {
        self.cache_control = Some(decision.directive.cache_control());
        self.explain = Some(decision);
        self
    }

    /// Add a header the response varies on.
    pub fn vary(mut self, header: impl Into<String>) -> Self {
        self.vary.push(header.into());
        self
    }

    /// Enable debug headers in output.
    pub fn include_debug(mut self, enabled: bool) -> Self {
        self.include_debug = enabled;
        self
    }

    /// Build the headers.
    pub fn build(self) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        if let Some(cc) = self.cache_control {
            headers.push(("cache-control".to_string(), cc));
        }

        if !self.vary.is_empty() {
            headers.push(("vary".to_string(), self.vary.join(", ")));
        }

        if self.include_debug {
            if let Some(decision) = self.explain {
                headers.push((
                    header_names::X_CACHE_REASON.to_string(),
                    decision.reason.to_string(),
                ));
                if let crate::CacheDirective::Revalidate(secs) = decision.directive {
                    headers.push((header_names::X_CACHE_REVALIDATE.to_string(), secs.to_string()));
                }
            }
        }

        headers
    }
}

/// Check if debug headers should be included.
pub fn should_include_debug_headers(request_headers: &HeaderMap) -> bool {
    request_headers
        .get(header_names::X_DEBUG_CACHE)
        .map_or(false, |value| value.as_bytes() == b"1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheDirective, CacheReason};

    #[test]
    fn test_builder_from_decision() {
        let headers = CacheHeadersBuilder::new()
            .decision(CacheDecision {
                directive: CacheDirective::Revalidate(60),
                reason: CacheReason::Revalidate,
            })
            .vary("rsc")
            .vary("accept")
            .include_debug(true)
            .build();

        assert_eq!(
            headers,
            vec![
                ("cache-control".to_string(), "s-maxage=60, stale-while-revalidate".to_string()),
                ("vary".to_string(), "rsc, accept".to_string()),
                ("x-cache-reason".to_string(), "revalidate".to_string()),
                ("x-cache-revalidate".to_string(), "60".to_string()),
            ]
        );
    }

    #[test]
    fn test_debug_headers_hidden_by_default() {
        let headers = CacheHeadersBuilder::new()
            .decision(CacheDecision {
                directive: CacheDirective::NoStore,
                reason: CacheReason::DynamicUsage,
            })
            .build();

        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_should_include_debug_headers() {
        let mut headers = HeaderMap::new();
        assert!(!should_include_debug_headers(&headers));

        headers.insert("x-debug-cache", "1".parse().unwrap());
        assert!(should_include_debug_headers(&headers));
    }
}
