//! Host allowlist for cross-origin checks.

use serde::{Deserialize, Serialize};

/// Allowlist of hosts trusted as request origins.
///
/// Entries are exact hosts (`proxy.example.com`, optionally with a port)
/// or label patterns: `*` matches exactly one label and `**` one or more,
/// so `*.example.com` matches `api.example.com` but not `example.com`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginAllowlist {
    /// Allowed exact hosts.
    allowed_hosts: Vec<String>,
    /// Allowed host patterns.
    allowed_patterns: Vec<String>,
}

impl OriginAllowlist {
    /// Create an empty allowlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured entries, routing wildcard entries to patterns.
    pub fn from_entries(entries: &[String]) -> Self {
        entries.iter().fold(Self::new(), |list, entry| {
            if entry.contains('*') {
                list.allow_pattern(entry.as_str())
            } else {
                list.allow_host(entry.as_str())
            }
        })
    }

    /// Allow a specific host.
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into().to_lowercase());
        self
    }

    /// Allow a host pattern.
    pub fn allow_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_patterns.push(pattern.into().to_lowercase());
        self
    }

    /// Whether no entries are configured.
    pub fn is_empty(&self) -> bool {
        self.allowed_hosts.is_empty() && self.allowed_patterns.is_empty()
    }

    /// Whether `host` (with or without port) is allowed.
    pub fn is_allowed(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        let bare = edge_core::strip_port(&host);

        if self.allowed_hosts.iter().any(|h| *h == host || *h == bare) {
            return true;
        }
        self.allowed_patterns
            .iter()
            .any(|pattern| matches_pattern(&bare, pattern) || matches_pattern(&host, pattern))
    }
}

/// Whether `host` is a loopback name or address.
pub fn is_localhost(host: &str) -> bool {
    let host = edge_core::strip_port(host);
    host == "localhost" || host == "[::1]" || host == "::1" || host.starts_with("127.")
}

fn matches_pattern(host: &str, pattern: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    let parts: Vec<&str> = pattern.split('.').collect();
    match_labels(&labels, &parts)
}

fn match_labels(labels: &[&str], parts: &[&str]) -> bool {
    match parts.split_first() {
        None => labels.is_empty(),
        Some((&"**", rest)) => (1..=labels.len()).any(|n| match_labels(&labels[n..], rest)),
        Some((&"*", rest)) => !labels.is_empty() && match_labels(&labels[1..], rest),
        Some((part, rest)) => {
            labels.first().is_some_and(|label| label == part) && match_labels(&labels[1..], rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_host_with_and_without_port() {
        let list = OriginAllowlist::new().allow_host("Proxy.Example.com");
        assert!(list.is_allowed("proxy.example.com"));
        assert!(list.is_allowed("proxy.example.com:8443"));
        assert!(!list.is_allowed("example.com"));
    }

    #[test]
    fn test_single_label_wildcard() {
        let list = OriginAllowlist::from_entries(&["*.example.com".to_string()]);
        assert!(list.is_allowed("api.example.com"));
        assert!(!list.is_allowed("a.b.example.com"));
        assert!(!list.is_allowed("example.com"));
        assert!(!list.is_allowed("evil-example.com"));
    }

    #[test]
    fn test_multi_label_wildcard() {
        let list = OriginAllowlist::from_entries(&["**.example.com".to_string()]);
        assert!(list.is_allowed("a.b.example.com"));
        assert!(!list.is_allowed("example.com"));
    }

    #[test]
    fn test_localhost_detection() {
        assert!(is_localhost("localhost:3000"));
        assert!(is_localhost("127.0.0.1"));
        assert!(is_localhost("[::1]:3000"));
        assert!(!is_localhost("example.com"));
        assert!(OriginAllowlist::new().is_empty());
    }
}
