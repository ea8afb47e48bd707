//! Request context used by rule evaluation and middleware.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use http::header::{HeaderMap, HOST};
use http::request::Parts;
use http::Method;

/// Unique request identifier for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

impl RequestId {
    /// Generate a new request ID.
    pub fn generate() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{:x}-{:x}", nanos, seq.wrapping_mul(2654435761)))
    }

    /// Create from an existing ID string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered query string parameters.
///
/// Repeated keys are preserved in request order so a query can be
/// re-serialized without reordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    /// Create an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (without the leading `?`).
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (key, value) = part.split_once('=').unwrap_or((part, ""));
                (decode_component(key), decode_component(value))
            })
            .collect();
        Self(pairs)
    }

    /// First value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a key.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Append a key/value pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Add pairs from `other` whose keys are not already present.
    pub fn merge_missing(&mut self, other: &QueryParams) {
        for (key, value) in &other.0 {
            if !self.contains(key) {
                self.0.push((key.clone(), value.clone()));
            }
        }
    }

    /// Iterate over the pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize back to a query string (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    urlencoding::encode(k).into_owned()
                } else {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Cookies sent with the request, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(BTreeMap<String, String>);

impl Cookies {
    /// Parse every `Cookie` header in the map. The first occurrence of a name wins.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = BTreeMap::new();
        for value in headers.get_all(http::header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                let Some((name, value)) = pair.trim().split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim().trim_matches('"');
                cookies
                    .entry(name.to_string())
                    .or_insert_with(|| decode_component(value));
            }
        }
        Self(cookies)
    }

    /// Get a cookie value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    /// Iterate over all cookies.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of cookies.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the request carried no cookies.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Immutable per-request bundle consulted by redirect, rewrite and header rules.
///
/// Built once at request start from the incoming request head and never
/// mutated afterwards. Middleware header overrides live in the request scope,
/// not here.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: RequestId,
    /// HTTP method.
    pub method: Method,
    /// Raw request path, before decoding or normalization.
    pub path: String,
    /// Query string parameters.
    pub query: QueryParams,
    /// Request headers.
    pub headers: HeaderMap,
    /// Parsed cookies.
    pub cookies: Cookies,
    /// Lowercased host without port.
    pub host: String,
}

impl RequestContext {
    /// Build the context from an HTTP request head.
    pub fn from_parts(parts: &Parts) -> Self {
        let headers = parts.headers.clone();
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
            .map(|h| strip_port(&h))
            .unwrap_or_default();

        Self {
            request_id: RequestId::generate(),
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: QueryParams::parse(parts.uri.query().unwrap_or("")),
            cookies: Cookies::from_headers(&headers),
            headers,
            host,
        }
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get a cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name)
    }

    /// Get a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }
}

/// Lowercase a host and strip any port, keeping IPv6 brackets intact.
pub fn strip_port(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    // === QueryParams Tests ===

    #[test]
    fn test_query_parse_decodes_and_keeps_order() {
        let query = QueryParams::parse("b=2&a=hello+world&a=x%2Fy&flag");

        assert_eq!(query.get("a"), Some("hello world"));
        assert_eq!(query.get_all("a"), vec!["hello world", "x/y"]);
        assert_eq!(query.get("flag"), Some(""));
        assert_eq!(query.iter().next(), Some(("b", "2")));
    }

    #[test]
    fn test_query_merge_missing() {
        let mut target = QueryParams::parse("a=1");
        target.merge_missing(&QueryParams::parse("a=2&b=3"));

        assert_eq!(target.to_query_string(), "a=1&b=3");
    }

    // === Cookies Tests ===

    #[test]
    fn test_cookies_first_occurrence_wins() {
        let p = parts("/", &[("cookie", "session=abc; theme=dark; session=zzz")]);
        let cookies = Cookies::from_headers(&p.headers);

        assert_eq!(cookies.get("session"), Some("abc"));
        assert_eq!(cookies.get("theme"), Some("dark"));
        assert_eq!(cookies.len(), 2);
    }

    // === RequestContext Tests ===

    #[test]
    fn test_context_host_lowercased_without_port() {
        let p = parts("/shop?q=1", &[("host", "Example.COM:8080")]);
        let ctx = RequestContext::from_parts(&p);

        assert_eq!(ctx.host, "example.com");
        assert_eq!(ctx.path, "/shop");
        assert_eq!(ctx.query_param("q"), Some("1"));
    }

    #[test]
    fn test_context_host_falls_back_to_authority() {
        let p = parts("https://api.example.com/x", &[]);
        let ctx = RequestContext::from_parts(&p);

        assert_eq!(ctx.host, "api.example.com");
    }

    #[test]
    fn test_strip_port_ipv6() {
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
        assert_eq!(strip_port("localhost"), "localhost");
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
