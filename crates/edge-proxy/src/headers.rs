//! Header filtering for proxied requests and responses.

use http::header::{HeaderMap, HeaderName, AUTHORIZATION, CONNECTION, COOKIE, HOST, PROXY_AUTHORIZATION};

/// Headers that only apply to a single connection.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Prefix of headers the engine uses internally between middleware and routing.
pub const INTERNAL_HEADER_PREFIX: &str = "x-middleware-";

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Headers safe to forward to an external origin.
///
/// Drops credentials (`authorization`, `proxy-authorization`, `cookie`),
/// the inbound `host`, engine-internal `x-middleware-*` headers and
/// hop-by-hop headers.
pub fn strip_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    strip_hop_by_hop(&mut out);
    for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, HOST] {
        out.remove(name);
    }
    let internal: Vec<HeaderName> = out
        .keys()
        .filter(|name| name.as_str().starts_with(INTERNAL_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in internal {
        out.remove(name);
    }
    out
}

/// Drop hop-by-hop headers from an upstream response.
pub fn strip_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_request_credentials_stripped() {
        let stripped = strip_request_headers(&headers(&[
            ("authorization", "Bearer t"),
            ("cookie", "session=1"),
            ("host", "example.com"),
            ("x-middleware-rewrite", "/x"),
            ("accept", "text/html"),
        ]));

        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped["accept"], "text/html");
    }

    #[test]
    fn test_connection_listed_headers_stripped() {
        let mut map = headers(&[
            ("connection", "close, x-trace"),
            ("x-trace", "1"),
            ("transfer-encoding", "chunked"),
            ("content-type", "application/json"),
        ]);
        strip_response_headers(&mut map);

        assert_eq!(map.len(), 1);
        assert!(map.contains_key("content-type"));
    }
}
