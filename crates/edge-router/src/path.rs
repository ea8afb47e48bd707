//! Request path normalization.

use std::borrow::Cow;

/// Errors from decoding a request path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("malformed percent-encoding in path: {0}")]
    MalformedEncoding(String),

    #[error("path is not valid UTF-8 after decoding")]
    InvalidUtf8,

    #[error("path contains a NUL byte")]
    NulByte,
}

/// A decoded, normalized pathname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// Decoded pathname with dot segments resolved and no duplicate slashes.
    /// Never ends with `/` unless it is the root.
    pub pathname: String,
    /// Whether the request path ended with a slash.
    pub trailing_slash: bool,
}

/// Decode a raw request path once and normalize it.
///
/// `%` must be followed by two hex digits. `.` and `..` segments are resolved
/// (never above the root) and runs of `/` collapse to one.
pub fn normalize_pathname(raw: &str) -> Result<NormalizedPath, PathError> {
    validate_percent_encoding(raw)?;
    let decoded = urlencoding::decode_binary(raw.as_bytes());
    let decoded = String::from_utf8(decoded.into_owned()).map_err(|_| PathError::InvalidUtf8)?;
    if decoded.contains('\0') {
        return Err(PathError::NulByte);
    }

    let trailing_slash = decoded.len() > 1 && decoded.ends_with('/');

    let mut stack: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    Ok(NormalizedPath {
        pathname: format!("/{}", stack.join("/")),
        trailing_slash,
    })
}

fn validate_percent_encoding(raw: &str) -> Result<(), PathError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(PathError::MalformedEncoding(raw.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Strip the application base path.
///
/// Returns `None` when the path lies outside the base path.
pub fn strip_base_path<'a>(pathname: &'a str, base_path: &str) -> Option<Cow<'a, str>> {
    if base_path.is_empty() {
        return Some(Cow::Borrowed(pathname));
    }
    if pathname == base_path {
        return Some(Cow::Borrowed("/"));
    }
    pathname
        .strip_prefix(base_path)
        .filter(|rest| rest.starts_with('/'))
        .map(Cow::Borrowed)
}

/// Canonical location when the request violates the trailing-slash policy.
///
/// With the policy enabled, paths whose last segment looks like a file
/// (contains a dot) are left alone.
pub fn trailing_slash_redirect(path: &NormalizedPath, trailing_slash: bool) -> Option<String> {
    if path.pathname == "/" {
        return None;
    }
    if trailing_slash {
        let last = path.pathname.rsplit('/').next().unwrap_or_default();
        if !path.trailing_slash && !last.contains('.') {
            return Some(format!("{}/", path.pathname));
        }
        None
    } else if path.trailing_slash {
        Some(path.pathname.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize_pathname(raw).unwrap().pathname
    }

    // === Normalization Tests ===

    #[test]
    fn test_normalize_collapses_and_resolves() {
        assert_eq!(norm("//a///b/"), "/a/b");
        assert_eq!(norm("/a/./b/../c"), "/a/c");
        assert_eq!(norm("/../../etc"), "/etc");
        assert_eq!(norm(""), "/");
    }

    #[test]
    fn test_normalize_decodes_once() {
        assert_eq!(norm("/caf%C3%A9"), "/café");
        assert_eq!(norm("/a%2520b"), "/a%20b");
    }

    #[test]
    fn test_normalize_rejects_malformed_encoding() {
        assert!(matches!(
            normalize_pathname("/bad%zz"),
            Err(PathError::MalformedEncoding(_))
        ));
        assert!(matches!(
            normalize_pathname("/trailing%4"),
            Err(PathError::MalformedEncoding(_))
        ));
        assert_eq!(normalize_pathname("/%FF"), Err(PathError::InvalidUtf8));
        assert_eq!(normalize_pathname("/a%00"), Err(PathError::NulByte));
    }

    #[test]
    fn test_normalize_reports_trailing_slash() {
        assert!(normalize_pathname("/blog/").unwrap().trailing_slash);
        assert!(!normalize_pathname("/").unwrap().trailing_slash);
    }

    // === Base Path Tests ===

    #[test]
    fn test_strip_base_path() {
        assert_eq!(strip_base_path("/docs/intro", "/docs").as_deref(), Some("/intro"));
        assert_eq!(strip_base_path("/docs", "/docs").as_deref(), Some("/"));
        assert_eq!(strip_base_path("/docsx", "/docs"), None);
        assert_eq!(strip_base_path("/a", "").as_deref(), Some("/a"));
    }

    // === Trailing Slash Tests ===

    #[test]
    fn test_trailing_slash_policy() {
        let with = normalize_pathname("/blog/").unwrap();
        let without = normalize_pathname("/blog").unwrap();
        let file = normalize_pathname("/feed.xml").unwrap();

        assert_eq!(trailing_slash_redirect(&with, false), Some("/blog".into()));
        assert_eq!(trailing_slash_redirect(&without, false), None);
        assert_eq!(trailing_slash_redirect(&without, true), Some("/blog/".into()));
        assert_eq!(trailing_slash_redirect(&with, true), None);
        assert_eq!(trailing_slash_redirect(&file, true), None);
    }
}
