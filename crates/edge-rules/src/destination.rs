//! Destination interpolation, sanitization and query merging.

use edge_core::QueryParams;
use url::Url;

use crate::source::Captures;

/// Substitute `:name`, `:name*`, `:name+` and `:name?` placeholders.
///
/// Captured values are percent-encoded per path segment before the first
/// `?` and as a whole component after it. Optional placeholders without a
/// value disappear along with their leading slash; other unknown names are
/// left as written.
pub fn interpolate_destination(template: &str, captures: &Captures) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut in_query = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;

        if c == ':' && chars.get(i).is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_') {
            let start = i;
            while chars.get(i).is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            let modifier = chars.get(i).copied().filter(|m| matches!(m, '*' | '+' | '?'));

            match captures.get(&name) {
                Some(value) => {
                    if modifier.is_some() {
                        i += 1;
                    }
                    if in_query {
                        out.push_str(&urlencoding::encode(value));
                    } else {
                        out.push_str(&encode_path(value));
                    }
                }
                None if matches!(modifier, Some('*' | '?')) => {
                    i += 1;
                    if out.ends_with('/') && out.len() > 1 {
                        out.pop();
                    }
                }
                None => {
                    out.push(':');
                    out.push_str(&name);
                }
            }
            continue;
        }

        if c == '?' {
            in_query = true;
        }
        out.push(c);
    }

    out
}

fn encode_path(value: &str) -> String {
    value
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether the destination is a fully-qualified `http(s)` URL.
pub fn is_external(destination: &str) -> bool {
    let lower = destination.trim_start().to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && Url::parse(destination.trim_start())
            .map(|url| url.host_str().is_some())
            .unwrap_or(false)
}

/// Make a destination safe to emit as a location.
///
/// Fully-qualified external URLs pass through. Anything else gets exactly
/// one leading slash, so protocol-relative payloads such as `//evil.com` or
/// `/\evil.com` become local paths.
pub fn sanitize_destination(destination: &str) -> String {
    let cleaned: String = destination
        .chars()
        .filter(|c| !matches!(c, '\t' | '\r' | '\n'))
        .collect();
    if is_external(&cleaned) {
        return cleaned.trim_start().to_string();
    }
    let trimmed = cleaned.trim_start().trim_start_matches(['/', '\\']);
    format!("/{}", trimmed)
}

/// A local destination split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDestination {
    pub pathname: String,
    pub query: QueryParams,
    pub fragment: Option<String>,
}

impl LocalDestination {
    /// Split a sanitized local destination.
    pub fn parse(destination: &str) -> Self {
        let (rest, fragment) = match destination.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (destination, None),
        };
        let (pathname, query) = match rest.split_once('?') {
            Some((path, query)) => (path, QueryParams::parse(query)),
            None => (rest, QueryParams::new()),
        };
        Self {
            pathname: pathname.to_string(),
            query,
            fragment,
        }
    }

    /// Render back to a location string.
    pub fn to_location(&self) -> String {
        let mut location = self.pathname.clone();
        if !self.query.is_empty() {
            location.push('?');
            location.push_str(&self.query.to_query_string());
        }
        if let Some(fragment) = &self.fragment {
            location.push('#');
            location.push_str(fragment);
        }
        location
    }
}

/// Add request query parameters the destination does not already set.
pub fn merge_query(destination: &str, original: &QueryParams) -> String {
    if original.is_empty() {
        return destination.to_string();
    }

    if is_external(destination) {
        let Ok(mut url) = Url::parse(destination) else {
            return destination.to_string();
        };
        let existing: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let missing: Vec<(&str, &str)> = original
            .iter()
            .filter(|(k, _)| !existing.iter().any(|e| e == k))
            .collect();
        if !missing.is_empty() {
            url.query_pairs_mut().extend_pairs(missing);
        }
        return url.to_string();
    }

    let mut local = LocalDestination::parse(destination);
    local.query.merge_missing(original);
    local.to_location()
}
