//! Route patterns and segment matching.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    /// Must equal the path segment exactly.
    Literal(String),
    /// `:name` - captures exactly one segment.
    Param(String),
    /// `:name+` - captures one or more remaining segments.
    CatchAll(String),
    /// `:name*` - captures zero or more remaining segments.
    OptionalCatchAll(String),
}

impl PatternToken {
    /// Whether this token captures a parameter.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }

    /// Parameter name, if any.
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Param(name) | Self::CatchAll(name) | Self::OptionalCatchAll(name) => Some(name),
        }
    }
}

impl fmt::Display for PatternToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{}", s),
            Self::Param(n) => write!(f, ":{}", n),
            Self::CatchAll(n) => write!(f, ":{}+", n),
            Self::OptionalCatchAll(n) => write!(f, ":{}*", n),
        }
    }
}

/// Errors from parsing a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("catch-all segment must be last in {0}")]
    CatchAllNotLast(String),

    #[error("empty parameter name in {0}")]
    EmptyParamName(String),

    #[error("duplicate parameter '{name}' in {pattern}")]
    DuplicateParam { pattern: String, name: String },
}

/// Parse a route pattern into tokens.
///
/// Accepts `:name`, `:name+` and `:name*` as well as the bracket forms
/// `[name]`, `[...name]` and `[[...name]]` emitted by file-system discovery.
pub fn parse_pattern(pattern: &str) -> Result<Vec<PatternToken>, PatternError> {
    if !pattern.starts_with('/') {
        return Err(PatternError::MissingLeadingSlash(pattern.to_string()));
    }

    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut tokens = Vec::with_capacity(segments.len());
    let mut seen: Vec<String> = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let token = parse_segment(segment);
        if let Some(name) = token.param_name() {
            if name.is_empty() {
                return Err(PatternError::EmptyParamName(pattern.to_string()));
            }
            if seen.iter().any(|s| s == name) {
                return Err(PatternError::DuplicateParam {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
            seen.push(name.to_string());
        }
        let terminal = matches!(
            token,
            PatternToken::CatchAll(_) | PatternToken::OptionalCatchAll(_)
        );
        if terminal && i + 1 != segments.len() {
            return Err(PatternError::CatchAllNotLast(pattern.to_string()));
        }
        tokens.push(token);
    }

    Ok(tokens)
}

fn parse_segment(segment: &str) -> PatternToken {
    if let Some(name) = segment.strip_prefix(':') {
        if let Some(name) = name.strip_suffix('+') {
            return PatternToken::CatchAll(name.to_string());
        }
        if let Some(name) = name.strip_suffix('*') {
            return PatternToken::OptionalCatchAll(name.to_string());
        }
        return PatternToken::Param(name.to_string());
    }
    if let Some(name) = segment
        .strip_prefix("[[...")
        .and_then(|s| s.strip_suffix("]]"))
    {
        return PatternToken::OptionalCatchAll(name.to_string());
    }
    if let Some(name) = segment.strip_prefix("[...").and_then(|s| s.strip_suffix(']')) {
        return PatternToken::CatchAll(name.to_string());
    }
    if let Some(name) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return PatternToken::Param(name.to_string());
    }
    PatternToken::Literal(segment.to_string())
}

/// A captured route parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A single segment.
    Single(String),
    /// A catch-all capture.
    Multiple(Vec<String>),
}

impl ParamValue {
    /// The value as a single string, joining catch-all segments with `/`.
    pub fn joined(&self) -> String {
        match self {
            Self::Single(s) => s.clone(),
            Self::Multiple(parts) => parts.join("/"),
        }
    }

    /// The value as a single segment, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single(s) => Some(s),
            Self::Multiple(_) => None,
        }
    }
}

/// Parameters captured by a match, keyed by name.
pub type Params = BTreeMap<String, ParamValue>;

/// Match path segments against pattern tokens.
///
/// Segment counts must be equal unless the pattern ends in a catch-all.
/// A `+` catch-all needs at least one remaining segment, a `*` catch-all
/// accepts none and then leaves the parameter absent.
pub fn match_tokens(tokens: &[PatternToken], segments: &[&str]) -> Option<Params> {
    let mut params = Params::new();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            PatternToken::Literal(literal) => {
                if segments.get(i) != Some(&literal.as_str()) {
                    return None;
                }
            }
            PatternToken::Param(name) => {
                let segment = segments.get(i)?;
                params.insert(name.clone(), ParamValue::Single(segment.to_string()));
            }
            PatternToken::CatchAll(name) => {
                let rest = segments.get(i..).unwrap_or_default();
                if rest.is_empty() {
                    return None;
                }
                params.insert(name.clone(), ParamValue::Multiple(to_owned(rest)));
                return Some(params);
            }
            PatternToken::OptionalCatchAll(name) => {
                let rest = segments.get(i..).unwrap_or_default();
                if !rest.is_empty() {
                    params.insert(name.clone(), ParamValue::Multiple(to_owned(rest)));
                }
                return Some(params);
            }
        }
    }

    (segments.len() == tokens.len()).then_some(params)
}

/// Split a normalized pathname into its non-empty segments.
pub fn path_segments(pathname: &str) -> Vec<&str> {
    pathname.split('/').filter(|s| !s.is_empty()).collect()
}

fn to_owned(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> Option<Params> {
        let tokens = parse_pattern(pattern).unwrap();
        match_tokens(&tokens, &path_segments(path))
    }

    // === Parsing Tests ===

    #[test]
    fn test_parse_colon_and_bracket_forms() {
        let colon = parse_pattern("/shop/:category/:rest*").unwrap();
        let bracket = parse_pattern("/shop/[category]/[[...rest]]").unwrap();

        assert_eq!(colon, bracket);
        assert_eq!(colon[2], PatternToken::OptionalCatchAll("rest".into()));
        assert_eq!(parse_pattern("/docs/[...path]").unwrap()[1].to_string(), ":path+");
    }

    #[test]
    fn test_parse_rejects_catch_all_in_middle() {
        assert_eq!(
            parse_pattern("/a/:rest+/b"),
            Err(PatternError::CatchAllNotLast("/a/:rest+/b".into()))
        );
    }

    #[test]
    fn test_parse_rejects_duplicate_params() {
        assert!(matches!(
            parse_pattern("/:id/x/:id"),
            Err(PatternError::DuplicateParam { .. })
        ));
    }

    // === Matching Tests ===

    #[test]
    fn test_match_root_and_literals() {
        assert_eq!(matches("/", "/"), Some(Params::new()));
        assert!(matches("/about", "/about").is_some());
        assert!(matches("/about", "/About").is_none());
        assert!(matches("/about", "/about/team").is_none());
    }

    #[test]
    fn test_match_single_param() {
        let params = matches("/products/:id", "/products/42").unwrap();
        assert_eq!(params["id"], ParamValue::Single("42".into()));
        assert!(matches("/products/:id", "/products").is_none());
        assert!(matches("/products/:id", "/products/42/reviews").is_none());
    }

    #[test]
    fn test_one_or_more_rejects_zero_segments() {
        assert!(matches("/docs/:path+", "/docs").is_none());

        let params = matches("/docs/:path+", "/docs/a/b").unwrap();
        assert_eq!(
            params["path"],
            ParamValue::Multiple(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_zero_or_more_accepts_zero_segments() {
        let empty = matches("/docs/:path*", "/docs").unwrap();
        assert!(!empty.contains_key("path"));

        let params = matches("/docs/:path*", "/docs/a").unwrap();
        assert_eq!(params["path"].joined(), "a");
    }
}
