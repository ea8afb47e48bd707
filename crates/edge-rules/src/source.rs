//! Rule source compilation.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};

/// Longest accepted source or condition pattern, in bytes.
pub const MAX_PATTERN_LEN: usize = 4096;

const REGEX_SIZE_LIMIT: usize = 1 << 20;
const REGEX_NEST_LIMIT: u32 = 32;
const SEGMENT: &str = "[^/]+";

/// Values captured by a rule source or condition, keyed by parameter name.
/// Catch-all captures are joined with `/`.
pub type Captures = BTreeMap<String, String>;

/// Errors from compiling a rule source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("pattern exceeds {limit} bytes")]
    PatternTooLong { limit: usize },

    #[error("unbalanced group in {0}")]
    UnbalancedGroup(String),

    #[error("invalid regex for {pattern}: {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// How a source was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Only literals and `:name` parameters.
    Path,
    /// Contains groups, escapes or quantifiers and is treated as a regular expression.
    Regex,
}

/// Compile a regular expression with bounded size and nesting.
pub fn bounded_regex(pattern: &str) -> Result<Regex, RuleError> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(RuleError::PatternTooLong {
            limit: MAX_PATTERN_LEN,
        });
    }
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT)
        .nest_limit(REGEX_NEST_LIMIT)
        .build()
        .map_err(|e| RuleError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// A compiled rule source.
#[derive(Debug, Clone)]
pub struct RuleSource {
    source: String,
    regex: Regex,
    kind: SourceKind,
    /// Regex group name to parameter name.
    groups: Vec<(String, String)>,
}

impl RuleSource {
    /// Compile a source such as `/blog/:slug`, `/docs/:path*` or `/(.*)`.
    pub fn compile(source: &str) -> Result<Self, RuleError> {
        if source.len() > MAX_PATTERN_LEN {
            return Err(RuleError::PatternTooLong {
                limit: MAX_PATTERN_LEN,
            });
        }

        let mut compiler = SourceCompiler::new(source);
        compiler.run()?;
        let SourceCompiler {
            mut out,
            groups,
            kind,
            ..
        } = compiler;

        if !out.ends_with('/') {
            out.push_str("/?");
        }
        out.push('$');

        let regex = bounded_regex(&out)?;
        Ok(Self {
            source: source.to_string(),
            regex,
            kind,
            groups,
        })
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// How the source was written.
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Whether the pathname matches.
    pub fn is_match(&self, pathname: &str) -> bool {
        self.regex.is_match(pathname)
    }

    /// Match and extract parameters. Optional parameters that did not
    /// participate are absent.
    pub fn captures(&self, pathname: &str) -> Option<Captures> {
        let caps = self.regex.captures(pathname)?;
        let mut out = Captures::new();
        for name in self.regex.capture_names().flatten() {
            let Some(m) = caps.name(name) else { continue };
            let param = self
                .groups
                .iter()
                .find(|(group, _)| group == name)
                .map(|(_, param)| param.as_str())
                .unwrap_or(name);
            out.insert(param.to_string(), m.as_str().to_string());
        }
        Some(out)
    }
}

struct SourceCompiler<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    out: String,
    groups: Vec<(String, String)>,
    unnamed: usize,
    kind: SourceKind,
}

impl<'a> SourceCompiler<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            out: String::from("^"),
            groups: Vec::new(),
            unnamed: 0,
            kind: SourceKind::Path,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn run(&mut self) -> Result<(), RuleError> {
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                ':' if self.peek().is_some_and(is_ident_char) => {
                    let name = self.read_ident();
                    let pattern = if self.peek() == Some('(') {
                        self.pos += 1;
                        self.kind = SourceKind::Regex;
                        self.read_group()?
                    } else {
                        SEGMENT.to_string()
                    };
                    let modifier = self.read_modifier();
                    self.emit_param(name, &pattern, modifier);
                }
                '(' => {
                    self.kind = SourceKind::Regex;
                    let inner = self.read_group()?;
                    if inner.starts_with('?') {
                        // Non-capturing or explicitly named group, used verbatim.
                        self.out.push('(');
                        self.out.push_str(&inner);
                        self.out.push(')');
                    } else {
                        let name = self.unnamed.to_string();
                        self.unnamed += 1;
                        let modifier = self.read_modifier();
                        self.emit_param(name, &inner, modifier);
                    }
                }
                '*' if self.out.ends_with('/') || self.out == "^" => {
                    self.kind = SourceKind::Regex;
                    let name = self.unnamed.to_string();
                    self.unnamed += 1;
                    self.emit_param(name, ".*", None);
                }
                '\\' => {
                    self.kind = SourceKind::Regex;
                    if let Some(next) = self.peek() {
                        self.pos += 1;
                        self.out.push_str(&regex::escape(&next.to_string()));
                    }
                }
                '*' | '+' | '?' => {
                    self.kind = SourceKind::Regex;
                    self.out.push(c);
                }
                other => self.out.push_str(&regex::escape(&other.to_string())),
            }
        }
        Ok(())
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn read_modifier(&mut self) -> Option<char> {
        match self.peek() {
            Some(m @ ('?' | '*' | '+')) => {
                self.pos += 1;
                Some(m)
            }
            _ => None,
        }
    }

    /// Read up to the matching `)`; the opening `(` is already consumed.
    fn read_group(&mut self) -> Result<String, RuleError> {
        let mut depth = 1;
        let mut inner = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    inner.push(c);
                    if let Some(next) = self.peek() {
                        self.pos += 1;
                        inner.push(next);
                    }
                    continue;
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(inner);
                    }
                }
                _ => {}
            }
            inner.push(c);
        }
        Err(RuleError::UnbalancedGroup(self.source.to_string()))
    }

    fn emit_param(&mut self, name: String, pattern: &str, modifier: Option<char>) {
        let group = format!("__p{}", self.groups.len());
        let repeated = format!("(?:{pattern})(?:/(?:{pattern}))*");
        let after_slash = self.out.ends_with('/') && self.out.len() > 1;

        let fragment = match (modifier, after_slash) {
            (None, _) => format!("(?P<{group}>{pattern})"),
            (Some('?'), true) => {
                self.out.pop();
                format!("(?:/(?P<{group}>{pattern}))?")
            }
            (Some('?'), false) => format!("(?P<{group}>{pattern})?"),
            (Some('*'), true) => {
                self.out.pop();
                format!("(?:/(?P<{group}>{repeated}))?")
            }
            (Some('*'), false) => format!("(?P<{group}>{repeated})?"),
            (_, _) => format!("(?P<{group}>{repeated})"),
        };

        self.out.push_str(&fragment);
        self.groups.push((group, name));
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Allowlist of paths written in rule-source syntax.
///
/// An unconfigured matcher accepts every path. A configured matcher whose
/// sources all failed to compile accepts none.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    sources: Vec<RuleSource>,
    configured: bool,
}

impl PathMatcher {
    /// Compile a list of sources, skipping invalid ones.
    pub fn new(sources: &[String]) -> Self {
        let compiled = sources
            .iter()
            .filter_map(|source| match RuleSource::compile(source) {
                Ok(compiled) => Some(compiled),
                Err(err) => {
                    tracing::warn!(source = %source, error = %err, "skipping invalid matcher");
                    None
                }
            })
            .collect();
        Self {
            sources: compiled,
            configured: !sources.is_empty(),
        }
    }

    /// A matcher that accepts every path.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether the path is allowed.
    pub fn matches(&self, pathname: &str) -> bool {
        if !self.configured {
            return true;
        }
        self.sources.iter().any(|source| source.is_match(pathname))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(source: &str, path: &str) -> Option<Captures> {
        RuleSource::compile(source).unwrap().captures(path)
    }

    // === Path Syntax Tests ===

    #[test]
    fn test_plain_param() {
        let c = caps("/old/:id", "/old/42").unwrap();
        assert_eq!(c["id"], "42");
        assert!(caps("/old/:id", "/old/42/x").is_none());
        assert!(caps("/old/:id", "/old").is_none());
        assert_eq!(RuleSource::compile("/old/:id").unwrap().kind(), SourceKind::Path);
    }

    #[test]
    fn test_literals_are_case_sensitive_and_escaped() {
        assert!(caps("/About", "/about").is_none());
        assert!(caps("/feed.xml", "/feedxxml").is_none());
        assert!(caps("/feed.xml", "/feed.xml").is_some());
    }

    #[test]
    fn test_trailing_slash_is_optional() {
        assert!(caps("/blog", "/blog/").is_some());
    }

    #[test]
    fn test_catch_all_modifiers() {
        assert!(caps("/docs/:path+", "/docs").is_none());
        assert_eq!(caps("/docs/:path+", "/docs/a/b").unwrap()["path"], "a/b");

        let empty = caps("/docs/:path*", "/docs").unwrap();
        assert!(!empty.contains_key("path"));
        assert_eq!(caps("/docs/:path*", "/docs/a/b/c").unwrap()["path"], "a/b/c");

        assert!(caps("/:path*", "/").is_some());
    }

    #[test]
    fn test_optional_param() {
        assert!(!caps("/shop/:lang?", "/shop").unwrap().contains_key("lang"));
        assert_eq!(caps("/shop/:lang?", "/shop/en").unwrap()["lang"], "en");
    }

    // === Regex Syntax Tests ===

    #[test]
    fn test_inline_class_on_param() {
        let source = RuleSource::compile("/post/:id(\\d{1,})").unwrap();
        assert_eq!(source.kind(), SourceKind::Regex);
        assert_eq!(source.captures("/post/123").unwrap()["id"], "123");
        assert!(source.captures("/post/abc").is_none());
    }

    #[test]
    fn test_alternation_group() {
        assert_eq!(caps("/:locale(en|fr)/about", "/fr/about").unwrap()["locale"], "fr");
        assert!(caps("/:locale(en|fr)/about", "/de/about").is_none());
    }

    #[test]
    fn test_unnamed_groups_are_numbered() {
        let c = caps("/files/(.*)", "/files/a/b.txt").unwrap();
        assert_eq!(c["0"], "a/b.txt");
    }

    #[test]
    fn test_named_group_verbatim() {
        let c = caps("/u/(?<user>[a-z]+)", "/u/alice").unwrap();
        assert_eq!(c["user"], "alice");
    }

    #[test]
    fn test_bare_wildcard() {
        assert_eq!(caps("/legacy/*", "/legacy/x/y").unwrap()["0"], "x/y");
    }

    // === Bounds Tests ===

    #[test]
    fn test_unsupported_or_oversized_patterns_fail() {
        assert!(matches!(
            RuleSource::compile("/a/(?=lookahead)"),
            Err(RuleError::InvalidRegex { .. })
        ));
        assert!(matches!(
            RuleSource::compile("/(unclosed"),
            Err(RuleError::UnbalancedGroup(_))
        ));
        let long = format!("/{}", "a".repeat(MAX_PATTERN_LEN));
        assert!(matches!(
            RuleSource::compile(&long),
            Err(RuleError::PatternTooLong { .. })
        ));
        assert!(bounded_regex("(a{1000}){1000}").is_err());
    }

    // === PathMatcher Tests ===

    #[test]
    fn test_path_matcher() {
        assert!(PathMatcher::any().matches("/anything"));

        let matcher = PathMatcher::new(&["/dashboard/:path*".to_string()]);
        assert!(matcher.matches("/dashboard"));
        assert!(matcher.matches("/dashboard/settings"));
        assert!(!matcher.matches("/public"));

        let broken = PathMatcher::new(&["/(oops".to_string()]);
        assert!(!broken.matches("/oops"));
    }
}
