//! Rule evaluation against a request.

use edge_core::{EngineConfig, HeaderPair, RequestContext, RouteHas};

use crate::condition::Conditions;
use crate::destination::{
    interpolate_destination, is_external, merge_query, sanitize_destination, LocalDestination,
};
use crate::source::{Captures, RuleSource};

/// Phase a rewrite group runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewritePhase {
    BeforeFiles,
    AfterFiles,
    Fallback,
}

/// A matched redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOutcome {
    pub location: String,
    pub status: u16,
}

/// A matched rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Continue routing against a local path.
    Internal(LocalDestination),
    /// Proxy the request to an external URL.
    External(String),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    source: RuleSource,
    destination: String,
    conditions: Conditions,
}

impl CompiledRule {
    fn compile(source: &str, destination: &str, has: &[RouteHas], missing: &[RouteHas]) -> Option<Self> {
        match RuleSource::compile(source) {
            Ok(compiled) => Some(Self {
                source: compiled,
                destination: destination.to_string(),
                conditions: Conditions::new(has, missing),
            }),
            Err(err) => {
                tracing::warn!(source = %source, error = %err, "skipping rule with unsafe or invalid source");
                None
            }
        }
    }

    fn captures(&self, pathname: &str, ctx: &RequestContext) -> Option<Captures> {
        let mut captures = self.source.captures(pathname)?;
        self.conditions
            .check(ctx, &mut captures)
            .then_some(captures)
    }

    fn destination(&self, captures: &Captures, ctx: &RequestContext) -> String {
        let interpolated = interpolate_destination(&self.destination, captures);
        merge_query(&sanitize_destination(&interpolated), &ctx.query)
    }
}

#[derive(Debug, Clone)]
struct CompiledHeaderRule {
    source: RuleSource,
    headers: Vec<HeaderPair>,
    conditions: Conditions,
}

/// Compiled redirect, rewrite and header rules.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    redirects: Vec<(CompiledRule, u16)>,
    before_files: Vec<CompiledRule>,
    after_files: Vec<CompiledRule>,
    fallback: Vec<CompiledRule>,
    headers: Vec<CompiledHeaderRule>,
}

impl RuleEngine {
    /// Compile every rule in the configuration. Rules whose source cannot
    /// be compiled within bounds are skipped.
    pub fn new(config: &EngineConfig) -> Self {
        let redirects = config
            .redirects
            .iter()
            .filter_map(|r| {
                CompiledRule::compile(&r.source, &r.destination, &r.has, &r.missing)
                    .map(|rule| (rule, r.status()))
            })
            .collect();

        let rewrites = |rules: &[edge_core::RewriteRule]| -> Vec<CompiledRule> {
            rules
                .iter()
                .filter_map(|r| CompiledRule::compile(&r.source, &r.destination, &r.has, &r.missing))
                .collect()
        };

        let headers = config
            .headers
            .iter()
            .filter_map(|h| match RuleSource::compile(&h.source) {
                Ok(source) => Some(CompiledHeaderRule {
                    source,
                    headers: h.headers.clone(),
                    conditions: Conditions::new(&h.has, &h.missing),
                }),
                Err(err) => {
                    tracing::warn!(source = %h.source, error = %err, "skipping header rule");
                    None
                }
            })
            .collect();

        Self {
            redirects,
            before_files: rewrites(&config.rewrites.before_files),
            after_files: rewrites(&config.rewrites.after_files),
            fallback: rewrites(&config.rewrites.fallback),
            headers,
        }
    }

    /// First matching redirect.
    pub fn redirect(&self, pathname: &str, ctx: &RequestContext) -> Option<RedirectOutcome> {
        self.redirects.iter().find_map(|(rule, status)| {
            let captures = rule.captures(pathname, ctx)?;
            let location = rule.destination(&captures, ctx);
            tracing::debug!(source = rule.source.source(), %location, status, "redirect rule matched");
            Some(RedirectOutcome {
                location,
                status: *status,
            })
        })
    }

    /// First matching rewrite of a phase.
    pub fn rewrite(
        &self,
        phase: RewritePhase,
        pathname: &str,
        ctx: &RequestContext,
    ) -> Option<RewriteOutcome> {
        let rules = match phase {
            RewritePhase::BeforeFiles => &self.before_files,
            RewritePhase::AfterFiles => &self.after_files,
            RewritePhase::Fallback => &self.fallback,
        };
        rules.iter().find_map(|rule| {
            let captures = rule.captures(pathname, ctx)?;
            let destination = rule.destination(&captures, ctx);
            tracing::debug!(source = rule.source.source(), %destination, ?phase, "rewrite rule matched");
            Some(if is_external(&destination) {
                RewriteOutcome::External(destination)
            } else {
                RewriteOutcome::Internal(LocalDestination::parse(&destination))
            })
        })
    }

    /// Headers from every matching header rule, in rule order. A later rule
    /// replaces an earlier value for the same (case-insensitive) name.
    pub fn headers(&self, pathname: &str, ctx: &RequestContext) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for rule in &self.headers {
            let Some(mut captures) = rule.source.captures(pathname) else {
                continue;
            };
            if !rule.conditions.check(ctx, &mut captures) {
                continue;
            }
            for pair in &rule.headers {
                let value = interpolate_plain(&pair.value, &captures);
                match out.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&pair.key)) {
                    Some(existing) => existing.1 = value,
                    None => out.push((pair.key.to_ascii_lowercase(), value)),
                }
            }
        }
        out
    }

    /// Whether any redirect or rewrite rules are configured.
    pub fn is_empty(&self) -> bool {
        self.redirects.is_empty()
            && self.before_files.is_empty()
            && self.after_files.is_empty()
            && self.fallback.is_empty()
            && self.headers.is_empty()
    }
}

/// Header values are not URLs, so captured values are inserted unencoded.
fn interpolate_plain(template: &str, captures: &Captures) -> String {
    let mut out = template.to_string();
    let mut names: Vec<&String> = captures.keys().collect();
    // Longer names first so `:id` does not clobber `:idx`.
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    for name in names {
        out = out.replace(&format!(":{}", name), &captures[name]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::{HeaderRule, RedirectRule, RewriteRule};

    fn ctx(uri: &str, headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestContext::from_parts(&builder.body(()).unwrap().into_parts().0)
    }

    // === Redirect Tests ===

    #[test]
    fn test_redirect_interpolates_param() {
        let config = EngineConfig::new().with_redirect(RedirectRule::new("/old/:id", "/:id"));
        let engine = RuleEngine::new(&config);

        let outcome = engine.redirect("/old/42", &ctx("/old/42", &[])).unwrap();
        assert_eq!(outcome.location, "/42");
        assert_eq!(outcome.status, 307);
    }

    #[test]
    fn test_redirect_first_match_wins_and_permanent() {
        let config = EngineConfig::new()
            .with_redirect(RedirectRule::new("/a", "/first").permanent())
            .with_redirect(RedirectRule::new("/a", "/second"));
        let engine = RuleEngine::new(&config);

        let outcome = engine.redirect("/a", &ctx("/a", &[])).unwrap();
        assert_eq!(outcome.location, "/first");
        assert_eq!(outcome.status, 308);
    }

    #[test]
    fn test_redirect_sanitizes_open_redirect() {
        let config = EngineConfig::new()
            .with_redirect(RedirectRule::new("/a", "//evil.com"))
            .with_redirect(RedirectRule::new("/b", "/\\evil.com/x"));
        let engine = RuleEngine::new(&config);

        assert_eq!(engine.redirect("/a", &ctx("/a", &[])).unwrap().location, "/evil.com");
        assert_eq!(engine.redirect("/b", &ctx("/b", &[])).unwrap().location, "/evil.com/x");
    }

    #[test]
    fn test_redirect_preserves_query() {
        let config = EngineConfig::new().with_redirect(RedirectRule::new("/old", "/new"));
        let engine = RuleEngine::new(&config);

        let outcome = engine.redirect("/old", &ctx("/old?ref=mail", &[])).unwrap();
        assert_eq!(outcome.location, "/new?ref=mail");
    }

    #[test]
    fn test_redirect_uses_has_captures() {
        let config = EngineConfig::new().with_redirect(
            RedirectRule::new("/dashboard", "/teams/:team")
                .with_has(edge_core::RouteHas::cookie("team", None)),
        );
        let engine = RuleEngine::new(&config);

        assert!(engine.redirect("/dashboard", &ctx("/dashboard", &[])).is_none());
        let outcome = engine
            .redirect("/dashboard", &ctx("/dashboard", &[("cookie", "team=core")]))
            .unwrap();
        assert_eq!(outcome.location, "/teams/core");
    }

    #[test]
    fn test_invalid_sources_are_skipped() {
        let config = EngineConfig::new()
            .with_redirect(RedirectRule::new("/(?=x)", "/never"))
            .with_redirect(RedirectRule::new("/x", "/ok"));
        let engine = RuleEngine::new(&config);

        assert_eq!(engine.redirect("/x", &ctx("/x", &[])).unwrap().location, "/ok");
    }

    // === Rewrite Tests ===

    #[test]
    fn test_rewrite_phases_are_separate() {
        let config = EngineConfig::new()
            .with_before_rewrite(RewriteRule::new("/a", "/before"))
            .with_rewrite(RewriteRule::new("/a", "/after"))
            .with_fallback_rewrite(RewriteRule::new("/:path*", "https://legacy.example.com/:path*"));
        let engine = RuleEngine::new(&config);
        let request = ctx("/a", &[]);

        assert_eq!(
            engine.rewrite(RewritePhase::BeforeFiles, "/a", &request),
            Some(RewriteOutcome::Internal(LocalDestination::parse("/before")))
        );
        assert_eq!(
            engine.rewrite(RewritePhase::AfterFiles, "/a", &request),
            Some(RewriteOutcome::Internal(LocalDestination::parse("/after")))
        );
        assert_eq!(
            engine.rewrite(RewritePhase::Fallback, "/x/y", &ctx("/x/y?p=1", &[])),
            Some(RewriteOutcome::External(
                "https://legacy.example.com/x/y?p=1".to_string()
            ))
        );
    }

    #[test]
    fn test_rewrite_respects_missing() {
        let config = EngineConfig::new().with_rewrite(
            RewriteRule::new("/home", "/home-beta")
                .with_missing(edge_core::RouteHas::cookie("opt-out", None)),
        );
        let engine = RuleEngine::new(&config);

        assert!(engine
            .rewrite(RewritePhase::AfterFiles, "/home", &ctx("/home", &[("cookie", "opt-out=1")]))
            .is_none());
        assert!(engine
            .rewrite(RewritePhase::AfterFiles, "/home", &ctx("/home", &[]))
            .is_some());
    }

    // === Header Rule Tests ===

    #[test]
    fn test_headers_accumulate_and_last_wins() {
        let config = EngineConfig::new()
            .with_header_rule(
                HeaderRule::new("/(.*)")
                    .with_header("X-Frame-Options", "DENY")
                    .with_header("x-scope", "global"),
            )
            .with_header_rule(HeaderRule::new("/blog/:slug").with_header("x-scope", "post-:slug"));
        let engine = RuleEngine::new(&config);

        let headers = engine.headers("/blog/hello", &ctx("/blog/hello", &[]));
        assert_eq!(
            headers,
            vec![
                ("x-frame-options".to_string(), "DENY".to_string()),
                ("x-scope".to_string(), "post-hello".to_string()),
            ]
        );
        assert_eq!(engine.headers("/about", &ctx("/about", &[])).len(), 2);
    }
}
