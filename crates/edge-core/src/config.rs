//! Engine configuration: redirect, rewrite and header rules plus request policy.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default maximum mutation-action body size (1 MiB).
pub const DEFAULT_ACTION_BODY_LIMIT: u64 = 1024 * 1024;

/// Default external rewrite proxy timeout.
pub const DEFAULT_PROXY_TIMEOUT_MS: u64 = 30_000;

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base_path must start with '/' and not end with '/': {0}")]
    InvalidBasePath(String),

    #[error("{kind} condition requires a key")]
    MissingKey { kind: HasKind },

    #[error("host condition requires a value")]
    MissingHostValue,

    #[error("invalid redirect status code {0}, expected 301, 302, 303, 307 or 308")]
    InvalidRedirectStatus(u16),

    #[error("rule source must start with '/' or '(': {0}")]
    InvalidSource(String),

    #[error("header rule for {0} has no headers")]
    EmptyHeaderRule(String),
}

/// Kind of request attribute a `has`/`missing` condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasKind {
    Header,
    Cookie,
    Query,
    Host,
}

impl std::fmt::Display for HasKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Query => "query",
            Self::Host => "host",
        };
        f.write_str(name)
    }
}

/// A single `has`/`missing` condition.
///
/// `value` is a regular expression when it compiles, otherwise compared for
/// exact equality. Without a value the condition only tests presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHas {
    #[serde(rename = "type")]
    pub kind: HasKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl RouteHas {
    /// Condition on a header, optionally matching its value.
    pub fn header(key: impl Into<String>, value: Option<&str>) -> Self {
        Self::keyed(HasKind::Header, key, value)
    }

    /// Condition on a cookie, optionally matching its value.
    pub fn cookie(key: impl Into<String>, value: Option<&str>) -> Self {
        Self::keyed(HasKind::Cookie, key, value)
    }

    /// Condition on a query parameter, optionally matching its value.
    pub fn query(key: impl Into<String>, value: Option<&str>) -> Self {
        Self::keyed(HasKind::Query, key, value)
    }

    /// Condition on the request host.
    pub fn host(value: impl Into<String>) -> Self {
        Self {
            kind: HasKind::Host,
            key: None,
            value: Some(value.into()),
        }
    }

    fn keyed(kind: HasKind, key: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            kind,
            key: Some(key.into()),
            value: value.map(str::to_string),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            HasKind::Host if self.value.is_none() => Err(ConfigError::MissingHostValue),
            HasKind::Host => Ok(()),
            kind if self.key.as_deref().map_or(true, str::is_empty) => {
                Err(ConfigError::MissingKey { kind })
            }
            _ => Ok(()),
        }
    }
}

/// A redirect rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub source: String,
    pub destination: String,
    /// 308 when true, 307 otherwise.
    #[serde(default)]
    pub permanent: bool,
    /// Explicit status overriding `permanent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has: Vec<RouteHas>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<RouteHas>,
}

impl RedirectRule {
    /// Create a temporary redirect rule.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            permanent: false,
            status_code: None,
            has: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// Mark the redirect permanent.
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Require a condition.
    pub fn with_has(mut self, has: RouteHas) -> Self {
        self.has.push(has);
        self
    }

    /// Require a condition to be absent.
    pub fn with_missing(mut self, missing: RouteHas) -> Self {
        self.missing.push(missing);
        self
    }

    /// Status code this redirect answers with.
    pub fn status(&self) -> u16 {
        match self.status_code {
            Some(code) => code,
            None if self.permanent => 308,
            None => 307,
        }
    }
}

/// A rewrite rule. Destinations may be internal paths or external URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub source: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has: Vec<RouteHas>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<RouteHas>,
}

impl RewriteRule {
    /// Create a rewrite rule.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            has: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// Require a condition.
    pub fn with_has(mut self, has: RouteHas) -> Self {
        self.has.push(has);
        self
    }

    /// Require a condition to be absent.
    pub fn with_missing(mut self, missing: RouteHas) -> Self {
        self.missing.push(missing);
        self
    }
}

/// A header name/value pair. Values may reference captured parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub key: String,
    pub value: String,
}

/// A rule adding response headers to every matching path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub source: String,
    pub headers: Vec<HeaderPair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has: Vec<RouteHas>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<RouteHas>,
}

impl HeaderRule {
    /// Create a header rule with no headers yet.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            headers: Vec::new(),
            has: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderPair {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Require a condition.
    pub fn with_has(mut self, has: RouteHas) -> Self {
        self.has.push(has);
        self
    }
}

/// Rewrite rules split by the phase they run in.
///
/// A plain list in configuration is treated as after-files rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RewritesInput")]
pub struct RewriteGroups {
    /// Checked before middleware and before static assets.
    pub before_files: Vec<RewriteRule>,
    /// Checked after static assets, before route matching.
    pub after_files: Vec<RewriteRule>,
    /// Checked only when no route matched.
    pub fallback: Vec<RewriteRule>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RewritesInput {
    List(Vec<RewriteRule>),
    Phased {
        #[serde(default, alias = "beforeFiles")]
        before_files: Vec<RewriteRule>,
        #[serde(default, alias = "afterFiles")]
        after_files: Vec<RewriteRule>,
        #[serde(default)]
        fallback: Vec<RewriteRule>,
    },
}

impl From<RewritesInput> for RewriteGroups {
    fn from(input: RewritesInput) -> Self {
        match input {
            RewritesInput::List(after_files) => Self {
                after_files,
                ..Default::default()
            },
            RewritesInput::Phased {
                before_files,
                after_files,
                fallback,
            } => Self {
                before_files,
                after_files,
                fallback,
            },
        }
    }
}

/// Mutation action policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerActionsConfig {
    /// Extra origins (host patterns, `*` wildcard) allowed to invoke actions.
    pub allowed_origins: Vec<String>,
    /// Maximum request body size in bytes.
    pub body_size_limit: u64,
}

impl Default for ServerActionsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            body_size_limit: DEFAULT_ACTION_BODY_LIMIT,
        }
    }
}

/// Middleware path allowlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Path sources the middleware runs for. Empty means every path.
    pub matcher: Vec<String>,
}

/// Engine configuration consumed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path prefix the application is mounted under (e.g. `/docs`).
    pub base_path: String,
    /// Whether canonical paths end with a slash.
    pub trailing_slash: bool,
    pub redirects: Vec<RedirectRule>,
    pub rewrites: RewriteGroups,
    pub headers: Vec<HeaderRule>,
    pub server_actions: ServerActionsConfig,
    /// Origins allowed to reach internal `/_edge/` paths in development.
    pub allowed_dev_origins: Vec<String>,
    /// Development mode: original errors reach view code.
    pub dev: bool,
    pub middleware: MiddlewareConfig,
    /// Hard timeout for external rewrite proxying.
    pub proxy_timeout_ms: u64,
    /// Cookie value that enables draft mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_mode_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            trailing_slash: false,
            redirects: Vec::new(),
            rewrites: RewriteGroups::default(),
            headers: Vec::new(),
            server_actions: ServerActionsConfig::default(),
            allowed_dev_origins: Vec::new(),
            dev: false,
            middleware: MiddlewareConfig::default(),
            proxy_timeout_ms: DEFAULT_PROXY_TIMEOUT_MS,
            draft_mode_secret: None,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source).context("failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(source: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(source).context("failed to parse JSON config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&source),
            _ => Self::from_toml_str(&source),
        }
        .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Set the base path.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the trailing-slash policy.
    pub fn with_trailing_slash(mut self, enabled: bool) -> Self {
        self.trailing_slash = enabled;
        self
    }

    /// Add a redirect rule.
    pub fn with_redirect(mut self, rule: RedirectRule) -> Self {
        self.redirects.push(rule);
        self
    }

    /// Add a before-files rewrite.
    pub fn with_before_rewrite(mut self, rule: RewriteRule) -> Self {
        self.rewrites.before_files.push(rule);
        self
    }

    /// Add an after-files rewrite.
    pub fn with_rewrite(mut self, rule: RewriteRule) -> Self {
        self.rewrites.after_files.push(rule);
        self
    }

    /// Add a fallback rewrite.
    pub fn with_fallback_rewrite(mut self, rule: RewriteRule) -> Self {
        self.rewrites.fallback.push(rule);
        self
    }

    /// Add a header rule.
    pub fn with_header_rule(mut self, rule: HeaderRule) -> Self {
        self.headers.push(rule);
        self
    }

    /// Allow an extra origin to invoke mutation actions.
    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.server_actions.allowed_origins.push(origin.into());
        self
    }

    /// Set the mutation action body limit.
    pub fn with_body_size_limit(mut self, bytes: u64) -> Self {
        self.server_actions.body_size_limit = bytes;
        self
    }

    /// Enable development mode.
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Restrict middleware to matching paths.
    pub fn with_middleware_matcher(mut self, source: impl Into<String>) -> Self {
        self.middleware.matcher.push(source.into());
        self
    }

    /// Set the external proxy timeout.
    pub fn with_proxy_timeout_ms(mut self, ms: u64) -> Self {
        self.proxy_timeout_ms = ms;
        self
    }

    /// Set the draft-mode cookie secret.
    pub fn with_draft_mode_secret(mut self, secret: impl Into<String>) -> Self {
        self.draft_mode_secret = Some(secret.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.is_empty()
            && (!self.base_path.starts_with('/') || self.base_path.ends_with('/'))
        {
            return Err(ConfigError::InvalidBasePath(self.base_path.clone()));
        }

        for rule in &self.redirects {
            check_source(&rule.source)?;
            if let Some(code) = rule.status_code {
                if !matches!(code, 301 | 302 | 303 | 307 | 308) {
                    return Err(ConfigError::InvalidRedirectStatus(code));
                }
            }
            check_conditions(&rule.has, &rule.missing)?;
        }

        let rewrites = self
            .rewrites
            .before_files
            .iter()
            .chain(&self.rewrites.after_files)
            .chain(&self.rewrites.fallback);
        for rule in rewrites {
            check_source(&rule.source)?;
            check_conditions(&rule.has, &rule.missing)?;
        }

        for rule in &self.headers {
            check_source(&rule.source)?;
            if rule.headers.is_empty() {
                return Err(ConfigError::EmptyHeaderRule(rule.source.clone()));
            }
            check_conditions(&rule.has, &rule.missing)?;
        }

        Ok(())
    }
}

fn check_source(source: &str) -> Result<(), ConfigError> {
    if source.starts_with('/') || source.starts_with('(') {
        Ok(())
    } else {
        Err(ConfigError::InvalidSource(source.to_string()))
    }
}

fn check_conditions(has: &[RouteHas], missing: &[RouteHas]) -> Result<(), ConfigError> {
    has.iter().chain(missing).try_for_each(RouteHas::validate)
}
