//! Cache signals and directive precedence.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One year, used for responses that never revalidate.
pub const STATIC_MAX_AGE: u64 = 31_536_000;

/// Explicit rendering mode declared by a route segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DynamicMode {
    /// Decide from observed request-state reads.
    #[default]
    Auto,
    /// Always render per request.
    ForceDynamic,
    /// Render as static; request-state reads return empty defaults.
    ForceStatic,
    /// Render as static; request-state reads are a hard failure.
    Error,
}

/// Declared revalidation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidate {
    /// Cache indefinitely (`revalidate: false`).
    Never,
    /// Revalidate after this many seconds. Zero means always dynamic.
    Seconds(u64),
}

impl Revalidate {
    /// The shorter of two periods.
    pub fn min(self, other: Revalidate) -> Revalidate {
        match (self, other) {
            (Self::Never, other) => other,
            (this, Self::Never) => this,
            (Self::Seconds(a), Self::Seconds(b)) => Self::Seconds(a.min(b)),
        }
    }
}

impl Serialize for Revalidate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Never => serializer.serialize_bool(false),
            Self::Seconds(secs) => serializer.serialize_u64(*secs),
        }
    }
}

impl<'de> Deserialize<'de> for Revalidate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Seconds(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => Ok(Self::Never),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "revalidate must be false or a number of seconds",
            )),
            Raw::Seconds(secs) => Ok(Self::Seconds(secs)),
        }
    }
}

/// Route segment configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Declared revalidation period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<Revalidate>,
    /// Declared rendering mode.
    pub dynamic: DynamicMode,
}

impl SegmentConfig {
    /// Set the declared revalidation period.
    pub fn with_revalidate(mut self, revalidate: Revalidate) -> Self {
        self.revalidate = Some(revalidate);
        self
    }

    /// Set the rendering mode.
    pub fn with_dynamic(mut self, dynamic: DynamicMode) -> Self {
        self.dynamic = dynamic;
        self
    }
}

/// Resulting caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "seconds")]
pub enum CacheDirective {
    /// Never cache.
    NoStore,
    /// Shared caches may serve it for N seconds, then revalidate.
    Revalidate(u64),
    /// Fully static.
    Static,
}

impl CacheDirective {
    /// `Cache-Control` header value.
    pub fn cache_control(&self) -> String {
        match self {
            Self::NoStore => "private, no-cache, no-store, max-age=0, must-revalidate".to_string(),
            Self::Revalidate(secs) => format!("s-maxage={}, stale-while-revalidate", secs),
            Self::Static => format!("s-maxage={}, stale-while-revalidate", STATIC_MAX_AGE),
        }
    }

    /// Whether any cache may store the response.
    pub fn allows_caching(&self) -> bool {
        !matches!(self, Self::NoStore)
    }
}

/// Why a directive was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheReason {
    ForceDynamic,
    DynamicUsage,
    DraftMode,
    ForceStatic,
    Revalidate,
    Default,
}

impl fmt::Display for CacheReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ForceDynamic => "force-dynamic",
            Self::DynamicUsage => "dynamic-usage",
            Self::DraftMode => "draft-mode",
            Self::ForceStatic => "force-static",
            Self::Revalidate => "revalidate",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

/// A directive together with the signal that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDecision {
    pub directive: CacheDirective,
    pub reason: CacheReason,
}

/// Signals collected while handling a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSignals {
    /// Period declared by the route segment.
    pub declared: Option<Revalidate>,
    /// Shortest period requested by view code during render.
    pub render: Option<Revalidate>,
    /// Per-request state was read while rendering.
    pub dynamic_used: bool,
    /// Draft mode was active.
    pub draft_mode: bool,
    /// Declared rendering mode.
    pub mode: DynamicMode,
}

impl CacheSignals {
    /// Create empty signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a route segment configuration.
    pub fn from_segment(config: &SegmentConfig) -> Self {
        Self {
            declared: config.revalidate,
            mode: config.dynamic,
            ..Default::default()
        }
    }

    /// Set the declared period.
    pub fn with_declared(mut self, revalidate: Revalidate) -> Self {
        self.declared = Some(revalidate);
        self
    }

    /// Set the rendering mode.
    pub fn with_mode(mut self, mode: DynamicMode) -> Self {
        self.mode = mode;
        self
    }

    /// Record that per-request state was read.
    pub fn with_dynamic_used(mut self, used: bool) -> Self {
        self.dynamic_used = used;
        self
    }

    /// Lower the render-time period.
    pub fn lower_render(&mut self, revalidate: Revalidate) {
        self.render = Some(match self.render {
            Some(current) => current.min(revalidate),
            None => revalidate,
        });
    }

    /// Apply precedence: force-dynamic, dynamic usage, force-static/error,
    /// explicit revalidation, default.
    pub fn decide(&self) -> CacheDecision {
        if self.mode == DynamicMode::ForceDynamic {
            return decision(CacheDirective::NoStore, CacheReason::ForceDynamic);
        }
        if self.dynamic_used {
            return decision(CacheDirective::NoStore, CacheReason::DynamicUsage);
        }
        if self.draft_mode {
            return decision(CacheDirective::NoStore, CacheReason::DraftMode);
        }

        let effective = match (self.declared, self.render) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        if matches!(self.mode, DynamicMode::ForceStatic | DynamicMode::Error) {
            let directive = match effective {
                Some(Revalidate::Seconds(secs)) if secs > 0 => CacheDirective::Revalidate(secs),
                _ => CacheDirective::Static,
            };
            return decision(directive, CacheReason::ForceStatic);
        }

        match effective {
            Some(Revalidate::Seconds(0)) => decision(CacheDirective::NoStore, CacheReason::Revalidate),
            Some(Revalidate::Seconds(secs)) => {
                decision(CacheDirective::Revalidate(secs), CacheReason::Revalidate)
            }
            Some(Revalidate::Never) => decision(CacheDirective::Static, CacheReason::Revalidate),
            None => decision(CacheDirective::Static, CacheReason::Default),
        }
    }
}

fn decision(directive: CacheDirective, reason: CacheReason) -> CacheDecision {
    CacheDecision { directive, reason }
}
