//! `has` / `missing` conditions.

use edge_core::{HasKind, RequestContext, RouteHas};
use regex::Regex;

use crate::source::{bounded_regex, Captures};

#[derive(Debug, Clone)]
enum ValueMatcher {
    Regex(Regex),
    Exact(String),
}

/// A compiled `has` or `missing` condition.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    kind: HasKind,
    key: Option<String>,
    value: Option<ValueMatcher>,
}

impl CompiledCondition {
    /// Compile a condition. Values that are not valid bounded regular
    /// expressions fall back to exact comparison.
    pub fn new(has: &RouteHas) -> Self {
        let value = has.value.as_ref().map(|value| {
            match bounded_regex(&format!("^(?:{})$", value)) {
                Ok(regex) => ValueMatcher::Regex(regex),
                Err(_) => ValueMatcher::Exact(value.clone()),
            }
        });
        Self {
            kind: has.kind,
            key: has.key.clone(),
            value,
        }
    }

    fn lookup<'a>(&self, ctx: &'a RequestContext) -> Option<&'a str> {
        let key = self.key.as_deref().unwrap_or_default();
        match self.kind {
            HasKind::Header => ctx.header(key),
            HasKind::Cookie => ctx.cookie(key),
            HasKind::Query => ctx.query_param(key),
            HasKind::Host => Some(ctx.host.as_str()),
        }
    }

    /// Evaluate against the request, adding any captured values.
    ///
    /// Named groups of a value pattern are captured by name. Keyed conditions
    /// also capture the whole value under the key with non-alphanumeric
    /// characters removed (`x-user-id` becomes `xuserid`).
    pub fn evaluate(&self, ctx: &RequestContext, captures: &mut Captures) -> bool {
        let Some(actual) = self.lookup(ctx) else {
            return false;
        };

        let matched = match &self.value {
            None => true,
            Some(ValueMatcher::Exact(expected)) => actual == expected,
            Some(ValueMatcher::Regex(regex)) => match regex.captures(actual) {
                Some(caps) => {
                    for name in regex.capture_names().flatten() {
                        if let Some(m) = caps.name(name) {
                            captures.insert(name.to_string(), m.as_str().to_string());
                        }
                    }
                    true
                }
                None => false,
            },
        };

        if matched && self.kind != HasKind::Host {
            if let Some(key) = &self.key {
                let name: String = key.chars().filter(char::is_ascii_alphanumeric).collect();
                if !name.is_empty() {
                    captures.insert(name, actual.to_string());
                }
            }
        }

        matched
    }
}

/// Compiled `has` and `missing` lists of one rule.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    has: Vec<CompiledCondition>,
    missing: Vec<CompiledCondition>,
}

impl Conditions {
    /// Compile both lists.
    pub fn new(has: &[RouteHas], missing: &[RouteHas]) -> Self {
        Self {
            has: has.iter().map(CompiledCondition::new).collect(),
            missing: missing.iter().map(CompiledCondition::new).collect(),
        }
    }

    /// True when every `has` holds and no `missing` holds. Values captured by
    /// `has` conditions are added to `captures`.
    pub fn check(&self, ctx: &RequestContext, captures: &mut Captures) -> bool {
        let mut found = Captures::new();
        if !self.has.iter().all(|c| c.evaluate(ctx, &mut found)) {
            return false;
        }
        let mut ignored = Captures::new();
        if self.missing.iter().any(|c| c.evaluate(ctx, &mut ignored)) {
            return false;
        }
        captures.extend(found);
        true
    }
}
