//! Redirect, rewrite and header rules for the edge routing engine.
//!
//! This crate provides:
//! - `RuleSource` - Compiled rule sources (`:name`, `:name*`, `:name+`, inline groups)
//! - `CompiledCondition` - `has` / `missing` predicates over headers, cookies, query and host
//! - `interpolate_destination` / `sanitize_destination` - Destination templating
//! - `RuleEngine` - First-match redirects and rewrites, accumulated header rules
//! - `PathMatcher` - Source-syntax allowlist used by the middleware gate
//!
//! Every regular expression is compiled with bounded size and nesting; a
//! source that fails to compile within those bounds is skipped with a warning.

mod condition;
mod destination;
mod engine;
mod source;

pub use condition::*;
pub use destination::*;
pub use engine::*;
pub use source::*;
