//! Route table and path matching for the edge routing engine.
//!
//! The route table is produced ahead of time by route discovery and is
//! read-only at request time:
//!
//! ```text
//! routes.json
//! ├── "/"                  -> layouts [root]        page home
//! ├── "/blog/:slug"        -> layouts [root, blog]  page post
//! ├── "/docs/:path+"       -> layouts [root, docs]  page doc
//! └── "/api/items"         -> layouts [root]        handler items
//! ```
//!
//! This crate provides:
//! - `RouteTable` / `RouteDescriptor` - Validated route records with slots and intercepts
//! - `PatternToken` - Literal, `:param`, `:rest+` and `:rest*` segments
//! - `normalize_pathname` - Single decoding, dot-segment resolution, slash collapsing
//!
//! Matching tries routes in table order and returns the first match; more
//! specific patterns must precede catch-alls.

mod descriptor;
mod path;
mod pattern;

pub use descriptor::*;
pub use path::*;
pub use pattern::*;
