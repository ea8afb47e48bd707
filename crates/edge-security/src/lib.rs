//! Origin checks and request limits for the edge routing engine.
//!
//! This crate provides:
//! - `OriginAllowlist` - Exact and wildcard host entries
//! - `CsrfGuard` - `Origin` versus `Host` check for mutation actions
//! - `DevOriginGuard` - Blocks cross-site access to development resources
//! - `read_limited` - Body size enforcement counted on the byte stream
//!
//! # Example
//!
//! ```ignore
//! use edge_security::{CsrfGuard, OriginAllowlist};
//!
//! let guard = CsrfGuard::new(OriginAllowlist::from_entries(&["*.example.com".into()]));
//! guard.check(request.headers())?;
//! ```

mod allowlist;
mod csrf;
mod dev;
mod limits;

pub use allowlist::*;
pub use csrf::*;
pub use dev::*;
pub use limits::*;
