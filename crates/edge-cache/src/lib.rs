//! Cache directive derivation for the edge routing engine.
//!
//! This crate provides:
//! - `SegmentConfig` - Route-declared `revalidate` and `dynamic` settings
//! - `CacheSignals` - Declared and observed inputs collected during a request
//! - `CacheDirective` / `CacheDecision` - The resulting `Cache-Control` policy
//! - `CacheHeadersBuilder` - Response headers, with optional debug explain headers
//!
//! # Example
//!
//! ```ignore
//! use edge_cache::{CacheSignals, DynamicMode, Revalidate};
//!
//! let decision = CacheSignals::new()
//!     .with_declared(Revalidate::Seconds(60))
//!     .with_mode(DynamicMode::ForceDynamic)
//!     .decide();
//!
//! assert_eq!(decision.directive.cache_control(), "private, no-cache, no-store, max-age=0, must-revalidate");
//! ```

mod headers;
mod policy;

pub use headers::*;
pub use policy::*;
