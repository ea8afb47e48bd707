//! Observability for the edge routing engine.
//!
//! This crate provides:
//! - `StructuredLogger` - Request-scoped structured entries emitted through `tracing`
//! - `LogBuilder` - Fluent typed fields for a single entry
//! - `MetricsCollector` - Per-phase durations and final status of a request

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;

// Re-export RequestId and TimingContext from edge-core for convenience
pub use edge_core::{RequestId, TimingContext};
