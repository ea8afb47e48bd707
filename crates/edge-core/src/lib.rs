//! Core request and configuration types for the edge routing engine.
//!
//! This crate provides the fundamental types shared by every layer:
//! - `RequestId` - Request correlation identifier
//! - `RequestContext` - Immutable per-request view used by rule evaluation
//! - `QueryParams` / `Cookies` - Parsed query string and cookie jar
//! - `EngineConfig` - Redirect, rewrite, header and action configuration
//! - `TimingContext` - Request lifecycle timing

mod config;
mod context;
mod lifecycle;

pub use config::*;
pub use context::*;
pub use lifecycle::*;
