//! Streaming primitives for the edge routing engine.
//!
//! This crate provides:
//! - `Body` - Response body over a boxed byte stream
//! - `tee` - Fan-out of one stream to independent readers
//! - `StreamingSink` - Forwards a body into a platform sink with timing
//! - `Shell` - Document shell wrapping streamed markup

mod body;
mod shell;
mod sink;
mod tee;

pub use body::*;
pub use shell::*;
pub use sink::*;
pub use tee::*;
