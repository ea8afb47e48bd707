//! External rewrite proxy.
//!
//! This crate provides:
//! - `Transport` - Outbound HTTP seam implemented by the runtime
//! - `ProxyClient` - Forwards a request with a hard timeout
//! - `strip_request_headers` / `strip_response_headers` - Credential and hop-by-hop filtering
//! - `ProxyError` - Timeout (504) versus any other failure (502)

mod client;
mod headers;

pub use client::*;
pub use headers::*;
