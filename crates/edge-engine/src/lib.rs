//! Request handling and view composition for the edge routing engine.
//!
//! This crate provides:
//! - `Engine` / `EngineBuilder` - The per-request state machine
//! - `View` / `ViewRegistry` - Async views producing `Node` trees
//! - `compose` - Nesting of layouts, templates, boundaries and parallel slots
//! - `Renderer` - Shell rendering with deferred loading boundaries
//! - `Row` - The line-delimited payload protocol, plus its HTML rendition
//! - `ControlSignal` - Redirect, not-found, forbidden and unauthorized signals
//! - `Middleware`, `Action`, `RouteHandler`, `AssetHandler` - Runtime extension points
//! - `request`, `navigation`, `cache` - Request-scoped APIs for view code
//!
//! # Example
//!
//! ```ignore
//! use edge_core::EngineConfig;
//! use edge_engine::{Engine, Node, ViewRegistry};
//! use edge_router::{RouteDescriptor, RouteTable};
//!
//! let table = RouteTable::new()
//!     .with_route(RouteDescriptor::page("/shop/:id", "product")?.with_layout("root"));
//! let views = ViewRegistry::new()
//!     .with_static("root", Node::element("main").child(Node::Outlet))
//!     .with_fn("product", |props| async move {
//!         Ok(Node::text(format!("product {}", props.param("id").unwrap_or_default())))
//!     });
//!
//! let engine = Engine::builder(EngineConfig::default(), table).with_views(views).build()?;
//! let response = engine.handle(request).await;
//! ```

mod action;
mod assets;
mod compose;
mod cookies;
mod digest;
mod engine;
mod error;
mod handler;
mod markup;
mod payload;
mod prerender;
mod render;
mod scope;
mod signal;
mod view;

pub mod cache;
pub mod middleware;
pub mod navigation;
pub mod request;

pub use action::*;
pub use assets::*;
pub use compose::*;
pub use cookies::*;
pub use digest::*;
pub use engine::*;
pub use error::*;
pub use handler::*;
pub use markup::*;
pub use middleware::{FnMiddleware, Middleware, MiddlewareGate, MiddlewareOutcome, MiddlewareRequest};
pub use payload::*;
pub use prerender::*;
pub use render::*;
pub use scope::*;
pub use signal::*;
pub use view::*;
