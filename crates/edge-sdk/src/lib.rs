//! Public SDK for the edge routing engine.
//!
//! This crate re-exports all platform functionality:
//!
//! ```ignore
//! use edge_sdk::prelude::*;
//!
//! let table = RouteTable::new()
//!     .with_route(RouteDescriptor::page("/", "home")?.with_layout("root"))
//!     .with_not_found("not-found");
//!
//! let views = ViewRegistry::new()
//!     .with_static("root", Node::element("main").child(Node::Outlet))
//!     .with_static("home", Node::text("Hello from the edge"))
//!     .with_static("not-found", Node::text("Nothing here"));
//!
//! let engine = Engine::builder(EngineConfig::from_toml_str(CONFIG)?, table)
//!     .with_views(views)
//!     .build()?;
//!
//! let response = engine.handle(request).await;
//! sink.forward(response.into_body()).await?;
//! ```

pub use edge_cache;
pub use edge_core;
pub use edge_engine;
pub use edge_observability;
pub use edge_proxy;
pub use edge_router;
pub use edge_rules;
pub use edge_security;
pub use edge_streaming;

/// Prelude for convenient imports.
pub mod prelude {
    pub use edge_cache::{DynamicMode, Revalidate, SegmentConfig};
    pub use edge_core::{EngineConfig, RequestContext, RequestId, TimingContext};
    pub use edge_engine::middleware::{next, rewrite};
    pub use edge_engine::{
        cache, navigation, not_found, forbidden, permanent_redirect, redirect, request, unauthorized, Action,
        ActionRegistry, AssetHandler, Engine, EngineBuilder, EngineError, FnMiddleware, HandlerRegistry,
        HandlerRequest, Middleware, MiddlewareRequest, Node, RouteHandler, SetCookie, View, ViewError, ViewProps,
        ViewRegistry,
    };
    pub use edge_observability::{MetricsCollector, StructuredLogger};
    pub use edge_proxy::{ProxyError, Transport};
    pub use edge_router::{InterceptConvention, InterceptEntry, ParallelSlot, Params, RouteDescriptor, RouteTable};
    pub use edge_streaming::{Body, HeadContent, Shell, StreamingSink};
}
