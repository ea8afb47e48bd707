//! Route handlers: routes answering with a response instead of a view tree.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use edge_core::QueryParams;
use edge_observability::StructuredLogger;
use edge_router::Params;
use edge_rules::sanitize_destination;
use edge_streaming::Body;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Method, Response, StatusCode};

use crate::digest::ErrorInfo;
use crate::signal::{ControlSignal, Failure, ViewError};

/// Request passed to a route handler.
#[derive(Debug)]
pub struct HandlerRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub pathname: String,
    pub params: Params,
    pub query: QueryParams,
    pub body: Body,
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: HandlerRequest) -> Result<Response<Body>, ViewError>;
}

/// Adapts an async closure into a route handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(HandlerRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Body>, ViewError>> + Send,
{
    async fn handle(&self, request: HandlerRequest) -> Result<Response<Body>, ViewError> {
        (self.0)(request).await
    }
}

/// Route handlers by name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RouteHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: impl RouteHandler + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn with_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Body>, ViewError>> + Send + 'static,
    {
        self.with_handler(name, FnHandler(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RouteHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

/// Turn a handler's signal or failure into a response.
pub fn handler_error_response(
    err: ViewError,
    dev: bool,
    logger: &StructuredLogger,
) -> Result<Response<Body>, http::Error> {
    let failure = match err {
        ViewError::Signal(signal) => {
            logger
                .debug_builder("route handler signal")
                .field("signal", signal.name())
                .emit();
            let builder = Response::builder().status(signal.status());
            return match signal {
                ControlSignal::Redirect { destination, .. } => builder
                    .header(LOCATION, sanitize_destination(&destination))
                    .body(Body::empty()),
                other => builder
                    .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body(Body::from(other.name())),
            };
        }
        ViewError::Failure(failure) => failure,
        bailout @ ViewError::StaticBailout { .. } => Failure::new(bailout.to_string()),
    };

    let info = ErrorInfo::sanitize(&failure, dev);
    logger.failure("route handler", &failure.message, &info.digest);
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(format!("{} (digest {})", info.message, info.digest)))
}
