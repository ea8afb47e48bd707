//! Mutation actions.
//!
//! A POST carrying the action header invokes a registered action with
//! JSON arguments. The action runs inside the request scope; its outcome is
//! returned as a payload row, never as an HTTP error.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use edge_observability::StructuredLogger;
use edge_rules::sanitize_destination;
use edge_security::read_limited;
use edge_streaming::Body;
use http::{HeaderMap, Method, Response, StatusCode};
use serde_json::Value;

use crate::digest::ErrorInfo;
use crate::error::EngineError;
use crate::payload::{ActionResult, PAYLOAD_CONTENT_TYPE};
use crate::signal::{ControlSignal, Failure, RedirectKind, ViewError};

/// Header naming the action to invoke.
pub const ACTION_HEADER: &str = "x-edge-action";
pub const ACTION_REDIRECT_HEADER: &str = "x-action-redirect";
pub const ACTION_REDIRECT_TYPE_HEADER: &str = "x-action-redirect-type";
pub const ACTION_REDIRECT_STATUS_HEADER: &str = "x-action-redirect-status";

#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ViewError>;
}

/// Adapts an async closure into an action.
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ViewError>> + Send,
{
    async fn call(&self, args: Value) -> Result<Value, ViewError> {
        (self.0)(args).await
    }
}

/// Actions by identifier.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, id: impl Into<String>, action: impl Action + 'static) -> Self {
        self.actions.insert(id.into(), Arc::new(action));
        self
    }

    pub fn with_fn<F, Fut>(self, id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ViewError>> + Send + 'static,
    {
        self.with_action(id, FnAction(f))
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.actions.keys().collect();
        ids.sort();
        f.debug_struct("ActionRegistry").field("actions", &ids).finish()
    }
}

/// The action identifier of a mutation request.
pub fn action_id(method: &Method, headers: &HeaderMap) -> Option<String> {
    if method != Method::POST {
        return None;
    }
    headers
        .get(ACTION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Read and decode action arguments. An empty body means `null`.
pub async fn decode_args(body: Body, limit: u64) -> Result<Value, EngineError> {
    let bytes = read_limited(body, limit).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|err| EngineError::InvalidActionBody(err.to_string()))
}

/// How an invoked action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Returned(Value),
    Redirect {
        destination: String,
        kind: RedirectKind,
        status: u16,
    },
    Failed(ErrorInfo),
}

impl ActionOutcome {
    /// Classify an action result, sanitizing failures.
    pub fn from_result(result: Result<Value, ViewError>, dev: bool, logger: &StructuredLogger) -> Self {
        let failure = match result {
            Ok(value) => return Self::Returned(value),
            Err(ViewError::Signal(ControlSignal::Redirect {
                destination,
                kind,
                status,
            })) => {
                return Self::Redirect {
                    destination: sanitize_destination(&destination),
                    kind,
                    status,
                };
            }
            Err(ViewError::Signal(signal)) => {
                logger.signal(signal.name(), "action");
                return Self::Failed(ErrorInfo {
                    message: signal.name().to_string(),
                    digest: signal.digest(),
                });
            }
            Err(ViewError::Failure(failure)) => failure,
            Err(bailout @ ViewError::StaticBailout { .. }) => Failure::new(bailout.to_string()),
        };

        let info = ErrorInfo::sanitize(&failure, dev);
        logger.failure("action", &failure.message, &info.digest);
        Self::Failed(info)
    }

    /// Result embedded in the root row, for outcomes that re-render.
    pub fn result(&self) -> Option<ActionResult> {
        match self {
            Self::Returned(value) => Some(ActionResult::Ok { value: value.clone() }),
            Self::Failed(error) => Some(ActionResult::Error { error: error.clone() }),
            Self::Redirect { .. } => None,
        }
    }
}

/// 200 response telling the client to navigate.
///
/// A real redirect status would be followed by the transport before client
/// navigation could interpret it.
pub fn redirect_response(destination: &str, kind: RedirectKind, status: u16) -> Result<Response<Body>, http::Error> {
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, PAYLOAD_CONTENT_TYPE)
        .header(ACTION_REDIRECT_HEADER, destination)
        .header(ACTION_REDIRECT_TYPE_HEADER, kind.as_str())
        .header(ACTION_REDIRECT_STATUS_HEADER, status.to_string())
        .body(Body::empty())
}
