//! Engine error types.

use edge_core::ConfigError;
use edge_proxy::ProxyError;
use edge_router::{PathError, RouteTableError};
use edge_security::{CsrfError, LimitsError};
use edge_streaming::BodyError;
use http::StatusCode;

/// Errors that end a request outside view-level boundaries.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("malformed request path: {0}")]
    MalformedPath(#[from] PathError),

    #[error(transparent)]
    Limits(#[from] LimitsError),

    #[error("request body failed: {0}")]
    Body(#[from] BodyError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("external rewrite to {0} but no proxy transport is configured")]
    NoProxy(String),

    #[error("action request rejected: {0}")]
    Csrf(#[from] CsrfError),

    #[error("cross-origin request to a development resource")]
    DevOriginBlocked,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid action arguments: {0}")]
    InvalidActionBody(String),

    #[error("{api}() read request state in a route declared `dynamic = \"error\"`")]
    StaticBailout { api: String },

    #[error("unhandled render error (digest {digest})")]
    Render { message: String, digest: String },

    #[error("middleware failed: {0}")]
    Middleware(String),

    #[error("view not registered: {0}")]
    MissingView(String),

    #[error("route handler not registered: {0}")]
    MissingHandler(String),

    #[error("invalid route table: {0}")]
    RouteTable(#[from] RouteTableError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build response: {0}")]
    Http(#[from] http::Error),
}

impl EngineError {
    /// Status returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedPath(_) | Self::Body(_) | Self::InvalidActionBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Limits(LimitsError::RequestSizeExceeded { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Limits(LimitsError::Body(_)) => StatusCode::BAD_REQUEST,
            Self::Proxy(err) => err.status(),
            Self::NoProxy(_) => StatusCode::BAD_GATEWAY,
            Self::Csrf(_) | Self::DevOriginBlocked => StatusCode::FORBIDDEN,
            Self::UnknownAction(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_protocol_error_statuses() {
        assert_eq!(
            EngineError::from(PathError::MalformedEncoding("%zz".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::from(LimitsError::RequestSizeExceeded { used: 11, limit: 10 }).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            EngineError::from(ProxyError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            EngineError::from(ProxyError::Connect("refused".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(EngineError::DevOriginBlocked.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            EngineError::StaticBailout { api: "headers".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
