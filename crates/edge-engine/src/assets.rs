//! Reserved asset paths.
//!
//! `/_edge/image?url=` passes through to a same-origin asset and
//! `/_edge/static/*` serves build output. Both are delegated to an
//! `AssetHandler` supplied by the runtime.

use async_trait::async_trait;
use edge_core::QueryParams;
use edge_rules::{is_external, sanitize_destination};
use edge_streaming::Body;
use http::header::{CONTENT_TYPE, LOCATION};
use http::request::Parts;
use http::{Response, StatusCode};

pub const IMAGE_PATH: &str = "/_edge/image";
pub const STATIC_PREFIX: &str = "/_edge/static/";

#[async_trait]
pub trait AssetHandler: Send + Sync {
    /// Serve the asset at `path`, or `None` if there is none.
    async fn serve(&self, path: &str, parts: &Parts) -> Option<Response<Body>>;
}

/// Whether the pathname is a reserved asset path.
pub fn is_asset_path(pathname: &str) -> bool {
    pathname == IMAGE_PATH || pathname.starts_with(STATIC_PREFIX)
}

fn plain(status: StatusCode, message: &'static str) -> Result<Response<Body>, http::Error> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message))
}

/// Answer a reserved asset path. Returns `None` for other paths.
pub async fn serve_asset(
    pathname: &str,
    query: &QueryParams,
    parts: &Parts,
    handler: Option<&dyn AssetHandler>,
) -> Option<Result<Response<Body>, http::Error>> {
    if pathname == IMAGE_PATH {
        let url = match query.get("url") {
            Some(url) if !url.is_empty() && !is_external(url) => sanitize_destination(url),
            _ => return Some(plain(StatusCode::BAD_REQUEST, "\"url\" must be a same-origin path")),
        };
        tracing::debug!(url = %url, "image passthrough");
        return Some(match handler {
            Some(handler) => match handler.serve(&url, parts).await {
                Some(response) => Ok(response),
                None => plain(StatusCode::NOT_FOUND, "not found"),
            },
            None => Response::builder()
                .status(StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, url)
                .body(Body::empty()),
        });
    }

    if pathname.starts_with(STATIC_PREFIX) {
        let served = match handler {
            Some(handler) => handler.serve(pathname, parts).await,
            None => None,
        };
        return Some(match served {
            Some(response) => Ok(response),
            None => plain(StatusCode::NOT_FOUND, "not found"),
        });
    }

    None
}
