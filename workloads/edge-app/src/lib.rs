//! Storefront workload serving the edge routing engine on Spin.
//!
//! This workload shows:
//! - Route table and engine configuration loaded from bundled files
//! - Layouts, a loading boundary and an intercepted photo modal
//! - Middleware gating `/account`, a mutation action and a route handler
//! - External rewrites proxied through outbound HTTP with host-enforced timeouts
//! - Streaming the engine's response body through `StreamingSink`

mod transport;
mod views;

use std::sync::{Arc, Once, OnceLock};

use bytes::Bytes;
use futures::StreamExt;
use spin_sdk::http::{Fields, IncomingRequest, Method as SpinMethod, OutgoingResponse, ResponseOutparam};
use spin_sdk::http_component;
use tracing_subscriber::EnvFilter;

use edge_sdk::edge_core::{EngineConfig, TimingContext};
use edge_sdk::edge_engine::middleware::redirect;
use edge_sdk::edge_engine::{Engine, FnHandler, FnMiddleware, HandlerRequest, MiddlewareRequest, ViewError};
use edge_sdk::edge_router::RouteTable;
use edge_sdk::edge_streaming::{Body, BodyError, HeadContent, Shell, StreamingSink};

use transport::SpinTransport;

const CONFIG: &str = include_str!("../edge.toml");
const ROUTES: &str = include_str!("../routes.json");

static ENGINE: OnceLock<Engine> = OnceLock::new();

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Spin forwards component stderr to its log files.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

fn build_engine() -> anyhow::Result<Engine> {
    let config = EngineConfig::from_toml_str(CONFIG)?;
    let table = RouteTable::from_json(ROUTES)?;
    let engine = Engine::builder(config, table)
        .with_views(views::registry())
        .with_actions(views::actions())
        .with_handler("health", FnHandler(health))
        .with_middleware(FnMiddleware(require_session))
        .with_proxy_transport(Arc::new(SpinTransport))
        .with_shell(Shell::new(HeadContent::new("Edge Storefront")).with_lang("en-US"))
        .build()?;
    Ok(engine)
}

fn engine() -> anyhow::Result<&'static Engine> {
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }
    let engine = build_engine()?;
    Ok(ENGINE.get_or_init(|| engine))
}

async fn health(_request: HandlerRequest) -> Result<http::Response<Body>, ViewError> {
    http::Response::builder()
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({ "status": "ok" }).to_string()))
        .map_err(|err| ViewError::failure(err.to_string()))
}

/// Send visitors without a session to the sign-in prompt.
async fn require_session(request: MiddlewareRequest) -> anyhow::Result<http::Response<Body>> {
    if request.context.cookie("session").is_some() {
        return Ok(edge_sdk::edge_engine::middleware::next());
    }
    redirect("/?signin=1", http::StatusCode::TEMPORARY_REDIRECT)
}

fn method(method: &SpinMethod) -> http::Method {
    match method {
        SpinMethod::Get => http::Method::GET,
        SpinMethod::Head => http::Method::HEAD,
        SpinMethod::Post => http::Method::POST,
        SpinMethod::Put => http::Method::PUT,
        SpinMethod::Delete => http::Method::DELETE,
        SpinMethod::Connect => http::Method::CONNECT,
        SpinMethod::Options => http::Method::OPTIONS,
        SpinMethod::Trace => http::Method::TRACE,
        SpinMethod::Patch => http::Method::PATCH,
        SpinMethod::Other(other) => http::Method::from_bytes(other.as_bytes()).unwrap_or(http::Method::GET),
    }
}

fn into_request(req: IncomingRequest) -> anyhow::Result<http::Request<Body>> {
    let mut builder = http::Request::builder()
        .method(method(&req.method()))
        .uri(req.path_with_query().unwrap_or_else(|| "/".to_string()));
    for (name, value) in req.headers().entries() {
        builder = builder.header(name, value);
    }
    // Read lazily so the engine's body limit stops the read itself.
    let body = req.into_body_stream().map(|chunk| {
        chunk
            .map(Bytes::from)
            .map_err(|err| BodyError::Stream(format!("{:?}", err)))
    });
    Ok(builder.body(Body::from_stream(body))?)
}

fn plain(status: http::StatusCode, message: &'static str) -> http::Response<Body> {
    let mut response = http::Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

async fn respond(response: http::Response<Body>, response_out: ResponseOutparam, timing: TimingContext) {
    let (parts, body) = response.into_parts();
    let header_list: Vec<(String, Vec<u8>)> = parts
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
        .collect();
    let headers = match Fields::from_list(&header_list) {
        Ok(headers) => headers,
        Err(err) => {
            tracing::error!(error = ?err, "response headers rejected by the host");
            Fields::new()
        }
    };

    let outgoing = OutgoingResponse::new(headers);
    if outgoing.set_status_code(parts.status.as_u16()).is_err() {
        tracing::error!(status = parts.status.as_u16(), "invalid response status");
    }
    let sink_body = outgoing.take_body();
    response_out.set(outgoing);

    let mut sink = StreamingSink::new(sink_body, timing);
    match sink.forward(body).await {
        Ok(stats) => tracing::debug!(
            bytes = stats.bytes,
            chunks = stats.chunks,
            first_byte_ms = stats.first_byte.map(|d| d.as_millis() as u64),
            "response streamed"
        ),
        Err(err) => tracing::warn!(error = %err, "response stream aborted"),
    }
}

/// Main HTTP handler.
#[http_component]
async fn handle(req: IncomingRequest, response_out: ResponseOutparam) {
    init_tracing();
    let timing = TimingContext::new();

    let engine = match engine() {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "engine failed to start");
            let response = plain(http::StatusCode::INTERNAL_SERVER_ERROR, "engine unavailable");
            respond(response, response_out, timing).await;
            return;
        }
    };

    let response = match into_request(req) {
        Ok(request) => engine.handle(request).await,
        Err(err) => {
            tracing::warn!(error = %format!("{:#}", err), "malformed request");
            plain(http::StatusCode::BAD_REQUEST, "bad request")
        }
    };
    respond(response, response_out, timing).await;
}
