//! Outbound transport for external rewrites.
//!
//! Requests go straight through the wasi-http outgoing handler so the
//! proxy deadline can be handed to the host as request options. The
//! component has no timer of its own, so the host's connect, first-byte and
//! between-bytes timeouts are what turn a stalled upstream into a 504.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use edge_sdk::edge_proxy::{ProxyError, Transport};
use edge_sdk::edge_streaming::Body;
use http::{Request, Response};
use wasi::http::outgoing_handler;
use wasi::http::types::{
    ErrorCode, Fields, IncomingResponse, Method, OutgoingBody, OutgoingRequest, RequestOptions, Scheme,
};
use wasi::io::streams::StreamError;

/// Largest slice `blocking-write-and-flush` accepts in one call.
const WRITE_CHUNK: usize = 4096;
const READ_CHUNK: u64 = 16 * 1024;

/// Sends proxied requests through the host's outbound HTTP.
///
/// The destination host must be listed in the component's
/// `allowed_outbound_hosts`.
pub struct SpinTransport;

#[async_trait]
impl Transport for SpinTransport {
    async fn send(&self, request: Request<Body>, deadline: Duration) -> Result<Response<Body>, ProxyError> {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|err| ProxyError::Upstream(err.to_string()))?;

        let outgoing = outgoing_request(&parts)?;
        write_body(&outgoing, &body)?;

        let future = outgoing_handler::handle(outgoing, Some(request_options(deadline)?))
            .map_err(|code| map_error(code, deadline))?;
        future.subscribe().block();
        let incoming = match future.get() {
            Some(Ok(Ok(response))) => response,
            Some(Ok(Err(code))) => return Err(map_error(code, deadline)),
            Some(Err(())) | None => return Err(ProxyError::Upstream("response already taken".into())),
        };

        read_response(incoming, started, deadline)
    }
}

/// Host timeouts for one request, all bounded by `deadline`.
fn request_options(deadline: Duration) -> Result<RequestOptions, ProxyError> {
    let options = RequestOptions::new();
    let nanos = Some(deadline.as_nanos().min(u64::MAX as u128) as u64);
    options
        .set_connect_timeout(nanos)
        .and_then(|_| options.set_first_byte_timeout(nanos))
        .and_then(|_| options.set_between_bytes_timeout(nanos))
        .map_err(|_| ProxyError::Upstream("host rejected request timeouts".into()))?;
    Ok(options)
}

fn outgoing_request(parts: &http::request::Parts) -> Result<OutgoingRequest, ProxyError> {
    let header_list: Vec<(String, Vec<u8>)> = parts
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
        .collect();
    let headers = Fields::from_list(&header_list)
        .map_err(|err| ProxyError::InvalidDestination(format!("headers rejected: {:?}", err)))?;

    let request = OutgoingRequest::new(headers);
    let invalid = |what: &str| ProxyError::InvalidDestination(format!("{} rejected by host", what));
    request.set_method(&method(&parts.method)).map_err(|_| invalid("method"))?;

    let scheme = match parts.uri.scheme_str() {
        Some("http") => Scheme::Http,
        Some("https") => Scheme::Https,
        other => return Err(ProxyError::InvalidDestination(format!("unsupported scheme {:?}", other))),
    };
    request.set_scheme(Some(&scheme)).map_err(|_| invalid("scheme"))?;
    request
        .set_authority(parts.uri.authority().map(|a| a.as_str()))
        .map_err(|_| invalid("authority"))?;
    request
        .set_path_with_query(parts.uri.path_and_query().map(|pq| pq.as_str()))
        .map_err(|_| invalid("path"))?;
    Ok(request)
}

fn method(method: &http::Method) -> Method {
    match *method {
        http::Method::GET => Method::Get,
        http::Method::HEAD => Method::Head,
        http::Method::POST => Method::Post,
        http::Method::PUT => Method::Put,
        http::Method::DELETE => Method::Delete,
        http::Method::CONNECT => Method::Connect,
        http::Method::OPTIONS => Method::Options,
        http::Method::TRACE => Method::Trace,
        http::Method::PATCH => Method::Patch,
        ref other => Method::Other(other.as_str().to_string()),
    }
}

fn write_body(request: &OutgoingRequest, bytes: &[u8]) -> Result<(), ProxyError> {
    let body = request
        .body()
        .map_err(|_| ProxyError::Upstream("request body already taken".into()))?;
    {
        let stream = body
            .write()
            .map_err(|_| ProxyError::Upstream("request body stream unavailable".into()))?;
        for chunk in bytes.chunks(WRITE_CHUNK) {
            stream
                .blocking_write_and_flush(chunk)
                .map_err(|err| ProxyError::Connect(format!("request body write failed: {:?}", err)))?;
        }
    }
    OutgoingBody::finish(body, None).map_err(|code| ProxyError::Upstream(format!("{:?}", code)))
}

fn read_response(incoming: IncomingResponse, started: Instant, deadline: Duration) -> Result<Response<Body>, ProxyError> {
    let mut builder = Response::builder().status(incoming.status());
    for (name, value) in incoming.headers().entries() {
        builder = builder.header(name, value);
    }

    let body = incoming
        .consume()
        .map_err(|_| ProxyError::Upstream("response body already taken".into()))?;
    let mut buf = Vec::new();
    {
        let stream = body
            .stream()
            .map_err(|_| ProxyError::Upstream("response body stream unavailable".into()))?;
        loop {
            if started.elapsed() > deadline {
                return Err(ProxyError::Timeout(deadline));
            }
            match stream.blocking_read(READ_CHUNK) {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(StreamError::Closed) => break,
                Err(StreamError::LastOperationFailed(err)) => {
                    return Err(ProxyError::Upstream(err.to_debug_string()))
                }
            }
        }
    }
    drop(body);

    builder
        .body(Body::from(buf))
        .map_err(|err| ProxyError::Upstream(err.to_string()))
}

fn map_error(code: ErrorCode, deadline: Duration) -> ProxyError {
    match code {
        ErrorCode::DnsTimeout
        | ErrorCode::ConnectionTimeout
        | ErrorCode::ConnectionReadTimeout
        | ErrorCode::ConnectionWriteTimeout
        | ErrorCode::HttpResponseTimeout => ProxyError::Timeout(deadline),
        ErrorCode::ConnectionRefused
        | ErrorCode::ConnectionTerminated
        | ErrorCode::DestinationNotFound
        | ErrorCode::DestinationUnavailable => ProxyError::Connect(format!("{:?}", code)),
        other => ProxyError::Upstream(format!("{:?}", other)),
    }
}
