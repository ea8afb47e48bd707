//! Middleware gate.
//!
//! One optional middleware runs before route matching when the pathname
//! passes the configured matcher. Its response is classified by status and
//! by reserved `x-middleware-*` headers, which are directives for the
//! engine and never reach the client.

use std::sync::Arc;

use async_trait::async_trait;
use edge_core::{Cookies, RequestContext};
use edge_proxy::INTERNAL_HEADER_PREFIX;
use edge_rules::PathMatcher;
use edge_streaming::Body;
use http::header::{HeaderName, HeaderValue, COOKIE, LOCATION};
use http::{HeaderMap, Response, StatusCode};

use crate::error::EngineError;

/// Continue routing, merging the response headers.
pub const MIDDLEWARE_NEXT_HEADER: &str = "x-middleware-next";
/// Continue routing against another path.
pub const MIDDLEWARE_REWRITE_HEADER: &str = "x-middleware-rewrite";
/// Prefix of headers overriding request headers for the rest of the request.
pub const MIDDLEWARE_REQUEST_HEADER_PREFIX: &str = "x-middleware-request-";

/// Request seen by middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareRequest {
    /// Normalized pathname with the base path removed.
    pub pathname: String,
    pub context: RequestContext,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, request: MiddlewareRequest) -> anyhow::Result<Response<Body>>;
}

/// Middleware backed by an async closure.
pub struct FnMiddleware<F>(pub F);

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(MiddlewareRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Response<Body>>> + Send,
{
    async fn call(&self, request: MiddlewareRequest) -> anyhow::Result<Response<Body>> {
        (self.0)(request).await
    }
}

/// Response continuing to routing.
pub fn next() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    response
        .headers_mut()
        .insert(MIDDLEWARE_NEXT_HEADER, HeaderValue::from_static("1"));
    response
}

/// Response continuing to routing against `destination`.
pub fn rewrite(destination: &str) -> anyhow::Result<Response<Body>> {
    Ok(Response::builder()
        .header(MIDDLEWARE_REWRITE_HEADER, destination)
        .body(Body::empty())?)
}

/// Redirect response returned to the client as is.
pub fn redirect(location: &str, status: StatusCode) -> anyhow::Result<Response<Body>> {
    Ok(Response::builder()
        .status(status)
        .header(LOCATION, location)
        .body(Body::empty())?)
}

/// Override a request header for the rest of the request.
pub fn override_request_header(response: &mut Response<Body>, name: &str, value: &str) -> anyhow::Result<()> {
    let name = HeaderName::from_bytes(format!("{}{}", MIDDLEWARE_REQUEST_HEADER_PREFIX, name.to_ascii_lowercase()).as_bytes())?;
    response.headers_mut().insert(name, HeaderValue::from_str(value)?);
    Ok(())
}

/// What the engine does after middleware ran.
#[derive(Debug)]
pub enum MiddlewareOutcome {
    Continue {
        headers: HeaderMap,
        request_headers: HeaderMap,
    },
    Rewrite {
        destination: String,
        headers: HeaderMap,
        request_headers: HeaderMap,
        status: Option<StatusCode>,
    },
    Redirect(Response<Body>),
    Respond(Response<Body>),
}

/// Split the reserved headers off a middleware response.
fn take_directives(headers: &mut HeaderMap) -> (Option<String>, bool, HeaderMap) {
    let rewrite = headers
        .get(MIDDLEWARE_REWRITE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let next = headers.contains_key(MIDDLEWARE_NEXT_HEADER);

    let mut request_headers = HeaderMap::new();
    let reserved: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(INTERNAL_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in reserved {
        let values: Vec<HeaderValue> = headers.get_all(&name).iter().cloned().collect();
        headers.remove(&name);
        let Some(target) = name.as_str().strip_prefix(MIDDLEWARE_REQUEST_HEADER_PREFIX) else {
            continue;
        };
        let Ok(target) = HeaderName::from_bytes(target.as_bytes()) else {
            continue;
        };
        for value in values {
            request_headers.append(target.clone(), value);
        }
    }

    (rewrite, next, request_headers)
}

/// Classify a middleware response.
pub fn classify(response: Response<Body>) -> MiddlewareOutcome {
    let (mut parts, body) = response.into_parts();
    let (rewrite, next, request_headers) = take_directives(&mut parts.headers);

    if let Some(destination) = rewrite {
        let status = (parts.status != StatusCode::OK).then_some(parts.status);
        return MiddlewareOutcome::Rewrite {
            destination,
            headers: parts.headers,
            request_headers,
            status,
        };
    }
    if next {
        return MiddlewareOutcome::Continue {
            headers: parts.headers,
            request_headers,
        };
    }
    let response = Response::from_parts(parts, body);
    if response.status().is_redirection() {
        MiddlewareOutcome::Redirect(response)
    } else {
        MiddlewareOutcome::Respond(response)
    }
}

/// Apply request-header overrides to the context seen by routing and views.
pub fn apply_request_headers(ctx: &mut RequestContext, overrides: &HeaderMap) {
    for name in overrides.keys() {
        ctx.headers.remove(name);
        for value in overrides.get_all(name) {
            ctx.headers.append(name.clone(), value.clone());
        }
    }
    if overrides.contains_key(COOKIE) {
        ctx.cookies = Cookies::from_headers(&ctx.headers);
    }
}

/// Middleware plus the path allowlist gating it.
#[derive(Clone)]
pub struct MiddlewareGate {
    middleware: Arc<dyn Middleware>,
    matcher: PathMatcher,
}

impl std::fmt::Debug for MiddlewareGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareGate")
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl MiddlewareGate {
    pub fn new(middleware: Arc<dyn Middleware>, matcher: PathMatcher) -> Self {
        Self { middleware, matcher }
    }

    /// Whether the middleware runs for this pathname.
    pub fn applies(&self, pathname: &str) -> bool {
        self.matcher.matches(pathname)
    }

    /// Run the middleware if the pathname passes the matcher.
    pub async fn run(&self, request: MiddlewareRequest) -> Result<Option<MiddlewareOutcome>, EngineError> {
        if !self.applies(&request.pathname) {
            return Ok(None);
        }
        let pathname = request.pathname.clone();
        let response = self
            .middleware
            .call(request)
            .await
            .map_err(|err| EngineError::Middleware(format!("{:#}", err)))?;
        let outcome = classify(response);
        tracing::debug!(
            pathname = %pathname,
            outcome = match &outcome {
                MiddlewareOutcome::Continue { .. } => "continue",
                MiddlewareOutcome::Rewrite { .. } => "rewrite",
                MiddlewareOutcome::Redirect(_) => "redirect",
                MiddlewareOutcome::Respond(_) => "respond",
            },
            "middleware finished"
        );
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = http::Request::builder().uri("/account");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestContext::from_parts(&builder.body(()).unwrap().into_parts().0)
    }

    // === Classification Tests ===

    #[test]
    fn test_next_collects_request_overrides() {
        let mut response = next();
        response.headers_mut().insert("x-trace", HeaderValue::from_static("abc"));
        override_request_header(&mut response, "X-User", "42").unwrap();

        match classify(response) {
            MiddlewareOutcome::Continue {
                headers,
                request_headers,
            } => {
                assert_eq!(headers.len(), 1);
                assert_eq!(headers["x-trace"], "abc");
                assert_eq!(request_headers["x-user"], "42");
            }
            other => panic!("expected continue, got {:?}", other),
        }
    }

    #[test]
    fn test_rewrite_keeps_status_override() {
        let mut response = rewrite("/maintenance").unwrap();
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;

        match classify(response) {
            MiddlewareOutcome::Rewrite {
                destination,
                headers,
                status,
                ..
            } => {
                assert_eq!(destination, "/maintenance");
                assert!(headers.is_empty());
                assert_eq!(status, Some(StatusCode::SERVICE_UNAVAILABLE));
            }
            other => panic!("expected rewrite, got {:?}", other),
        }
    }

    #[test]
    fn test_redirect_and_terminal_responses() {
        let outcome = classify(redirect("/login", StatusCode::TEMPORARY_REDIRECT).unwrap());
        assert!(matches!(outcome, MiddlewareOutcome::Redirect(ref r) if r.headers()[LOCATION] == "/login"));

        let mut denied = Response::new(Body::from("denied"));
        *denied.status_mut() = StatusCode::UNAUTHORIZED;
        denied
            .headers_mut()
            .insert("x-middleware-request-x-user", HeaderValue::from_static("1"));
        match classify(denied) {
            MiddlewareOutcome::Respond(response) => {
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
                assert!(response.headers().is_empty());
            }
            other => panic!("expected respond, got {:?}", other),
        }
    }

    #[test]
    fn test_cookie_override_reparses_cookies() {
        let mut ctx = context(&[("cookie", "a=1"), ("accept", "text/html")]);
        let mut overrides = HeaderMap::new();
        overrides.insert(COOKIE, HeaderValue::from_static("a=2; b=3"));
        apply_request_headers(&mut ctx, &overrides);

        assert_eq!(ctx.cookie("a"), Some("2"));
        assert_eq!(ctx.cookie("b"), Some("3"));
        assert_eq!(ctx.header("accept"), Some("text/html"));
    }

    // === Gate Tests ===

    #[tokio::test]
    async fn test_gate_respects_matcher() {
        let gate = MiddlewareGate::new(
            Arc::new(FnMiddleware(|_req: MiddlewareRequest| async { Ok(next()) })),
            PathMatcher::new(&["/account/:path*".to_string()]),
        );

        let skipped = gate
            .run(MiddlewareRequest {
                pathname: "/shop".to_string(),
                context: context(&[]),
            })
            .await
            .unwrap();
        assert!(skipped.is_none());

        let ran = gate
            .run(MiddlewareRequest {
                pathname: "/account".to_string(),
                context: context(&[]),
            })
            .await
            .unwrap();
        assert!(matches!(ran, Some(MiddlewareOutcome::Continue { .. })));
    }

    #[tokio::test]
    async fn test_gate_reports_middleware_failure() {
        let gate = MiddlewareGate::new(
            Arc::new(FnMiddleware(|_req: MiddlewareRequest| async { Err(anyhow::anyhow!("session store down")) })),
            PathMatcher::any(),
        );
        let err = gate
            .run(MiddlewareRequest {
                pathname: "/".to_string(),
                context: context(&[]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Middleware(ref msg) if msg.contains("session store down")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
