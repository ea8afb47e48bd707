//! Proxy client for external rewrite destinations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_streaming::Body;
use http::{Request, Response, StatusCode, Uri};
use url::Url;

use crate::headers::{strip_request_headers, strip_response_headers};

/// Default hard timeout for proxied requests.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid proxy destination: {0}")]
    InvalidDestination(String),

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    /// Status returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Outbound HTTP seam.
///
/// The edge runtime supplies the implementation. Outside a tokio runtime
/// the client has no timer, so the transport must enforce `deadline` itself
/// and report expiry as [`ProxyError::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: Request<Body>,
        deadline: Duration,
    ) -> Result<Response<Body>, ProxyError>;
}

/// Forwards requests to external destinations.
#[derive(Clone)]
pub struct ProxyClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ProxyClient {
    /// Create a client over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }

    /// Set the hard timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward a request to `destination`.
    ///
    /// Credentials, engine-internal headers and hop-by-hop headers are not
    /// forwarded; hop-by-hop headers are removed from the response.
    pub async fn forward(
        &self,
        destination: &str,
        parts: &http::request::Parts,
        body: Body,
    ) -> Result<Response<Body>, ProxyError> {
        let url = Url::parse(destination)
            .map_err(|e| ProxyError::InvalidDestination(format!("{}: {}", destination, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ProxyError::InvalidDestination(destination.to_string()));
        }
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidDestination(e.to_string()))?;

        let mut request = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(body)
            .map_err(|e| ProxyError::InvalidDestination(e.to_string()))?;
        *request.headers_mut() = strip_request_headers(&parts.headers);

        tracing::debug!(destination = %url, method = %parts.method, "proxying external rewrite");

        let send = self.transport.send(request, self.timeout);
        // Without a runtime the deadline is the transport's to enforce.
        let result = if tokio::runtime::Handle::try_current().is_ok() {
            match tokio::time::timeout(self.timeout, send).await {
                Ok(result) => result,
                Err(_) => Err(ProxyError::Timeout(self.timeout)),
            }
        } else {
            send.await
        };

        match result {
            Ok(mut response) => {
                strip_response_headers(response.headers_mut());
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(destination = %url, error = %err, status = err.status().as_u16(), "proxy request failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the forwarded request and answers after an optional delay.
    struct FakeTransport {
        delay: Option<Duration>,
        fail: bool,
        seen: Mutex<Option<(String, http::HeaderMap)>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                delay: None,
                fail: false,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            request: Request<Body>,
            _deadline: Duration,
        ) -> Result<Response<Body>, ProxyError> {
            *self.seen.lock().unwrap() = Some((request.uri().to_string(), request.headers().clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ProxyError::Connect("refused".into()));
            }
            Ok(Response::builder()
                .status(200)
                .header("connection", "keep-alive")
                .header("keep-alive", "timeout=5")
                .header("content-type", "text/plain")
                .body(Body::from("upstream"))
                .unwrap())
        }
    }

    fn parts(headers: &[(&str, &str)]) -> http::request::Parts {
        let mut builder = Request::builder().method("GET").uri("/blog/post");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    // === Forwarding Tests ===

    #[tokio::test]
    async fn test_forward_strips_credentials_and_hop_by_hop() {
        let transport = Arc::new(FakeTransport::new());
        let client = ProxyClient::new(transport.clone());

        let response = client
            .forward(
                "https://blog.example.com/post?x=1",
                &parts(&[("cookie", "s=1"), ("authorization", "Basic x"), ("accept", "*/*")]),
                Body::empty(),
            )
            .await
            .unwrap();

        let (uri, headers) = transport.seen.lock().unwrap().clone().unwrap();
        assert_eq!(uri, "https://blog.example.com/post?x=1");
        assert!(!headers.contains_key("cookie"));
        assert!(!headers.contains_key("authorization"));
        assert!(headers.contains_key("accept"));

        assert!(!response.headers().contains_key("connection"));
        assert!(!response.headers().contains_key("keep-alive"));
        assert_eq!(response.into_body().collect_string().await.unwrap(), "upstream");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_504() {
        let transport = Arc::new(FakeTransport {
            delay: Some(Duration::from_secs(10)),
            ..FakeTransport::new()
        });
        let client = ProxyClient::new(transport).with_timeout(Duration::from_millis(20));

        let err = client
            .forward("https://slow.example.com/", &parts(&[]), Body::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout(_)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    /// Enforces the deadline itself, as a runtime-less host transport does.
    struct HostDeadlineTransport;

    #[async_trait]
    impl Transport for HostDeadlineTransport {
        async fn send(
            &self,
            _request: Request<Body>,
            deadline: Duration,
        ) -> Result<Response<Body>, ProxyError> {
            Err(ProxyError::Timeout(deadline))
        }
    }

    #[tokio::test]
    async fn test_transport_receives_deadline_and_its_timeout_maps_to_504() {
        let client = ProxyClient::new(Arc::new(HostDeadlineTransport)).with_timeout(Duration::from_secs(3));

        let err = client
            .forward("https://stalled.example.com/", &parts(&[]), Body::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout(d) if d == Duration::from_secs(3)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_failure_maps_to_502() {
        let transport = Arc::new(FakeTransport {
            fail: true,
            ..FakeTransport::new()
        });
        let client = ProxyClient::new(transport);

        let err = client
            .forward("https://down.example.com/", &parts(&[]), Body::empty())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_invalid_destination_rejected() {
        let client = ProxyClient::new(Arc::new(FakeTransport::new()));
        let err = client
            .forward("ftp://files.example.com/", &parts(&[]), Body::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidDestination(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
