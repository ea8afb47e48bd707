//! Per-request state for view code: headers, cookies and draft mode.
//!
//! Reading headers or cookies marks the render as dynamic. In a
//! `force-static` route the readers return empty values instead; in a
//! `dynamic = "error"` route they fail with a static bailout.

use std::sync::Arc;

use edge_core::Cookies;
use http::HeaderMap;

use crate::cookies::{SameSite, SetCookie};
use crate::scope::{RequestScope, DRAFT_MODE_COOKIE};
use crate::signal::ViewError;

fn bound_scope(api: &str) -> Result<Arc<RequestScope>, ViewError> {
    RequestScope::current()
        .ok_or_else(|| ViewError::failure(format!("{}() was called outside a request scope", api)))
}

/// Incoming request headers.
pub fn headers() -> Result<HeaderMap, ViewError> {
    let scope = bound_scope("headers")?;
    Ok(if scope.mark_dynamic("headers")? {
        scope.headers().clone()
    } else {
        HeaderMap::new()
    })
}

/// Incoming request cookies.
pub fn cookies() -> Result<Cookies, ViewError> {
    let scope = bound_scope("cookies")?;
    Ok(if scope.mark_dynamic("cookies")? {
        scope.cookies().clone()
    } else {
        Cookies::default()
    })
}

/// Handle for setting and deleting response cookies.
pub fn cookies_mut() -> Result<CookieStore, ViewError> {
    let scope = bound_scope("cookies")?;
    let live = scope.mark_dynamic("cookies")?;
    Ok(CookieStore {
        scope: live.then_some(scope),
    })
}

/// Response cookie mutations, sent as `Set-Cookie` headers.
#[derive(Debug, Clone)]
pub struct CookieStore {
    scope: Option<Arc<RequestScope>>,
}

impl CookieStore {
    pub fn set(&self, cookie: SetCookie) {
        match &self.scope {
            Some(scope) => scope.with_jar(|jar| jar.set(cookie)),
            None => tracing::debug!(name = %cookie.name, "cookie write ignored in a force-static route"),
        }
    }

    pub fn delete(&self, name: &str) {
        self.set(SetCookie::deletion(name));
    }
}

/// Draft-mode state of the request.
pub fn draft_mode() -> Result<DraftMode, ViewError> {
    Ok(DraftMode {
        scope: bound_scope("draft_mode")?,
    })
}

/// Reads and toggles draft mode.
#[derive(Debug, Clone)]
pub struct DraftMode {
    scope: Arc<RequestScope>,
}

impl DraftMode {
    pub fn is_enabled(&self) -> bool {
        self.scope.draft_mode_enabled()
    }

    /// Set the draft cookie. Fails when no draft secret is configured.
    pub fn enable(&self) -> Result<(), ViewError> {
        let secret = self
            .scope
            .draft_secret()
            .ok_or_else(|| ViewError::failure("draft mode requires `draft_mode_secret`"))?
            .to_string();
        let cookie = SetCookie::new(DRAFT_MODE_COOKIE, secret)
            .http_only()
            .secure()
            .with_same_site(SameSite::None);
        self.scope.with_jar(|jar| jar.set(cookie));
        self.scope.set_draft_mode(true);
        Ok(())
    }

    /// Clear the draft cookie.
    pub fn disable(&self) {
        self.scope.with_jar(|jar| jar.delete(DRAFT_MODE_COOKIE));
        self.scope.set_draft_mode(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_cache::DynamicMode;
    use edge_core::RequestContext;

    fn scope(mode: DynamicMode, secret: Option<&str>) -> Arc<RequestScope> {
        let (parts, _) = http::Request::builder()
            .uri("/account")
            .header("x-user", "ada")
            .header("cookie", "theme=dark")
            .body(())
            .unwrap()
            .into_parts();
        let scope = RequestScope::new(&RequestContext::from_parts(&parts), secret.map(str::to_string));
        scope.set_mode(mode);
        Arc::new(scope)
    }

    #[tokio::test]
    async fn test_headers_and_cookies_mark_dynamic() {
        let scope = scope(DynamicMode::Auto, None);
        let (header, theme) = Arc::clone(&scope)
            .run(async {
                let headers = headers().unwrap();
                let cookies = cookies().unwrap();
                (
                    headers.get("x-user").map(|v| v.to_str().unwrap().to_string()),
                    cookies.get("theme").map(str::to_string),
                )
            })
            .await;
        assert_eq!(header.as_deref(), Some("ada"));
        assert_eq!(theme.as_deref(), Some("dark"));
        assert!(scope.dynamic_used());
    }

    #[tokio::test]
    async fn test_force_static_returns_defaults() {
        let scope = scope(DynamicMode::ForceStatic, None);
        let empty = Arc::clone(&scope)
            .run(async {
                cookies_mut().unwrap().set(SetCookie::new("a", "b"));
                headers().unwrap().is_empty() && cookies().unwrap().is_empty()
            })
            .await;
        assert!(empty);
        assert!(!scope.dynamic_used());
        assert!(scope.set_cookie_headers().is_empty());
    }

    #[tokio::test]
    async fn test_error_mode_bails_out() {
        let scope = scope(DynamicMode::Error, None);
        let err = scope.run(async { headers().unwrap_err() }).await;
        assert_eq!(err, ViewError::StaticBailout { api: "headers".to_string() });
    }

    #[tokio::test]
    async fn test_outside_scope_fails() {
        assert!(matches!(headers(), Err(ViewError::Failure(_))));
        assert!(draft_mode().is_err());
    }

    #[tokio::test]
    async fn test_cookie_mutations_and_draft_mode() {
        let scope = scope(DynamicMode::Auto, Some("s3cret"));
        Arc::clone(&scope)
            .run(async {
                cookies_mut().unwrap().set(SetCookie::new("theme", "light"));
                let draft = draft_mode().unwrap();
                assert!(!draft.is_enabled());
                draft.enable().unwrap();
                assert!(draft.is_enabled());
            })
            .await;

        let headers = scope.set_cookie_headers();
        assert_eq!(headers[0], "theme=light; Path=/");
        assert!(headers[1].starts_with("__edge_draft=s3cret; Path=/; HttpOnly; Secure"));
        assert!(scope.draft_mode_enabled());
    }
}
