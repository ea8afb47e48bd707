//! Request-scoped state readable by view code.
//!
//! The engine binds one `RequestScope` to the task handling a request with
//! a tokio task-local. View code reaches it through the `request`,
//! `navigation` and `cache` modules; outside a bound scope those calls fail
//! or return empty values, so state never crosses requests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use edge_cache::{CacheSignals, DynamicMode, Revalidate, SegmentConfig};
use edge_core::{Cookies, QueryParams, RequestContext};
use edge_router::Params;
use futures::{Stream, StreamExt};
use http::HeaderMap;

use crate::cookies::CookieJar;
use crate::signal::ViewError;

/// Cookie carrying the draft-mode secret.
pub const DRAFT_MODE_COOKIE: &str = "__edge_draft";

tokio::task_local! {
    static REQUEST_SCOPE: Arc<RequestScope>;
}

/// Pathname, query and parameters of the current navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    pub pathname: String,
    pub query: QueryParams,
    pub params: Params,
}

#[derive(Debug, Default)]
struct ScopeState {
    navigation: NavigationState,
    mode: DynamicMode,
    dynamic_used: bool,
    render_revalidate: Option<Revalidate>,
    jar: CookieJar,
    draft_enabled: bool,
}

/// Per-request state shared by every view rendered for the request.
#[derive(Debug)]
pub struct RequestScope {
    headers: HeaderMap,
    cookies: Cookies,
    draft_secret: Option<String>,
    state: Mutex<ScopeState>,
}

impl RequestScope {
    /// Create the scope for a request. Draft mode starts enabled when the
    /// draft cookie carries the configured secret.
    pub fn new(ctx: &RequestContext, draft_secret: Option<String>) -> Self {
        let draft_enabled = draft_secret
            .as_deref()
            .is_some_and(|secret| ctx.cookie(DRAFT_MODE_COOKIE) == Some(secret));
        Self {
            headers: ctx.headers.clone(),
            cookies: ctx.cookies.clone(),
            draft_secret,
            state: Mutex::new(ScopeState {
                navigation: NavigationState {
                    pathname: ctx.path.clone(),
                    query: ctx.query.clone(),
                    params: Params::new(),
                },
                draft_enabled,
                ..Default::default()
            }),
        }
    }

    /// The scope bound to the current task, if any.
    pub fn current() -> Option<Arc<RequestScope>> {
        REQUEST_SCOPE.try_with(Arc::clone).ok()
    }

    /// Run a future with this scope bound.
    pub async fn run<F: Future>(self: Arc<Self>, future: F) -> F::Output {
        REQUEST_SCOPE.scope(self, future).await
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_navigation(&self, navigation: NavigationState) {
        self.lock().navigation = navigation;
    }

    pub fn navigation(&self) -> NavigationState {
        self.lock().navigation.clone()
    }

    /// Apply the matched route's rendering mode.
    pub fn set_mode(&self, mode: DynamicMode) {
        self.lock().mode = mode;
    }

    pub fn mode(&self) -> DynamicMode {
        self.lock().mode
    }

    /// Record a read of per-request state.
    ///
    /// Returns `Ok(true)` when the caller should read live state, `Ok(false)`
    /// when it must return empty defaults (force-static).
    pub(crate) fn mark_dynamic(&self, api: &str) -> Result<bool, ViewError> {
        let mut state = self.lock();
        match state.mode {
            DynamicMode::ForceStatic => {
                tracing::debug!(api, "request state read in a force-static route, returning defaults");
                Ok(false)
            }
            DynamicMode::Error => Err(ViewError::StaticBailout {
                api: api.to_string(),
            }),
            DynamicMode::Auto | DynamicMode::ForceDynamic => {
                state.dynamic_used = true;
                Ok(true)
            }
        }
    }

    pub fn dynamic_used(&self) -> bool {
        self.lock().dynamic_used
    }

    pub(crate) fn lower_revalidate(&self, revalidate: Revalidate) {
        let mut state = self.lock();
        state.render_revalidate = Some(match state.render_revalidate {
            Some(current) => current.min(revalidate),
            None => revalidate,
        });
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    pub(crate) fn with_jar<R>(&self, f: impl FnOnce(&mut CookieJar) -> R) -> R {
        f(&mut self.lock().jar)
    }

    pub(crate) fn draft_secret(&self) -> Option<&str> {
        self.draft_secret.as_deref()
    }

    pub fn draft_mode_enabled(&self) -> bool {
        self.lock().draft_enabled
    }

    pub(crate) fn set_draft_mode(&self, enabled: bool) {
        self.lock().draft_enabled = enabled;
    }

    /// `Set-Cookie` values for every cookie mutation so far.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.lock().jar.header_values()
    }

    /// Cache signals observed so far, seeded from the route configuration.
    pub fn cache_signals(&self, segment: &SegmentConfig) -> CacheSignals {
        let state = self.lock();
        let mut signals = CacheSignals::from_segment(segment)
            .with_mode(state.mode)
            .with_dynamic_used(state.dynamic_used);
        signals.draft_mode = state.draft_enabled;
        if let Some(revalidate) = state.render_revalidate {
            signals.lower_render(revalidate);
        }
        signals
    }
}

/// A stream polled with a request scope bound.
///
/// Deferred content renders while the response streams, after the handler
/// returned; this keeps the scope bound for exactly that long and releases
/// it when the stream ends.
pub struct ScopedStream<S> {
    scope: Option<Arc<RequestScope>>,
    inner: S,
}

impl<S> ScopedStream<S> {
    pub fn new(scope: Arc<RequestScope>, inner: S) -> Self {
        Self {
            scope: Some(scope),
            inner,
        }
    }
}

impl<S> Stream for ScopedStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(scope) = this.scope.clone() else {
            return Poll::Ready(None);
        };
        let poll = REQUEST_SCOPE.sync_scope(scope, || this.inner.poll_next_unpin(cx));
        if let Poll::Ready(None) = poll {
            this.scope = None;
        }
        poll
    }
}
