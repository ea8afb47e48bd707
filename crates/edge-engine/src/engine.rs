//! The request state machine.
//!
//! ```text
//! dev-origin guard → normalize → strip base path → trailing slash
//!   → redirect rules → before-files rewrites → middleware → asset paths
//!   ├── action branch: csrf → body limit → invoke → re-render as payload
//!   └── route branch:  after-files rewrites → match → fallback rewrites
//!                      → handler | compose → prerender → shell → cache → stream
//! ```

use std::sync::Arc;
use std::time::Duration;

use edge_cache::{should_include_debug_headers, CacheDirective, CacheHeadersBuilder, SegmentConfig};
use edge_core::{EngineConfig, LifecyclePhase, QueryParams, RequestContext};
use edge_observability::{MetricsCollector, StructuredLogger};
use edge_proxy::{ProxyClient, Transport, INTERNAL_HEADER_PREFIX};
use edge_router::{
    normalize_pathname, strip_base_path, trailing_slash_redirect, NormalizedPath, Params, RouteDescriptor,
    RouteLeaf, RouteMatch, RouteTable, ViewRef,
};
use edge_rules::{is_external, sanitize_destination, LocalDestination, PathMatcher, RewriteOutcome, RewritePhase, RuleEngine};
use edge_security::{CsrfGuard, DevOriginGuard, OriginAllowlist};
use edge_streaming::{tee_pair, Body, BodyError, BodyStream, Shell};
use futures::StreamExt;
use http::header::{HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::request::Parts;
use http::{HeaderMap, Request, Response, StatusCode};

use crate::action::{action_id, decode_args, redirect_response, ActionOutcome, ActionRegistry};
use crate::assets::{is_asset_path, serve_asset, AssetHandler};
use crate::compose::{compose, compose_fallback, ComposeOptions, TreeNode};
use crate::digest::ErrorInfo;
use crate::error::EngineError;
use crate::handler::{handler_error_response, HandlerRegistry, HandlerRequest, RouteHandler};
use crate::markup::markup_body;
use crate::middleware::{apply_request_headers, Middleware, MiddlewareGate, MiddlewareOutcome, MiddlewareRequest};
use crate::payload::{ActionResult, Row, PAYLOAD_CONTENT_TYPE};
use crate::prerender::{prerender_layouts, restricted_tree, LayoutSignal};
use crate::render::{payload_rows, Renderer, ShellOutput};
use crate::scope::{NavigationState, RequestScope, ScopedStream};
use crate::signal::{ControlSignal, RedirectKind, ViewError};
use crate::view::ViewRegistry;

/// Header naming the URL a client navigation starts from; enables interception.
pub const INTERCEPT_SOURCE_HEADER: &str = "x-edge-url";
/// Path suffix selecting a payload-only response.
pub const PAYLOAD_SUFFIX: &str = ".rsc";
pub const MATCHED_PATH_HEADER: &str = "x-matched-path";
pub const MATCHED_PARAMS_HEADER: &str = "x-matched-params";

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Builds an [`Engine`], checking that every referenced view and handler is registered.
pub struct EngineBuilder {
    config: EngineConfig,
    table: RouteTable,
    views: ViewRegistry,
    actions: ActionRegistry,
    handlers: HandlerRegistry,
    middleware: Option<Arc<dyn Middleware>>,
    transport: Option<Arc<dyn Transport>>,
    assets: Option<Arc<dyn AssetHandler>>,
    shell: Shell,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig, table: RouteTable) -> Self {
        Self {
            config,
            table,
            views: ViewRegistry::new(),
            actions: ActionRegistry::new(),
            handlers: HandlerRegistry::new(),
            middleware: None,
            transport: None,
            assets: None,
            shell: Shell::default(),
        }
    }

    pub fn with_views(mut self, views: ViewRegistry) -> Self {
        self.views = views;
        self
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: impl RouteHandler + 'static) -> Self {
        self.handlers = self.handlers.with_handler(name, handler);
        self
    }

    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware = Some(Arc::new(middleware));
        self
    }

    /// Outbound transport for external rewrites.
    pub fn with_proxy_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetHandler>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Document shell wrapping HTML responses.
    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        self.table.validate()?;

        if let Some(missing) = referenced_views(&self.table)
            .into_iter()
            .find(|view| !self.views.contains(view))
        {
            return Err(EngineError::MissingView(missing.clone()));
        }
        for route in &self.table.routes {
            if let RouteLeaf::Handler(name) = &route.leaf {
                if !self.handlers.contains(name) {
                    return Err(EngineError::MissingHandler(name.clone()));
                }
            }
        }

        let config = self.config;
        let middleware = self
            .middleware
            .map(|m| MiddlewareGate::new(m, PathMatcher::new(&config.middleware.matcher)));
        let proxy = self
            .transport
            .map(|t| ProxyClient::new(t).with_timeout(Duration::from_millis(config.proxy_timeout_ms)));

        tracing::info!(
            routes = self.table.len(),
            views = self.views.len(),
            actions = self.actions.len(),
            middleware = middleware.is_some(),
            proxy = proxy.is_some(),
            "engine ready"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                rules: RuleEngine::new(&config),
                csrf: CsrfGuard::new(OriginAllowlist::from_entries(&config.server_actions.allowed_origins)),
                dev_guard: DevOriginGuard::new(config.dev, OriginAllowlist::from_entries(&config.allowed_dev_origins)),
                views: Arc::new(self.views),
                actions: self.actions,
                handlers: self.handlers,
                middleware,
                proxy,
                assets: self.assets,
                shell: self.shell,
                table: self.table,
                config,
            }),
        })
    }
}

/// Every view name the table refers to.
fn referenced_views(table: &RouteTable) -> Vec<&ViewRef> {
    let mut refs: Vec<&ViewRef> = [
        &table.root_layout,
        &table.not_found,
        &table.forbidden,
        &table.unauthorized,
        &table.global_error,
    ]
    .into_iter()
    .flatten()
    .collect();

    for route in &table.routes {
        refs.extend(route.layouts.iter());
        refs.extend(route.layout_errors.iter().flatten());
        refs.extend(route.layout_not_founds.iter().flatten());
        refs.extend(route.templates.iter());
        refs.extend(route.page_view());
        refs.extend(
            [&route.loading, &route.error, &route.not_found, &route.forbidden, &route.unauthorized]
                .into_iter()
                .flatten(),
        );
        for slot in route.slots.values() {
            refs.extend(
                [&slot.page, &slot.default, &slot.layout, &slot.loading, &slot.error]
                    .into_iter()
                    .flatten(),
            );
            refs.extend(slot.intercepts.iter().map(|entry| &entry.page));
        }
    }
    refs
}

struct EngineInner {
    config: EngineConfig,
    table: RouteTable,
    views: Arc<ViewRegistry>,
    actions: ActionRegistry,
    handlers: HandlerRegistry,
    rules: RuleEngine,
    middleware: Option<MiddlewareGate>,
    proxy: Option<ProxyClient>,
    assets: Option<Arc<dyn AssetHandler>>,
    csrf: CsrfGuard,
    dev_guard: DevOriginGuard,
    shell: Shell,
}

/// Request-handling engine. Cheap to clone; clones share one route table.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct MatchedRoute {
    pattern: String,
    params: Params,
    dynamic: bool,
}

/// Mutable state of one request as it moves through the engine.
struct Exchange {
    parts: Parts,
    body: Option<Body>,
    ctx: RequestContext,
    /// Pathname after base-path stripping, before rewrites.
    requested: String,
    /// Pathname routing currently works against.
    pathname: String,
    query: QueryParams,
    payload: bool,
    /// Response headers merged from middleware.
    headers: HeaderMap,
    /// Status set by a middleware rewrite.
    status: Option<StatusCode>,
    scope: Option<Arc<RequestScope>>,
    matched: Option<MatchedRoute>,
    logger: StructuredLogger,
    metrics: MetricsCollector,
}

impl Exchange {
    fn new(parts: Parts, body: Body) -> Self {
        let ctx = RequestContext::from_parts(&parts);
        Self {
            logger: StructuredLogger::new(ctx.request_id.clone()),
            metrics: MetricsCollector::new(ctx.request_id.clone()),
            query: ctx.query.clone(),
            requested: String::new(),
            pathname: String::new(),
            payload: false,
            headers: HeaderMap::new(),
            status: None,
            scope: None,
            matched: None,
            body: Some(body),
            parts,
            ctx,
        }
    }

    fn take_body(&mut self) -> Body {
        self.body.take().unwrap_or_else(Body::empty)
    }

    fn merge_middleware_headers(&mut self, headers: HeaderMap, request_headers: &HeaderMap) {
        for name in headers.keys() {
            for value in headers.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        if !request_headers.is_empty() {
            apply_request_headers(&mut self.ctx, request_headers);
            self.parts.headers = self.ctx.headers.clone();
        }
    }

    fn apply_local(&mut self, destination: LocalDestination) {
        self.pathname = destination.pathname;
        if !destination.query.is_empty() {
            self.query = destination.query;
        }
    }
}

impl Engine {
    pub fn builder(config: EngineConfig, table: RouteTable) -> EngineBuilder {
        EngineBuilder::new(config, table)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn table(&self) -> &RouteTable {
        &self.inner.table
    }

    /// Handle one request. Never fails: errors become error responses.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let mut ex = Exchange::new(parts, body);
        ex.metrics.record_phase(&LifecyclePhase::Start);
        ex.logger
            .debug_builder("request received")
            .field("method", ex.parts.method.to_string())
            .field("path", ex.parts.uri.path().to_string())
            .emit();

        let response = match self.dispatch(&mut ex).await {
            Ok(response) => self.decorate(&ex, response),
            Err(err) => {
                ex.metrics.record_phase(&LifecyclePhase::Error(err.to_string()));
                error_response(&ex.logger, &err)
            }
        };

        let Exchange { logger, mut metrics, .. } = ex;
        metrics.record_phase(&LifecyclePhase::Completion);
        let status = response.status().as_u16();
        let summary = metrics.finalize(Some(status));
        logger
            .info_builder("request complete")
            .field_i64("status", i64::from(status))
            .field_json("metrics", &summary)
            .emit();
        response
    }

    async fn dispatch(&self, ex: &mut Exchange) -> Result<Response<Body>, EngineError> {
        let inner = &*self.inner;

        if !inner.dev_guard.allows(ex.parts.uri.path(), &ex.parts.headers) {
            return Err(EngineError::DevOriginBlocked);
        }

        let raw = ex.parts.uri.path().to_string();
        let (raw, suffixed) = match raw.strip_suffix(PAYLOAD_SUFFIX) {
            Some(stripped) => (stripped.to_string(), true),
            None => (raw, false),
        };
        ex.payload = suffixed || accepts_payload(&ex.parts.headers);

        let normalized = normalize_pathname(&raw)?;
        ex.metrics.record_phase(&LifecyclePhase::Normalized);

        let Some(stripped) = strip_base_path(&normalized.pathname, &inner.config.base_path) else {
            ex.logger.debug("request outside the base path");
            return Ok(plain_status(StatusCode::NOT_FOUND));
        };
        let mut path = NormalizedPath {
            pathname: stripped.into_owned(),
            trailing_slash: normalized.trailing_slash,
        };
        if suffixed {
            if path.pathname == "/index" {
                path.pathname = "/".to_string();
            }
        } else if let Some(location) = trailing_slash_redirect(&path, inner.config.trailing_slash) {
            let location = self.with_base_path(&location, &ex.query);
            return Ok(location_response(&location, StatusCode::PERMANENT_REDIRECT)?);
        }
        ex.requested = path.pathname.clone();
        ex.pathname = path.pathname;

        if let Some(redirect) = inner.rules.redirect(&ex.pathname, &ex.ctx) {
            let location = if is_external(&redirect.location) {
                redirect.location
            } else {
                format!("{}{}", inner.config.base_path, redirect.location)
            };
            let status = StatusCode::from_u16(redirect.status).unwrap_or(StatusCode::TEMPORARY_REDIRECT);
            return Ok(location_response(&location, status)?);
        }
        if let Some(rewrite) = inner.rules.rewrite(RewritePhase::BeforeFiles, &ex.pathname, &ex.ctx) {
            if let Some(response) = self.apply_rewrite(ex, rewrite).await? {
                return Ok(response);
            }
        }
        ex.metrics.record_phase(&LifecyclePhase::Rules);

        if let Some(gate) = &inner.middleware {
            let request = MiddlewareRequest {
                pathname: ex.pathname.clone(),
                context: ex.ctx.clone(),
            };
            match gate.run(request).await? {
                None => {}
                Some(MiddlewareOutcome::Continue {
                    headers,
                    request_headers,
                }) => ex.merge_middleware_headers(headers, &request_headers),
                Some(MiddlewareOutcome::Rewrite {
                    destination,
                    headers,
                    request_headers,
                    status,
                }) => {
                    ex.merge_middleware_headers(headers, &request_headers);
                    ex.status = status;
                    if is_external(&destination) {
                        return self.proxy(ex, &destination).await;
                    }
                    ex.apply_local(LocalDestination::parse(&sanitize_destination(&destination)));
                }
                Some(MiddlewareOutcome::Redirect(response)) | Some(MiddlewareOutcome::Respond(response)) => {
                    return Ok(response);
                }
            }
            ex.metrics.record_phase(&LifecyclePhase::Middleware);
        }

        if is_asset_path(&ex.pathname) {
            if let Some(result) = serve_asset(&ex.pathname, &ex.query, &ex.parts, inner.assets.as_deref()).await {
                return Ok(result?);
            }
        }

        match action_id(&ex.parts.method, &ex.parts.headers) {
            Some(id) => self.run_action(ex, id).await,
            None => self.run_route(ex, None, None).await,
        }
    }

    async fn apply_rewrite(&self, ex: &mut Exchange, outcome: RewriteOutcome) -> Result<Option<Response<Body>>, EngineError> {
        match outcome {
            RewriteOutcome::Internal(destination) => {
                ex.apply_local(destination);
                Ok(None)
            }
            RewriteOutcome::External(url) => self.proxy(ex, &url).await.map(Some),
        }
    }

    async fn proxy(&self, ex: &mut Exchange, destination: &str) -> Result<Response<Body>, EngineError> {
        let proxy = self
            .inner
            .proxy
            .as_ref()
            .ok_or_else(|| EngineError::NoProxy(destination.to_string()))?;
        let body = ex.take_body();
        Ok(proxy.forward(destination, &ex.parts, body).await?)
    }

    fn new_scope(&self, ex: &Exchange) -> Arc<RequestScope> {
        let scope = RequestScope::new(&ex.ctx, self.inner.config.draft_mode_secret.clone());
        scope.set_navigation(NavigationState {
            pathname: ex.pathname.clone(),
            query: ex.query.clone(),
            params: Params::new(),
        });
        Arc::new(scope)
    }

    async fn run_action(&self, ex: &mut Exchange, id: String) -> Result<Response<Body>, EngineError> {
        let inner = &*self.inner;
        inner.csrf.check(&ex.parts.headers)?;
        let args = decode_args(ex.take_body(), inner.config.server_actions.body_size_limit).await?;
        let action = inner
            .actions
            .get(&id)
            .ok_or_else(|| EngineError::UnknownAction(id.clone()))?;

        ex.payload = true;
        let scope = self.new_scope(ex);
        ex.scope = Some(scope.clone());
        ex.logger.debug_builder("invoking action").field("action", id).emit();

        let result = scope.clone().run(action.call(args)).await;
        let outcome = ActionOutcome::from_result(result, inner.config.dev, &ex.logger);
        match outcome {
            ActionOutcome::Redirect {
                destination,
                kind,
                status,
            } => {
                ex.metrics.record_signal("redirect");
                Ok(redirect_response(&destination, kind, status)?)
            }
            ActionOutcome::Failed(_) => Ok(payload_response(
                &[Row::Root {
                    tree: None,
                    action: outcome.result(),
                }],
                StatusCode::OK,
            )?),
            ActionOutcome::Returned(_) => self.run_route(ex, Some(scope), outcome.result()).await,
        }
    }

    async fn run_route(
        &self,
        ex: &mut Exchange,
        scope: Option<Arc<RequestScope>>,
        action: Option<ActionResult>,
    ) -> Result<Response<Body>, EngineError> {
        let inner = &*self.inner;

        if let Some(rewrite) = inner.rules.rewrite(RewritePhase::AfterFiles, &ex.pathname, &ex.ctx) {
            if let Some(response) = self.apply_rewrite(ex, rewrite).await? {
                return Ok(response);
            }
        }
        let mut matched = inner.table.match_path(&ex.pathname);
        if matched.is_none() {
            if let Some(rewrite) = inner.rules.rewrite(RewritePhase::Fallback, &ex.pathname, &ex.ctx) {
                if let Some(response) = self.apply_rewrite(ex, rewrite).await? {
                    return Ok(response);
                }
                matched = inner.table.match_path(&ex.pathname);
            }
        }
        ex.metrics.record_phase(&LifecyclePhase::Matched);

        let scope = scope.unwrap_or_else(|| self.new_scope(ex));
        ex.scope = Some(scope.clone());

        let Some(RouteMatch { route, params, .. }) = matched else {
            ex.logger
                .debug_builder("no route matched")
                .field("pathname", ex.pathname.clone())
                .emit();
            return self
                .render_global(ex, &scope, None, ControlSignal::NotFound, Params::new(), action)
                .await;
        };

        ex.logger.set_route(route.pattern.clone());
        ex.metrics.set_route(route.pattern.clone());
        ex.matched = Some(MatchedRoute {
            pattern: route.pattern.clone(),
            params: params.clone(),
            dynamic: route.dynamic,
        });
        scope.set_mode(route.config.dynamic);
        scope.set_navigation(NavigationState {
            pathname: ex.pathname.clone(),
            query: ex.query.clone(),
            params: params.clone(),
        });

        match &route.leaf {
            RouteLeaf::Handler(name) => self.run_handler(ex, &scope, name, params).await,
            RouteLeaf::Page(_) => self.run_page(ex, &scope, route, params, action).await,
        }
    }

    async fn run_handler(
        &self,
        ex: &mut Exchange,
        scope: &Arc<RequestScope>,
        name: &str,
        params: Params,
    ) -> Result<Response<Body>, EngineError> {
        let handler = self
            .inner
            .handlers
            .get(name)
            .ok_or_else(|| EngineError::MissingHandler(name.to_string()))?;
        let request = HandlerRequest {
            method: ex.parts.method.clone(),
            headers: ex.ctx.headers.clone(),
            pathname: ex.pathname.clone(),
            params,
            query: ex.query.clone(),
            body: ex.take_body(),
        };

        match scope.clone().run(handler.handle(request)).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if let Some(signal) = err.signal() {
                    ex.metrics.record_signal(signal.name());
                }
                Ok(handler_error_response(err, self.inner.config.dev, &ex.logger)?)
            }
        }
    }

    /// Source route of an intercepted client navigation.
    fn intercepting_route(&self, ex: &Exchange) -> Option<Interception<'_>> {
        if !ex.payload {
            return None;
        }
        let source = ex.parts.headers.get(INTERCEPT_SOURCE_HEADER)?.to_str().ok()?;
        let path = source.split(['?', '#']).next().unwrap_or_default();
        let normalized = normalize_pathname(path).ok()?;
        let source_path = strip_base_path(&normalized.pathname, &self.inner.config.base_path)?.into_owned();
        if source_path == ex.pathname {
            return None;
        }

        let matched = self.inner.table.match_path(&source_path)?;
        let target_params = matched
            .route
            .slots
            .values()
            .flat_map(|slot| slot.intercepts.iter())
            .find_map(|entry| entry.capture(&ex.pathname))?;
        Some(Interception {
            source: matched.route,
            source_params: matched.params,
            source_path,
            target_params,
        })
    }

    async fn run_page(
        &self,
        ex: &mut Exchange,
        scope: &Arc<RequestScope>,
        route: &RouteDescriptor,
        params: Params,
        action: Option<ActionResult>,
    ) -> Result<Response<Body>, EngineError> {
        let inner = &*self.inner;

        let (route, params, pathname, tree) = match self.intercepting_route(ex) {
            Some(Interception {
                source,
                source_params,
                source_path,
                target_params,
            }) => {
                ex.logger
                    .debug_builder("navigation intercepted")
                    .field("source", source.pattern.clone())
                    .field("target", ex.pathname.clone())
                    .emit();
                // The URL stays the target's, so navigation reads the intercepting page's params.
                scope.set_navigation(NavigationState {
                    pathname: ex.pathname.clone(),
                    query: ex.query.clone(),
                    params: target_params,
                });
                let tree = compose(
                    source,
                    &inner.table,
                    &ComposeOptions::new(&source_path).with_intercept(&ex.pathname),
                );
                (source, source_params, source_path, tree)
            }
            None => {
                let tree = compose(route, &inner.table, &ComposeOptions::new(&ex.pathname));
                (route, params, ex.pathname.clone(), tree)
            }
        };

        let raised = scope
            .clone()
            .run(prerender_layouts(route, &params, &pathname, &inner.views))
            .await;
        ex.metrics.record_phase(&LifecyclePhase::Prerender);

        let (tree, status) = match raised {
            None => (tree, None),
            Some(LayoutSignal {
                signal: ControlSignal::Redirect {
                    destination,
                    kind,
                    status,
                },
                ..
            }) => return self.redirect_page(ex, &destination, kind, status, action),
            Some(raised) => {
                ex.metrics.record_signal(raised.signal.name());
                ex.logger.signal(raised.signal.name(), &format!("layout {}", raised.layout_index));
                match restricted_tree(route, &inner.table, &pathname, &raised) {
                    Some(tree) => (tree, Some(raised.signal.status())),
                    None => return Ok(plain_status(raised.signal.status())),
                }
            }
        };

        match self.render_shell(ex, scope, &tree, params.clone()).await {
            Ok(shell) => self.stream_page(ex, scope, Some(&route.config), shell, status, action),
            Err(ViewError::Signal(ControlSignal::Redirect {
                destination,
                kind,
                status,
            })) => self.redirect_page(ex, &destination, kind, status, action),
            Err(ViewError::Signal(signal)) => {
                self.render_global(ex, scope, Some(route), signal, params, action)
                    .await
            }
            Err(err) => Err(self.fatal(ex, err)),
        }
    }

    /// Render the table-level view for an access signal no boundary caught.
    async fn render_global(
        &self,
        ex: &mut Exchange,
        scope: &Arc<RequestScope>,
        route: Option<&RouteDescriptor>,
        signal: ControlSignal,
        params: Params,
        action: Option<ActionResult>,
    ) -> Result<Response<Body>, EngineError> {
        let table = &self.inner.table;
        ex.metrics.record_signal(signal.name());
        let view = match signal {
            ControlSignal::NotFound => table.not_found.as_ref(),
            ControlSignal::Forbidden => table.forbidden.as_ref(),
            ControlSignal::Unauthorized => table.unauthorized.as_ref(),
            ControlSignal::Redirect { .. } => None,
        };
        let Some(view) = view else {
            return Ok(plain_status(signal.status()));
        };

        let depth = route.map_or(1, |r| r.layouts.len().min(1));
        let tree = compose_fallback(route, table, depth, view, &ex.pathname);
        match self.render_shell(ex, scope, &tree, params).await {
            Ok(shell) => {
                let segment = route.map(|r| &r.config);
                self.stream_page(ex, scope, segment, shell, Some(signal.status()), action)
            }
            Err(ViewError::Signal(ControlSignal::Redirect {
                destination,
                kind,
                status,
            })) => self.redirect_page(ex, &destination, kind, status, action),
            Err(ViewError::Signal(other)) => Ok(plain_status(other.status())),
            Err(err) => Err(self.fatal(ex, err)),
        }
    }

    async fn render_shell(
        &self,
        ex: &Exchange,
        scope: &Arc<RequestScope>,
        tree: &TreeNode,
        params: Params,
    ) -> Result<ShellOutput, ViewError> {
        let renderer = Renderer::new(Arc::clone(&self.inner.views), self.inner.config.dev, ex.logger.clone());
        scope.clone().run(renderer.render_shell(tree, params)).await
    }

    /// Turn an error that escaped every boundary into an engine error.
    fn fatal(&self, ex: &Exchange, err: ViewError) -> EngineError {
        match err {
            ViewError::StaticBailout { api } => EngineError::StaticBailout { api },
            ViewError::Failure(failure) => {
                let info = ErrorInfo::sanitize(&failure, self.inner.config.dev);
                ex.logger.failure("render", &failure.message, &info.digest);
                EngineError::Render {
                    message: info.message,
                    digest: info.digest,
                }
            }
            ViewError::Signal(signal) => EngineError::Render {
                message: signal.name().to_string(),
                digest: signal.digest(),
            },
        }
    }

    fn redirect_page(
        &self,
        ex: &mut Exchange,
        destination: &str,
        kind: RedirectKind,
        status: u16,
        action: Option<ActionResult>,
    ) -> Result<Response<Body>, EngineError> {
        ex.metrics.record_signal("redirect");
        let location = sanitize_destination(destination);
        if ex.payload {
            let rows = [
                Row::Root { tree: None, action },
                Row::Redirect { location, kind, status },
            ];
            return Ok(payload_response(&rows, StatusCode::OK)?);
        }
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::TEMPORARY_REDIRECT);
        Ok(location_response(&location, status)?)
    }

    fn stream_page(
        &self,
        ex: &mut Exchange,
        scope: &Arc<RequestScope>,
        segment: Option<&SegmentConfig>,
        shell: ShellOutput,
        status: Option<StatusCode>,
        action: Option<ActionResult>,
    ) -> Result<Response<Body>, EngineError> {
        ex.metrics.record_phase(&LifecyclePhase::ShellReady);
        let status = status.or(shell.status).or(ex.status).unwrap_or(StatusCode::OK);
        let cache_headers = self.cache_headers(ex, scope, segment.cloned().unwrap_or_default(), status);

        let root = Row::Root {
            tree: Some(shell.root),
            action,
        };
        let lines = payload_rows(root, shell.deferred).map(|row| Ok::<_, BodyError>(row.to_line()));
        let stream: BodyStream = ScopedStream::new(Arc::clone(scope), lines).boxed();

        let (body, content_type) = if ex.payload {
            (Body::from_stream(stream), PAYLOAD_CONTENT_TYPE)
        } else {
            let (rows, embeds) = tee_pair(stream);
            (markup_body(&self.inner.shell, rows, embeds), HTML_CONTENT_TYPE)
        };

        let mut builder = Response::builder().status(status).header(CONTENT_TYPE, content_type);
        for (name, value) in cache_headers {
            builder = builder.header(name, value);
        }
        Ok(builder.body(body)?)
    }

    /// Cache headers, decided from the signals observed while rendering the shell.
    fn cache_headers(
        &self,
        ex: &mut Exchange,
        scope: &RequestScope,
        segment: SegmentConfig,
        status: StatusCode,
    ) -> Vec<(String, String)> {
        let builder = if status.is_success() {
            let decision = scope.cache_signals(&segment).decide();
            let cache_control = decision.directive.cache_control();
            ex.logger
                .debug_builder("cache decision")
                .field("cache_control", cache_control.clone())
                .field("reason", decision.reason.to_string())
                .emit();
            ex.metrics.record_cache(cache_control);
            CacheHeadersBuilder::new().decision(decision)
        } else {
            CacheHeadersBuilder::new().cache_control(CacheDirective::NoStore.cache_control())
        };
        builder
            .vary(ACCEPT.as_str())
            .vary(INTERCEPT_SOURCE_HEADER)
            .include_debug(should_include_debug_headers(&ex.parts.headers))
            .build()
    }

    fn with_base_path(&self, location: &str, query: &QueryParams) -> String {
        let mut out = encode_pathname(&format!("{}{}", self.inner.config.base_path, location));
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query.to_query_string());
        }
        out
    }

    /// Headers every successful response carries.
    fn decorate(&self, ex: &Exchange, mut response: Response<Body>) -> Response<Body> {
        let headers = response.headers_mut();

        for name in ex.headers.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in ex.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        for (name, value) in self.inner.rules.headers(&ex.requested, &ex.ctx) {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid header rule value"),
            }
        }

        if let Some(scope) = &ex.scope {
            for cookie in scope.set_cookie_headers() {
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    headers.append(SET_COOKIE, value);
                }
            }
        }

        if let Some(matched) = ex.matched.as_ref().filter(|m| m.dynamic) {
            if let Ok(value) = HeaderValue::from_str(&matched.pattern) {
                headers.insert(MATCHED_PATH_HEADER, value);
            }
            if let Ok(value) = HeaderValue::from_str(&encode_params(&matched.params)) {
                headers.insert(MATCHED_PARAMS_HEADER, value);
            }
        }

        let internal: Vec<HeaderName> = headers
            .keys()
            .filter(|name| name.as_str().starts_with(INTERNAL_HEADER_PREFIX))
            .cloned()
            .collect();
        for name in internal {
            headers.remove(name);
        }

        response
    }
}

/// A client navigation rendered inside the route it started from.
struct Interception<'a> {
    source: &'a RouteDescriptor,
    source_params: Params,
    source_path: String,
    /// Captured by the intercept entry from the target pathname.
    target_params: Params,
}

/// Whether the client asked for the payload instead of HTML.
fn accepts_payload(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(PAYLOAD_CONTENT_TYPE))
}

/// Url-encoded `name=value` pairs; catch-all values are joined with `/`.
pub fn encode_params(params: &Params) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(&value.joined())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode a decoded pathname for a `Location` header, keeping `/`.
fn encode_pathname(pathname: &str) -> String {
    pathname
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

fn location_response(location: &str, status: StatusCode) -> Result<Response<Body>, http::Error> {
    Response::builder()
        .status(status)
        .header(LOCATION, location)
        .body(Body::empty())
}

fn payload_response(rows: &[Row], status: StatusCode) -> Result<Response<Body>, http::Error> {
    let body: Vec<u8> = rows.iter().flat_map(|row| row.to_line()).collect();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, PAYLOAD_CONTENT_TYPE)
        .header(CACHE_CONTROL, CacheDirective::NoStore.cache_control())
        .body(Body::from(body))
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
    response
}

fn plain_status(status: StatusCode) -> Response<Body> {
    text_response(status, status.canonical_reason().unwrap_or("error").to_lowercase())
}

fn error_response(logger: &StructuredLogger, err: &EngineError) -> Response<Body> {
    let status = err.status();
    if status.is_server_error() {
        logger
            .error_builder("request failed")
            .field("error", err.to_string())
            .field_i64("status", i64::from(status.as_u16()))
            .emit();
    } else {
        logger
            .warn_builder("request rejected")
            .field("error", err.to_string())
            .field_i64("status", i64::from(status.as_u16()))
            .emit();
    }

    let message = match err {
        EngineError::Render { digest, .. } => format!("internal server error (digest {})", digest),
        err if status.is_server_error()
            && !matches!(
                err,
                EngineError::Proxy(_) | EngineError::NoProxy(_) | EngineError::StaticBailout { .. }
            ) =>
        {
            "internal server error".to_string()
        }
        err => err.to_string(),
    };
    let mut response = text_response(status, message);
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
