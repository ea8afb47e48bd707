//! Description phase: renders a composed tree into payload rows.
//!
//! The shell renders up to loading boundaries; each loading boundary defers
//! its content into a future that resolves to a chunk row while the response
//! streams. Boundaries catch what they match on the way up. A deferred
//! subtree that fails after the shell was sent resolves its error against
//! the boundary frames recorded when it was deferred and yields a replace
//! row instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use edge_observability::StructuredLogger;
use edge_router::{Params, ViewRef};
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, FuturesUnordered};
use futures::{FutureExt, StreamExt};
use http::StatusCode;

use crate::compose::{AccessFallbacks, TreeNode};
use crate::digest::ErrorInfo;
use crate::payload::Row;
use crate::signal::{ControlSignal, Failure, ViewError};
use crate::view::{Node, ViewProps, ViewRegistry};

/// Future resolving to the rows of one deferred subtree.
pub type DeferredRows = BoxFuture<'static, Vec<Row>>;

#[derive(Debug, Clone)]
enum Frame {
    Error { id: usize, fallback: ViewRef },
    Access { id: usize, fallbacks: AccessFallbacks },
}

#[derive(Debug, Clone, Default)]
struct RenderContext {
    params: Params,
    segments: Vec<String>,
    frames: Vec<Frame>,
    deferred: bool,
}

/// The rendered shell and the content still streaming.
pub struct ShellOutput {
    pub root: Node,
    /// Status set by a boundary that caught an error or access signal.
    pub status: Option<StatusCode>,
    pub deferred: FuturesUnordered<DeferredRows>,
}

/// Renders one request's tree.
pub struct Renderer {
    views: Arc<ViewRegistry>,
    dev: bool,
    logger: StructuredLogger,
    next_id: AtomicUsize,
    deferred: Mutex<Vec<DeferredRows>>,
    caught: Mutex<Option<StatusCode>>,
}

impl Renderer {
    pub fn new(views: Arc<ViewRegistry>, dev: bool, logger: StructuredLogger) -> Arc<Self> {
        Arc::new(Self {
            views,
            dev,
            logger,
            next_id: AtomicUsize::new(0),
            deferred: Mutex::new(Vec::new()),
            caught: Mutex::new(None),
        })
    }

    /// Render the shell of `tree`.
    ///
    /// Errors no boundary caught are returned; deferred content is dropped
    /// in that case.
    pub async fn render_shell(self: &Arc<Self>, tree: &TreeNode, params: Params) -> Result<ShellOutput, ViewError> {
        let ctx = RenderContext {
            params,
            ..Default::default()
        };
        let result = self.render(tree, ctx).await;
        let deferred: Vec<DeferredRows> = std::mem::take(&mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner));
        let root = result?;
        let status = *self.caught.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ShellOutput {
            root,
            status,
            deferred: deferred.into_iter().collect(),
        })
    }

    /// Sanitize a failure and log it with its digest.
    pub fn report(&self, failure: &Failure) -> ErrorInfo {
        let info = ErrorInfo::sanitize(failure, self.dev);
        self.logger.failure("view", &failure.message, &info.digest);
        info
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn defer(&self, rows: DeferredRows) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rows);
    }

    fn catch(&self, status: StatusCode) {
        let mut caught = self.caught.lock().unwrap_or_else(PoisonError::into_inner);
        if caught.is_none() {
            *caught = Some(status);
        }
    }

    async fn render_view(&self, view: &ViewRef, ctx: &RenderContext, error: Option<ErrorInfo>) -> Result<Node, ViewError> {
        let registered = self
            .views
            .get(view)
            .ok_or_else(|| ViewError::failure(format!("view not registered: {}", view)))?;
        let props = ViewProps {
            params: ctx.params.clone(),
            segments: ctx.segments.clone(),
            error,
        };
        registered.render(props).await
    }

    fn render<'a>(self: &'a Arc<Self>, node: &'a TreeNode, ctx: RenderContext) -> BoxFuture<'a, Result<Node, ViewError>> {
        async move {
            match node {
                TreeNode::Placeholder => Ok(Node::Empty),

                TreeNode::View {
                    view,
                    params,
                    children,
                    slots,
                    ..
                } => {
                    let ctx = match params {
                        Some(params) => RenderContext {
                            params: params.clone(),
                            ..ctx
                        },
                        None => ctx,
                    };
                    let rendered = self.render_view(view, &ctx, None).await?;
                    let outlet = match children {
                        Some(child) => self.render(child, ctx.clone()).await?,
                        None => Node::Empty,
                    };
                    let mut filled = BTreeMap::new();
                    for (name, slot) in slots {
                        filled.insert(name.clone(), self.render(slot, ctx.clone()).await?);
                    }
                    Ok(rendered.fill(&outlet, &filled))
                }

                TreeNode::Loading { fallback, child } => {
                    if ctx.deferred {
                        return self.render(child, ctx).await;
                    }
                    let id = self.next_id();
                    let fallback = self.render_view(fallback, &ctx, None).await?;
                    let renderer = Arc::clone(self);
                    let child = (**child).clone();
                    let deferred = RenderContext {
                        deferred: true,
                        ..ctx
                    };
                    self.defer(async move { renderer.render_deferred(id, child, deferred).await }.boxed());
                    Ok(Node::Suspense {
                        id,
                        fallback: Box::new(fallback),
                    })
                }

                TreeNode::ErrorBoundary { fallback, child } => {
                    let id = self.next_id();
                    let mut inner = ctx.clone();
                    inner.frames.push(Frame::Error {
                        id,
                        fallback: fallback.clone(),
                    });
                    match self.render(child, inner).await {
                        Ok(node) => Ok(boundary(id, node)),
                        Err(ViewError::Failure(failure)) => {
                            let info = self.report(&failure);
                            if !ctx.deferred {
                                self.catch(StatusCode::INTERNAL_SERVER_ERROR);
                            }
                            let node = self.render_view(fallback, &ctx, Some(info)).await?;
                            Ok(boundary(id, node))
                        }
                        Err(other) => Err(other),
                    }
                }

                TreeNode::AccessBoundary { fallbacks, child } => {
                    let id = self.next_id();
                    let mut inner = ctx.clone();
                    inner.frames.push(Frame::Access {
                        id,
                        fallbacks: fallbacks.clone(),
                    });
                    match self.render(child, inner).await {
                        Ok(node) => Ok(boundary(id, node)),
                        Err(ViewError::Signal(signal)) => match fallbacks.for_signal(&signal) {
                            Some(view) => {
                                self.logger.signal(signal.name(), view);
                                if !ctx.deferred {
                                    self.catch(signal.status());
                                }
                                let node = self.render_view(view, &ctx, None).await?;
                                Ok(boundary(id, node))
                            }
                            None => Err(ViewError::Signal(signal)),
                        },
                        Err(other) => Err(other),
                    }
                }

                TreeNode::Scope { segments, child, .. } => {
                    let ctx = RenderContext {
                        segments: segments.clone(),
                        ..ctx
                    };
                    self.render(child, ctx).await
                }
            }
        }
        .boxed()
    }

    async fn render_deferred(self: Arc<Self>, id: usize, child: TreeNode, ctx: RenderContext) -> Vec<Row> {
        match self.render(&child, ctx.clone()).await {
            Ok(node) => vec![Row::Chunk { id, node }],
            Err(err) => vec![self.resolve_late(err, &ctx).await],
        }
    }

    async fn resolve_late(&self, mut err: ViewError, ctx: &RenderContext) -> Row {
        for (depth, frame) in ctx.frames.iter().enumerate().rev() {
            let outer = RenderContext {
                frames: ctx.frames[..depth].to_vec(),
                ..ctx.clone()
            };
            let (id, view, error) = match (frame, &err) {
                (Frame::Error { id, fallback }, ViewError::Failure(failure)) => {
                    (*id, fallback, Some(self.report(failure)))
                }
                (Frame::Access { id, fallbacks }, ViewError::Signal(signal)) => {
                    match fallbacks.for_signal(signal) {
                        Some(view) => (*id, view, None),
                        None => continue,
                    }
                }
                _ => continue,
            };
            match self.render_view(view, &outer, error).await {
                Ok(node) => return Row::Replace { boundary: id, node },
                Err(next) => err = next,
            }
        }

        match err {
            ViewError::Signal(ControlSignal::Redirect {
                destination,
                kind,
                status,
            }) => Row::Redirect {
                location: destination,
                kind,
                status,
            },
            ViewError::Signal(signal) => Row::Error {
                digest: signal.digest(),
                message: signal.name().to_string(),
            },
            ViewError::Failure(failure) => {
                let info = self.report(&failure);
                Row::Error {
                    digest: info.digest,
                    message: info.message,
                }
            }
            bailout @ ViewError::StaticBailout { .. } => {
                let info = self.report(&Failure::new(bailout.to_string()));
                Row::Error {
                    digest: info.digest,
                    message: info.message,
                }
            }
        }
    }
}

fn boundary(id: usize, node: Node) -> Node {
    Node::Boundary {
        id,
        child: Box::new(node),
    }
}

/// Root row followed by deferred rows in completion order.
pub fn payload_rows(root: Row, deferred: FuturesUnordered<DeferredRows>) -> BoxStream<'static, Row> {
    stream::once(future::ready(root))
        .chain(deferred.flat_map(stream::iter))
        .boxed()
}
