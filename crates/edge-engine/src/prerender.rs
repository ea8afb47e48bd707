//! Layout pre-render pass.
//!
//! Before streaming starts, each ancestor layout is evaluated once, outermost
//! first, only to detect a redirect or access signal. When the route has a
//! loading boundary a layout that suspends is not awaited.

use edge_router::{path_segments, Params, RouteDescriptor, RouteTable, ViewRef};
use futures::FutureExt;

use crate::compose::{compose_fallback, TreeNode};
use crate::signal::{ControlSignal, ViewError};
use crate::view::{ViewProps, ViewRegistry};

/// A signal raised by the layout at `layout_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSignal {
    pub layout_index: usize,
    pub signal: ControlSignal,
}

/// Evaluate the route's layouts and return the first signal raised.
pub async fn prerender_layouts(
    route: &RouteDescriptor,
    params: &Params,
    pathname: &str,
    views: &ViewRegistry,
) -> Option<LayoutSignal> {
    let segments = path_segments(pathname);
    let suspendable = route.loading.is_some();

    for (index, layout) in route.layouts.iter().enumerate() {
        let Some(view) = views.get(layout) else {
            continue;
        };
        let depth = route.layout_depths.get(index).copied().unwrap_or(index);
        let props = ViewProps {
            params: params.clone(),
            segments: segments.iter().take(depth).map(|s| s.to_string()).collect(),
            error: None,
        };

        let render = view.render(props);
        let result = if suspendable {
            match render.now_or_never() {
                Some(result) => result,
                None => continue,
            }
        } else {
            render.await
        };

        if let Err(ViewError::Signal(signal)) = result {
            return Some(LayoutSignal {
                layout_index: index,
                signal,
            });
        }
    }

    None
}

/// Tree rendered for an access signal raised by a layout.
///
/// The nearest not-found view declared by a layout above the failing one
/// catches a not-found; the tree then holds only the layouts down to that
/// boundary. Otherwise the table-level view renders inside the root layout,
/// unless the root layout itself raised the signal.
pub fn restricted_tree(
    route: &RouteDescriptor,
    table: &RouteTable,
    pathname: &str,
    raised: &LayoutSignal,
) -> Option<TreeNode> {
    let index = raised.layout_index;

    if raised.signal == ControlSignal::NotFound {
        let nearest = route.layout_not_founds[..index.min(route.layout_not_founds.len())]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, view)| view.as_ref().map(|v| (i, v)));
        if let Some((boundary_index, view)) = nearest {
            return Some(compose_fallback(Some(route), table, boundary_index + 1, view, pathname));
        }
    }

    let global: Option<&ViewRef> = match raised.signal {
        ControlSignal::NotFound => table.not_found.as_ref(),
        ControlSignal::Forbidden => table.forbidden.as_ref(),
        ControlSignal::Unauthorized => table.unauthorized.as_ref(),
        ControlSignal::Redirect { .. } => None,
    };
    global.map(|view| compose_fallback(Some(route), table, index.min(1), view, pathname))
}
