//! View tree composition.
//!
//! Composition is a pure function of the route descriptor, the table-level
//! fallbacks and the navigation, so composing twice yields the same tree.
//!
//! ```text
//! ErrorBoundary(global-error)
//! └── Template*
//!     └── Scope(depth 0)
//!         └── Layout(root)            slots attached at index 0
//!             └── AccessBoundary?     root's own not-found
//!                 └── ErrorBoundary?  root's own error
//!                     └── Scope(depth 1) ... innermost layout
//!                         └── AccessBoundary(nearest not-found, forbidden, unauthorized)
//!                             └── ErrorBoundary?(leaf error)
//!                                 └── Loading?
//!                                     └── Page
//! ```

use edge_router::{path_segments, ParallelSlot, Params, RouteDescriptor, RouteTable, ViewRef};

use crate::signal::ControlSignal;

/// Role of a view in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Layout,
    Template,
    Page,
    SlotLayout,
    SlotPage,
    /// Not-found, forbidden or unauthorized view rendered in place of a route.
    Fallback,
}

/// Views rendered for access signals caught by a boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessFallbacks {
    pub not_found: Option<ViewRef>,
    pub forbidden: Option<ViewRef>,
    pub unauthorized: Option<ViewRef>,
}

impl AccessFallbacks {
    pub fn is_empty(&self) -> bool {
        self.not_found.is_none() && self.forbidden.is_none() && self.unauthorized.is_none()
    }

    /// The view catching `signal`, if any.
    pub fn for_signal(&self, signal: &ControlSignal) -> Option<&ViewRef> {
        match signal {
            ControlSignal::NotFound => self.not_found.as_ref(),
            ControlSignal::Forbidden => self.forbidden.as_ref(),
            ControlSignal::Unauthorized => self.unauthorized.as_ref(),
            ControlSignal::Redirect { .. } => None,
        }
    }
}

/// A composed view tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// Leaf with nothing to render.
    Placeholder,
    View {
        view: ViewRef,
        kind: ViewKind,
        /// Parameters overriding the route's (intercepted pages).
        params: Option<Params>,
        children: Option<Box<TreeNode>>,
        slots: Vec<(String, TreeNode)>,
    },
    Loading {
        fallback: ViewRef,
        child: Box<TreeNode>,
    },
    ErrorBoundary {
        fallback: ViewRef,
        child: Box<TreeNode>,
    },
    AccessBoundary {
        fallbacks: AccessFallbacks,
        child: Box<TreeNode>,
    },
    /// Layout scope at `depth`, carrying the path segments above it.
    Scope {
        depth: usize,
        segments: Vec<String>,
        child: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn view(kind: ViewKind, view: impl Into<ViewRef>) -> Self {
        Self::View {
            view: view.into(),
            kind,
            params: None,
            children: None,
            slots: Vec::new(),
        }
    }

    fn wrap(kind: ViewKind, view: &ViewRef, child: TreeNode, slots: Vec<(String, TreeNode)>) -> Self {
        Self::View {
            view: view.clone(),
            kind,
            params: None,
            children: Some(Box::new(child)),
            slots,
        }
    }

    /// Every view reference in the tree, in depth-first order.
    pub fn view_refs(&self) -> Vec<&ViewRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a ViewRef>) {
        match self {
            Self::Placeholder => {}
            Self::View {
                view,
                children,
                slots,
                ..
            } => {
                refs.push(view);
                if let Some(child) = children {
                    child.collect_refs(refs);
                }
                for (_, slot) in slots {
                    slot.collect_refs(refs);
                }
            }
            Self::Loading { fallback, child } | Self::ErrorBoundary { fallback, child } => {
                refs.push(fallback);
                child.collect_refs(refs);
            }
            Self::AccessBoundary { fallbacks, child } => {
                refs.extend(fallbacks.not_found.iter());
                refs.extend(fallbacks.forbidden.iter());
                refs.extend(fallbacks.unauthorized.iter());
                child.collect_refs(refs);
            }
            Self::Scope { child, .. } => child.collect_refs(refs),
        }
    }
}

/// Navigation inputs to composition.
#[derive(Debug, Clone, Copy)]
pub struct ComposeOptions<'a> {
    /// Pathname the route matched.
    pub pathname: &'a str,
    /// Navigation target checked against intercepting entries. `None` for
    /// hard navigations, which always render the slot's own content.
    pub intercept: Option<&'a str>,
}

impl<'a> ComposeOptions<'a> {
    pub fn new(pathname: &'a str) -> Self {
        Self {
            pathname,
            intercept: None,
        }
    }

    pub fn with_intercept(mut self, target: &'a str) -> Self {
        self.intercept = Some(target);
        self
    }
}

/// Compose the full tree for a matched page route.
pub fn compose(route: &RouteDescriptor, table: &RouteTable, options: &ComposeOptions<'_>) -> TreeNode {
    let mut node = match route.page_view() {
        Some(page) => TreeNode::view(ViewKind::Page, page),
        None => TreeNode::Placeholder,
    };

    if let Some(loading) = &route.loading {
        node = TreeNode::Loading {
            fallback: loading.clone(),
            child: Box::new(node),
        };
    }

    if let Some(error) = &route.error {
        let innermost = route.layout_errors.last().and_then(Option::as_ref);
        if innermost != Some(error) {
            node = TreeNode::ErrorBoundary {
                fallback: error.clone(),
                child: Box::new(node),
            };
        }
    }

    let fallbacks = AccessFallbacks {
        not_found: route
            .not_found
            .clone()
            .or_else(|| route.layout_not_founds.iter().rev().flatten().next().cloned())
            .or_else(|| table.not_found.clone()),
        forbidden: route.forbidden.clone().or_else(|| table.forbidden.clone()),
        unauthorized: route.unauthorized.clone().or_else(|| table.unauthorized.clone()),
    };
    if !fallbacks.is_empty() {
        node = TreeNode::AccessBoundary {
            fallbacks,
            child: Box::new(node),
        };
    }

    node = wrap_layouts(route, route.layouts.len(), node, options.pathname, Some(options));

    for template in route.templates.iter().rev() {
        node = TreeNode::wrap(ViewKind::Template, template, node, Vec::new());
    }

    wrap_global(table, node)
}

/// Compose a fallback view inside the first `depth` layouts of `route`, or
/// inside the table's root layout when there is no route.
pub fn compose_fallback(
    route: Option<&RouteDescriptor>,
    table: &RouteTable,
    depth: usize,
    fallback: &ViewRef,
    pathname: &str,
) -> TreeNode {
    let leaf = TreeNode::view(ViewKind::Fallback, fallback);
    let node = match (route, &table.root_layout) {
        (Some(route), _) => wrap_layouts(route, depth.min(route.layouts.len()), leaf, pathname, None),
        (None, Some(root)) if depth > 0 => TreeNode::Scope {
            depth: 0,
            segments: Vec::new(),
            child: Box::new(TreeNode::wrap(ViewKind::Layout, root, leaf, Vec::new())),
        },
        _ => leaf,
    };
    wrap_global(table, node)
}

fn wrap_layouts(
    route: &RouteDescriptor,
    upto: usize,
    mut node: TreeNode,
    pathname: &str,
    slots: Option<&ComposeOptions<'_>>,
) -> TreeNode {
    let segments = path_segments(pathname);

    for index in (0..upto).rev() {
        if let Some(Some(error)) = route.layout_errors.get(index) {
            node = TreeNode::ErrorBoundary {
                fallback: error.clone(),
                child: Box::new(node),
            };
        }
        if let Some(Some(not_found)) = route.layout_not_founds.get(index) {
            node = TreeNode::AccessBoundary {
                fallbacks: AccessFallbacks {
                    not_found: Some(not_found.clone()),
                    ..Default::default()
                },
                child: Box::new(node),
            };
        }

        let attached = match slots {
            Some(options) => route
                .slots
                .iter()
                .filter(|(_, slot)| slot.resolved_layout_index(route.layouts.len()) == index)
                .map(|(name, slot)| (name.clone(), compose_slot(slot, options)))
                .collect(),
            None => Vec::new(),
        };
        node = TreeNode::wrap(ViewKind::Layout, &route.layouts[index], node, attached);

        let depth = route.layout_depths.get(index).copied().unwrap_or(index);
        node = TreeNode::Scope {
            depth,
            segments: segments.iter().take(depth).map(|s| s.to_string()).collect(),
            child: Box::new(node),
        };
    }

    node
}

fn compose_slot(slot: &ParallelSlot, options: &ComposeOptions<'_>) -> TreeNode {
    let intercepted = options.intercept.and_then(|target| {
        slot.intercepts
            .iter()
            .find_map(|entry| entry.capture(target).map(|params| (entry, params)))
    });

    let mut node = match intercepted {
        Some((entry, params)) => TreeNode::View {
            view: entry.page.clone(),
            kind: ViewKind::SlotPage,
            params: Some(params),
            children: None,
            slots: Vec::new(),
        },
        None => match slot.page.as_ref().or(slot.default.as_ref()) {
            Some(page) => TreeNode::view(ViewKind::SlotPage, page),
            None => TreeNode::Placeholder,
        },
    };

    if let Some(loading) = &slot.loading {
        node = TreeNode::Loading {
            fallback: loading.clone(),
            child: Box::new(node),
        };
    }
    if let Some(error) = &slot.error {
        node = TreeNode::ErrorBoundary {
            fallback: error.clone(),
            child: Box::new(node),
        };
    }
    if let Some(layout) = &slot.layout {
        node = TreeNode::wrap(ViewKind::SlotLayout, layout, node, Vec::new());
    }
    node
}

fn wrap_global(table: &RouteTable, node: TreeNode) -> TreeNode {
    match &table.global_error {
        Some(global) => TreeNode::ErrorBoundary {
            fallback: global.clone(),
            child: Box::new(node),
        },
        None => node,
    }
}
