//! Views and the view registry.
//!
//! Route descriptors reference views by name. The registry resolves those
//! names once at startup; rendering walks the composed tree and calls the
//! registered views.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use edge_router::Params;
use serde::{Deserialize, Serialize};

use crate::digest::ErrorInfo;
use crate::signal::ViewError;

/// Rendered description of a view.
///
/// Layouts and templates mark where their children go with `Outlet` and
/// where a parallel slot goes with `Slot`. `Suspense` and `Boundary` are
/// produced by the renderer, never by views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Empty,
    Text(String),
    Element {
        tag: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attrs: Vec<(String, String)>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<Node>,
    },
    Fragment(Vec<Node>),
    Outlet,
    Slot(String),
    /// Loading fallback; the content arrives in chunk row `id`.
    Suspense { id: usize, fallback: Box<Node> },
    /// Region a replace row for `id` swaps out.
    Boundary { id: usize, child: Box<Node> },
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn element(tag: impl Into<String>) -> Self {
        Self::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn fragment(children: Vec<Node>) -> Self {
        Self::Fragment(children)
    }

    /// Add an attribute. No effect on non-elements.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Element { attrs, .. } = &mut self {
            attrs.push((name.into(), value.into()));
        }
        self
    }

    /// Append a child. No effect on non-elements.
    pub fn child(mut self, node: Node) -> Self {
        if let Self::Element { children, .. } = &mut self {
            children.push(node);
        }
        self
    }

    /// Substitute the rendered children and slots for their placeholders.
    pub fn fill(self, outlet: &Node, slots: &BTreeMap<String, Node>) -> Node {
        match self {
            Self::Outlet => outlet.clone(),
            Self::Slot(name) => slots.get(&name).cloned().unwrap_or(Self::Empty),
            Self::Element {
                tag,
                attrs,
                children,
            } => Self::Element {
                tag,
                attrs,
                children: children.into_iter().map(|c| c.fill(outlet, slots)).collect(),
            },
            Self::Fragment(children) => {
                Self::Fragment(children.into_iter().map(|c| c.fill(outlet, slots)).collect())
            }
            other => other,
        }
    }
}

/// Inputs passed to a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewProps {
    /// Route parameters (an intercepted page sees its own captures).
    pub params: Params,
    /// Path segments above the enclosing layout scope.
    pub segments: Vec<String>,
    /// Sanitized error, for error-boundary views.
    pub error: Option<ErrorInfo>,
}

impl ViewProps {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// A single-segment parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_str())
    }
}

/// A renderable view.
///
/// A view may suspend while loading data; signals and failures are returned
/// as `ViewError`.
#[async_trait]
pub trait View: Send + Sync {
    async fn render(&self, props: ViewProps) -> Result<Node, ViewError>;
}

/// Adapts an async closure into a view.
pub struct FnView<F>(pub F);

#[async_trait]
impl<F, Fut> View for FnView<F>
where
    F: Fn(ViewProps) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Node, ViewError>> + Send,
{
    async fn render(&self, props: ViewProps) -> Result<Node, ViewError> {
        (self.0)(props).await
    }
}

/// A view that always renders the same node.
pub struct StaticView(pub Node);

#[async_trait]
impl View for StaticView {
    async fn render(&self, _props: ViewProps) -> Result<Node, ViewError> {
        Ok(self.0.clone())
    }
}

/// Views by name.
#[derive(Clone, Default)]
pub struct ViewRegistry {
    views: HashMap<String, Arc<dyn View>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view.
    pub fn with_view(mut self, name: impl Into<String>, view: impl View + 'static) -> Self {
        self.views.insert(name.into(), Arc::new(view));
        self
    }

    /// Register an async closure.
    pub fn with_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ViewProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Node, ViewError>> + Send + 'static,
    {
        self.with_view(name, FnView(f))
    }

    /// Register a view that renders a fixed node.
    pub fn with_static(self, name: impl Into<String>, node: Node) -> Self {
        self.with_view(name, StaticView(node))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn View>> {
        self.views.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.views.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.views.keys().collect();
        names.sort();
        f.debug_struct("ViewRegistry").field("views", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_outlet_and_slots() {
        let layout = Node::element("main")
            .child(Node::Slot("modal".to_string()))
            .child(Node::Outlet)
            .child(Node::Slot("missing".to_string()));
        let mut slots = BTreeMap::new();
        slots.insert("modal".to_string(), Node::text("modal"));

        let filled = layout.fill(&Node::text("page"), &slots);
        assert_eq!(
            filled,
            Node::element("main")
                .child(Node::text("modal"))
                .child(Node::text("page"))
                .child(Node::Empty)
        );
    }

    #[test]
    fn test_node_json_shape() {
        let node = Node::element("p").attr("class", "lead").child(Node::text("hi"));
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(
            json,
            r#"{"element":{"tag":"p","attrs":[["class","lead"]],"children":[{"text":"hi"}]}}"#
        );
    }

    #[tokio::test]
    async fn test_registry_resolves_fn_views() {
        let registry = ViewRegistry::new()
            .with_fn("post", |props: ViewProps| async move {
                Ok(Node::text(props.param("slug").unwrap_or("?").to_string()))
            })
            .with_static("footer", Node::text("footer"));

        let mut params = Params::new();
        params.insert("slug".to_string(), edge_router::ParamValue::Single("hello".to_string()));
        let node = registry.get("post").unwrap().render(ViewProps::new(params)).await.unwrap();
        assert_eq!(node, Node::text("hello"));
        assert!(registry.contains("footer"));
        assert!(registry.get("header").is_none());
        assert_eq!(registry.len(), 2);
    }
}
