//! Route descriptors and the route table.

use std::collections::BTreeMap;

use edge_cache::SegmentConfig;
use serde::{Deserialize, Serialize};

use crate::pattern::{match_tokens, parse_pattern, path_segments, Params, PatternError, PatternToken};

/// Reference to a view in the view registry.
pub type ViewRef = String;

/// Errors from building or validating a route table.
#[derive(Debug, thiserror::Error)]
pub enum RouteTableError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("route {0} declares both a page and a handler")]
    BothLeaves(String),

    #[error("route {0} declares neither a page nor a handler")]
    NoLeaf(String),

    #[error("route {pattern}: {field} has {actual} entries, expected {expected} (one per layout)")]
    LengthMismatch {
        pattern: String,
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("route {pattern}: slot '{slot}' targets layout {index} but only {layouts} layouts exist")]
    SlotOutOfRange {
        pattern: String,
        slot: String,
        index: i32,
        layouts: usize,
    },

    #[error("failed to parse route table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Leaf of a route: a page rendered inside the layouts, or a raw request handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteLeaf {
    Page(ViewRef),
    Handler(String),
}

/// Convention tag of an intercepting route, relative to the slot that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterceptConvention {
    /// `(.)` - same level.
    #[serde(rename = "(.)")]
    SameLevel,
    /// `(..)` - one level up.
    #[serde(rename = "(..)")]
    OneLevelUp,
    /// `(..)(..)` - two levels up.
    #[serde(rename = "(..)(..)", alias = "(....)")]
    TwoLevelsUp,
    /// `(...)` - from the application root.
    #[serde(rename = "(...)")]
    FromRoot,
}

/// An intercepting-route entry of a parallel slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterceptEntry", into = "RawInterceptEntry")]
pub struct InterceptEntry {
    /// Resolved pattern of the navigation target being intercepted.
    pub target: String,
    pub tokens: Vec<PatternToken>,
    pub convention: InterceptConvention,
    /// Page rendered in the slot instead of the slot's own content.
    pub page: ViewRef,
    /// Names of the parameters the target pattern captures.
    pub params: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct RawInterceptEntry {
    target: String,
    convention: InterceptConvention,
    page: ViewRef,
}

impl TryFrom<RawInterceptEntry> for InterceptEntry {
    type Error = RouteTableError;

    fn try_from(raw: RawInterceptEntry) -> Result<Self, Self::Error> {
        InterceptEntry::new(raw.target, raw.convention, raw.page)
    }
}

impl From<InterceptEntry> for RawInterceptEntry {
    fn from(entry: InterceptEntry) -> Self {
        Self {
            target: entry.target,
            convention: entry.convention,
            page: entry.page,
        }
    }
}

impl InterceptEntry {
    /// Create an entry intercepting navigations to `target`.
    pub fn new(
        target: impl Into<String>,
        convention: InterceptConvention,
        page: impl Into<ViewRef>,
    ) -> Result<Self, RouteTableError> {
        let target = target.into();
        let tokens = parse_pattern(&target)?;
        let params = tokens
            .iter()
            .filter_map(|t| t.param_name().map(str::to_string))
            .collect();
        Ok(Self {
            target,
            tokens,
            convention,
            page: page.into(),
            params,
        })
    }

    /// Parameters captured when `pathname` is the intercepted target.
    pub fn capture(&self, pathname: &str) -> Option<Params> {
        match_tokens(&self.tokens, &path_segments(pathname))
    }
}

fn innermost() -> i32 {
    -1
}

/// A named, independently rendered sub-tree attached to a layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<ViewRef>,
    /// Rendered when the slot has no page for the current route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ViewRef>,
    /// Index of the layout the slot attaches to. `-1` is the innermost layout.
    #[serde(default = "innermost")]
    pub layout_index: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intercepts: Vec<InterceptEntry>,
}

impl ParallelSlot {
    /// Create a slot attached to the innermost layout.
    pub fn new() -> Self {
        Self {
            layout_index: innermost(),
            ..Default::default()
        }
    }

    /// Set the slot page.
    pub fn with_page(mut self, page: impl Into<ViewRef>) -> Self {
        self.page = Some(page.into());
        self
    }

    /// Set the slot default view.
    pub fn with_default(mut self, view: impl Into<ViewRef>) -> Self {
        self.default = Some(view.into());
        self
    }

    /// Set the slot's own layout.
    pub fn with_layout(mut self, view: impl Into<ViewRef>) -> Self {
        self.layout = Some(view.into());
        self
    }

    /// Set the slot loading boundary.
    pub fn with_loading(mut self, view: impl Into<ViewRef>) -> Self {
        self.loading = Some(view.into());
        self
    }

    /// Set the slot error boundary.
    pub fn with_error(mut self, view: impl Into<ViewRef>) -> Self {
        self.error = Some(view.into());
        self
    }

    /// Attach to a specific layout index.
    pub fn at_layout(mut self, index: i32) -> Self {
        self.layout_index = index;
        self
    }

    /// Add an intercepting entry.
    pub fn with_intercept(mut self, entry: InterceptEntry) -> Self {
        self.intercepts.push(entry);
        self
    }

    /// Resolve the concrete layout index given the number of layouts.
    pub fn resolved_layout_index(&self, layouts: usize) -> usize {
        if self.layout_index < 0 {
            layouts.saturating_sub(1)
        } else {
            self.layout_index as usize
        }
    }
}

/// Static record of one URL pattern's views and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRouteDescriptor", into = "RawRouteDescriptor")]
pub struct RouteDescriptor {
    pub pattern: String,
    pub tokens: Vec<PatternToken>,
    /// Whether any token captures a parameter.
    pub dynamic: bool,
    /// Ancestor layouts, outermost first.
    pub layouts: Vec<ViewRef>,
    /// Each layout's own error boundary, index-aligned with `layouts`.
    pub layout_errors: Vec<Option<ViewRef>>,
    /// Each layout's own not-found view, index-aligned with `layouts`.
    pub layout_not_founds: Vec<Option<ViewRef>>,
    /// Segment depth of each layout, index-aligned with `layouts`.
    pub layout_depths: Vec<usize>,
    /// Templates, outermost first.
    pub templates: Vec<ViewRef>,
    pub leaf: RouteLeaf,
    pub loading: Option<ViewRef>,
    pub error: Option<ViewRef>,
    pub not_found: Option<ViewRef>,
    pub forbidden: Option<ViewRef>,
    pub unauthorized: Option<ViewRef>,
    pub slots: BTreeMap<String, ParallelSlot>,
    pub config: SegmentConfig,
}

#[derive(Serialize, Deserialize)]
struct RawRouteDescriptor {
    pattern: String,
    #[serde(default)]
    layouts: Vec<ViewRef>,
    #[serde(default)]
    layout_errors: Vec<Option<ViewRef>>,
    #[serde(default)]
    layout_not_founds: Vec<Option<ViewRef>>,
    #[serde(default)]
    layout_depths: Vec<usize>,
    #[serde(default)]
    templates: Vec<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loading: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not_found: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forbidden: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unauthorized: Option<ViewRef>,
    #[serde(default)]
    slots: BTreeMap<String, ParallelSlot>,
    #[serde(default, flatten)]
    config: SegmentConfig,
}

impl TryFrom<RawRouteDescriptor> for RouteDescriptor {
    type Error = RouteTableError;

    fn try_from(raw: RawRouteDescriptor) -> Result<Self, Self::Error> {
        let leaf = match (raw.page, raw.handler) {
            (Some(page), None) => RouteLeaf::Page(page),
            (None, Some(handler)) => RouteLeaf::Handler(handler),
            (Some(_), Some(_)) => return Err(RouteTableError::BothLeaves(raw.pattern)),
            (None, None) => return Err(RouteTableError::NoLeaf(raw.pattern)),
        };

        let count = raw.layouts.len();
        let layout_errors = fill_or(raw.layout_errors, count, || None);
        let layout_not_founds = fill_or(raw.layout_not_founds, count, || None);
        let layout_depths = if raw.layout_depths.is_empty() {
            (0..count).collect()
        } else {
            raw.layout_depths
        };

        let mut descriptor = RouteDescriptor::new(raw.pattern, leaf)?;
        descriptor.layouts = raw.layouts;
        descriptor.layout_errors = layout_errors;
        descriptor.layout_not_founds = layout_not_founds;
        descriptor.layout_depths = layout_depths;
        descriptor.templates = raw.templates;
        descriptor.loading = raw.loading;
        descriptor.error = raw.error;
        descriptor.not_found = raw.not_found;
        descriptor.forbidden = raw.forbidden;
        descriptor.unauthorized = raw.unauthorized;
        descriptor.slots = raw.slots;
        descriptor.config = raw.config;
        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl From<RouteDescriptor> for RawRouteDescriptor {
    fn from(d: RouteDescriptor) -> Self {
        let (page, handler) = match d.leaf {
            RouteLeaf::Page(page) => (Some(page), None),
            RouteLeaf::Handler(handler) => (None, Some(handler)),
        };
        Self {
            pattern: d.pattern,
            layouts: d.layouts,
            layout_errors: d.layout_errors,
            layout_not_founds: d.layout_not_founds,
            layout_depths: d.layout_depths,
            templates: d.templates,
            page,
            handler,
            loading: d.loading,
            error: d.error,
            not_found: d.not_found,
            forbidden: d.forbidden,
            unauthorized: d.unauthorized,
            slots: d.slots,
            config: d.config,
        }
    }
}

/// Empty lists are filled to `len`; non-empty lists are kept for validation.
fn fill_or<T>(list: Vec<T>, len: usize, fill: impl Fn() -> T) -> Vec<T> {
    if list.is_empty() {
        (0..len).map(|_| fill()).collect()
    } else {
        list
    }
}

impl RouteDescriptor {
    /// Create a descriptor with no layouts.
    pub fn new(pattern: impl Into<String>, leaf: RouteLeaf) -> Result<Self, RouteTableError> {
        let pattern = pattern.into();
        let tokens = parse_pattern(&pattern)?;
        let dynamic = tokens.iter().any(PatternToken::is_dynamic);
        Ok(Self {
            pattern,
            tokens,
            dynamic,
            layouts: Vec::new(),
            layout_errors: Vec::new(),
            layout_not_founds: Vec::new(),
            layout_depths: Vec::new(),
            templates: Vec::new(),
            leaf,
            loading: None,
            error: None,
            not_found: None,
            forbidden: None,
            unauthorized: None,
            slots: BTreeMap::new(),
            config: SegmentConfig::default(),
        })
    }

    /// Create a page route.
    pub fn page(pattern: impl Into<String>, page: impl Into<ViewRef>) -> Result<Self, RouteTableError> {
        Self::new(pattern, RouteLeaf::Page(page.into()))
    }

    /// Create a request-handler route.
    pub fn handler(pattern: impl Into<String>, handler: impl Into<String>) -> Result<Self, RouteTableError> {
        Self::new(pattern, RouteLeaf::Handler(handler.into()))
    }

    /// Append a layout without boundaries.
    pub fn with_layout(self, view: impl Into<ViewRef>) -> Self {
        self.with_layout_boundaries(view, None::<ViewRef>, None::<ViewRef>)
    }

    /// Append a layout with its own error and not-found views.
    pub fn with_layout_boundaries(
        mut self,
        view: impl Into<ViewRef>,
        error: Option<impl Into<ViewRef>>,
        not_found: Option<impl Into<ViewRef>>,
    ) -> Self {
        let depth = self.layouts.len();
        self.layouts.push(view.into());
        self.layout_errors.push(error.map(Into::into));
        self.layout_not_founds.push(not_found.map(Into::into));
        self.layout_depths.push(depth);
        self
    }

    /// Append a template.
    pub fn with_template(mut self, view: impl Into<ViewRef>) -> Self {
        self.templates.push(view.into());
        self
    }

    /// Set the leaf loading view.
    pub fn with_loading(mut self, view: impl Into<ViewRef>) -> Self {
        self.loading = Some(view.into());
        self
    }

    /// Set the leaf error view.
    pub fn with_error(mut self, view: impl Into<ViewRef>) -> Self {
        self.error = Some(view.into());
        self
    }

    /// Set the leaf not-found view.
    pub fn with_not_found(mut self, view: impl Into<ViewRef>) -> Self {
        self.not_found = Some(view.into());
        self
    }

    /// Set the leaf forbidden view.
    pub fn with_forbidden(mut self, view: impl Into<ViewRef>) -> Self {
        self.forbidden = Some(view.into());
        self
    }

    /// Set the leaf unauthorized view.
    pub fn with_unauthorized(mut self, view: impl Into<ViewRef>) -> Self {
        self.unauthorized = Some(view.into());
        self
    }

    /// Add a named parallel slot.
    pub fn with_slot(mut self, name: impl Into<String>, slot: ParallelSlot) -> Self {
        self.slots.insert(name.into(), slot);
        self
    }

    /// Set the segment configuration.
    pub fn with_config(mut self, config: SegmentConfig) -> Self {
        self.config = config;
        self
    }

    /// The page view, if this is a page route.
    pub fn page_view(&self) -> Option<&ViewRef> {
        match &self.leaf {
            RouteLeaf::Page(page) => Some(page),
            RouteLeaf::Handler(_) => None,
        }
    }

    /// Match a normalized pathname against this route's pattern.
    pub fn matches(&self, pathname: &str) -> Option<Params> {
        match_tokens(&self.tokens, &path_segments(pathname))
    }

    /// Check the descriptor invariants.
    pub fn validate(&self) -> Result<(), RouteTableError> {
        let expected = self.layouts.len();
        let lists = [
            ("layout_errors", self.layout_errors.len()),
            ("layout_not_founds", self.layout_not_founds.len()),
            ("layout_depths", self.layout_depths.len()),
        ];
        for (field, actual) in lists {
            if actual != expected {
                return Err(RouteTableError::LengthMismatch {
                    pattern: self.pattern.clone(),
                    field,
                    expected,
                    actual,
                });
            }
        }

        for (name, slot) in &self.slots {
            let out_of_range = slot.layout_index < -1
                || (slot.layout_index >= 0 && slot.layout_index as usize >= expected.max(1));
            if out_of_range {
                return Err(RouteTableError::SlotOutOfRange {
                    pattern: self.pattern.clone(),
                    slot: name.clone(),
                    index: slot.layout_index,
                    layouts: expected,
                });
            }
        }

        Ok(())
    }
}

/// A route matched for a pathname.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    /// Position of the route in the table.
    pub index: usize,
    pub route: &'a RouteDescriptor,
    pub params: Params,
}

/// Ordered, read-only route table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub routes: Vec<RouteDescriptor>,
    /// Layout wrapping global fallbacks when no route matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_layout: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_found: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forbidden: Option<ViewRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized: Option<ViewRef>,
    /// Root error boundary, outside every layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_error: Option<ViewRef>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON route table.
    pub fn from_json(source: &str) -> Result<Self, RouteTableError> {
        let table: Self = serde_json::from_str(source)?;
        table.validate()?;
        Ok(table)
    }

    /// Append a route. Order matters: earlier routes win.
    pub fn with_route(mut self, route: RouteDescriptor) -> Self {
        self.routes.push(route);
        self
    }

    /// Set the root layout used for global fallbacks.
    pub fn with_root_layout(mut self, view: impl Into<ViewRef>) -> Self {
        self.root_layout = Some(view.into());
        self
    }

    /// Set the global not-found view.
    pub fn with_not_found(mut self, view: impl Into<ViewRef>) -> Self {
        self.not_found = Some(view.into());
        self
    }

    /// Set the global forbidden view.
    pub fn with_forbidden(mut self, view: impl Into<ViewRef>) -> Self {
        self.forbidden = Some(view.into());
        self
    }

    /// Set the global unauthorized view.
    pub fn with_unauthorized(mut self, view: impl Into<ViewRef>) -> Self {
        self.unauthorized = Some(view.into());
        self
    }

    /// Set the global error view.
    pub fn with_global_error(mut self, view: impl Into<ViewRef>) -> Self {
        self.global_error = Some(view.into());
        self
    }

    /// Validate every descriptor.
    pub fn validate(&self) -> Result<(), RouteTableError> {
        self.routes.iter().try_for_each(RouteDescriptor::validate)
    }

    /// First route, in table order, matching the pathname.
    pub fn match_path(&self, pathname: &str) -> Option<RouteMatch<'_>> {
        let segments = path_segments(pathname);
        self.routes.iter().enumerate().find_map(|(index, route)| {
            match_tokens(&route.tokens, &segments).map(|params| RouteMatch {
                index,
                route,
                params,
            })
        })
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParamValue;

    fn table() -> RouteTable {
        RouteTable::new()
            .with_route(RouteDescriptor::page("/blog/new", "new-post").unwrap())
            .with_route(RouteDescriptor::page("/blog/:slug", "post").unwrap())
            .with_route(RouteDescriptor::page("/:rest+", "catch-all").unwrap())
            .with_route(RouteDescriptor::page("/blog/featured", "never-reached").unwrap())
    }

    // === Matching Tests ===

    #[test]
    fn test_first_table_order_match_wins() {
        let table = table();

        assert_eq!(table.match_path("/blog/new").unwrap().route.page_view().unwrap(), "new-post");
        let post = table.match_path("/blog/hello").unwrap();
        assert_eq!(post.index, 1);
        assert_eq!(post.params["slug"], ParamValue::Single("hello".into()));
        // The catch-all precedes the literal route, so ordering decides.
        assert_eq!(
            table.match_path("/blog/featured/x").unwrap().route.page_view().unwrap(),
            "catch-all"
        );
        assert!(table.match_path("/").is_none());
    }

    #[test]
    fn test_dynamic_flag() {
        assert!(!RouteDescriptor::page("/about", "a").unwrap().dynamic);
        assert!(RouteDescriptor::page("/p/:id", "p").unwrap().dynamic);
    }

    // === Parsing Tests ===

    #[test]
    fn test_from_json_fills_boundary_lists() {
        let table = RouteTable::from_json(
            r#"{
                "routes": [{
                    "pattern": "/shop/:id",
                    "layouts": ["root", "shop"],
                    "layout_errors": [null, "shop-error"],
                    "page": "product",
                    "revalidate": 60,
                    "slots": {
                        "modal": {
                            "default": "modal-default",
                            "intercepts": [
                                {"target": "/photo/:pid", "convention": "(...)", "page": "photo-modal"}
                            ]
                        }
                    }
                }],
                "not_found": "global-404"
            }"#,
        )
        .unwrap();

        let route = &table.routes[0];
        assert_eq!(route.layout_not_founds, vec![None, None]);
        assert_eq!(route.layout_depths, vec![0, 1]);
        assert_eq!(route.layout_errors[1].as_deref(), Some("shop-error"));
        assert_eq!(route.config.revalidate, Some(edge_cache::Revalidate::Seconds(60)));

        let slot = &route.slots["modal"];
        assert_eq!(slot.layout_index, -1);
        assert_eq!(slot.resolved_layout_index(route.layouts.len()), 1);
        let intercept = &slot.intercepts[0];
        assert_eq!(intercept.convention, InterceptConvention::FromRoot);
        assert_eq!(intercept.params, vec!["pid".to_string()]);
        assert_eq!(
            intercept.capture("/photo/7").unwrap()["pid"],
            ParamValue::Single("7".into())
        );
    }

    #[test]
    fn test_from_json_rejects_both_leaves() {
        let err = RouteTable::from_json(
            r#"{"routes": [{"pattern": "/x", "page": "p", "handler": "h"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("both a page and a handler"));
    }

    #[test]
    fn test_from_json_rejects_missing_leaf() {
        let err = RouteTable::from_json(r#"{"routes": [{"pattern": "/x"}]}"#).unwrap_err();
        assert!(err.to_string().contains("neither a page nor a handler"));
    }

    #[test]
    fn test_validate_rejects_misaligned_lists() {
        let err = RouteTable::from_json(
            r#"{"routes": [{
                "pattern": "/x",
                "layouts": ["root", "x"],
                "layout_errors": ["only-one"],
                "page": "p"
            }]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("layout_errors"));
    }

    #[test]
    fn test_validate_rejects_slot_out_of_range() {
        let route = RouteDescriptor::page("/x", "p")
            .unwrap()
            .with_layout("root")
            .with_slot("side", ParallelSlot::new().at_layout(3));

        assert!(matches!(
            route.validate(),
            Err(RouteTableError::SlotOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_builder_keeps_lists_aligned() {
        let route = RouteDescriptor::page("/a/b", "page")
            .unwrap()
            .with_layout("root")
            .with_layout_boundaries("a", Some("a-error"), Some("a-404"));

        assert!(route.validate().is_ok());
        assert_eq!(route.layout_depths, vec![0, 1]);
        assert_eq!(route.layout_not_founds[1].as_deref(), Some("a-404"));
    }
}
