//! Navigation state for view code.

use edge_core::QueryParams;
use edge_router::Params;

use crate::scope::RequestScope;
use crate::signal::ViewError;

/// Pathname of the current navigation, `None` outside a request.
pub fn pathname() -> Option<String> {
    RequestScope::current().map(|scope| scope.navigation().pathname)
}

/// Matched route parameters; empty outside a request.
pub fn params() -> Params {
    RequestScope::current()
        .map(|scope| scope.navigation().params)
        .unwrap_or_default()
}

/// Query parameters. Reading them marks the render as dynamic.
pub fn search_params() -> Result<QueryParams, ViewError> {
    let scope = RequestScope::current().ok_or_else(|| {
        ViewError::failure("search_params() was called outside a request scope")
    })?;
    Ok(if scope.mark_dynamic("search_params")? {
        scope.navigation().query
    } else {
        QueryParams::new()
    })
}
