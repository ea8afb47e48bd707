//! Render-time cache controls for view code.

use edge_cache::Revalidate;

use crate::scope::RequestScope;

/// Lower the revalidation period of the current render to `seconds`.
///
/// The effective period is the minimum of the route declaration and every
/// call made while rendering the shell.
pub fn revalidate(seconds: u64) {
    if let Some(scope) = RequestScope::current() {
        scope.lower_revalidate(Revalidate::Seconds(seconds));
    }
}

/// Opt the current render out of caching, as if request state were read.
pub fn no_store() {
    if let Some(scope) = RequestScope::current() {
        // Only the force-static / error distinction matters here.
        let _ = scope.mark_dynamic("no_store");
    }
}
