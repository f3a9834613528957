//! Proxy-avoidance decisions
//!
//! When a session forwards its traffic upstream, any registered plugin can
//! force a request to be handled locally so that its interception chain runs.

use crate::plugin::{PluginError, PluginSlot};
use serde_json::Value;
use tracing::debug;
use warp::http::Method;

/// Ask every plugin, in registration order, whether `method route` must stay local.
///
/// Returns `true` on the first vote to avoid the proxy and `false` when no
/// plugin objects (or none is registered). A plugin that never implemented the
/// predicate fails the whole evaluation.
pub fn should_handle_locally(
    plugins: &[PluginSlot],
    method: &Method,
    route: &str,
    body: Option<&Value>,
) -> Result<bool, PluginError> {
    for slot in plugins {
        if slot.instance().should_avoid_proxy(method, route, body)? {
            debug!(
                plugin = %slot.name(),
                method = %method,
                route = %route,
                "Plugin requested local handling"
            );
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
