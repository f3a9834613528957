use super::*;
use crate::plugin::PluginManager;
use crate::test_utils::{BarePlugin, MockPlugin};
use serde_json::json;
use std::sync::Arc;

fn manager(plugins: Vec<Arc<dyn crate::plugin::Plugin>>) -> PluginManager {
    let mut manager = PluginManager::new();
    for plugin in plugins {
        manager.register_plugin(plugin).unwrap();
    }
    manager
}

#[test]
fn test_no_plugins_means_proxy() {
    let manager = manager(vec![]);
    assert!(!should_handle_locally(manager.slots(), &Method::GET, "/session/1/url", None).unwrap());
}

#[test]
fn test_any_vote_forces_local_handling() {
    let manager = manager(vec![
        Arc::new(MockPlugin::delegating("a")),
        Arc::new(MockPlugin::delegating("b").with_avoid_proxy(true)),
    ]);
    let body = json!({"url": "https://example.com"});
    assert!(should_handle_locally(
        manager.slots(),
        &Method::POST,
        "/session/1/url",
        Some(&body)
    )
    .unwrap());
}

#[test]
fn test_all_false_keeps_proxying() {
    let manager = manager(vec![
        Arc::new(MockPlugin::delegating("a")),
        Arc::new(MockPlugin::delegating("b")),
    ]);
    assert!(!manager
        .should_handle_locally(&Method::GET, "/session/1/title", None)
        .unwrap());
}

#[test]
fn test_unimplemented_predicate_is_an_error() {
    let manager = manager(vec![Arc::new(BarePlugin("bare"))]);
    let err = should_handle_locally(manager.slots(), &Method::GET, "/status", None).unwrap_err();
    assert!(matches!(
        err,
        PluginError::Unimplemented { plugin, capability: "should_avoid_proxy" } if plugin == "bare"
    ));
}

#[test]
fn test_first_true_short_circuits_later_plugins() {
    // The bare plugin would fail if it were asked.
    let manager = manager(vec![
        Arc::new(MockPlugin::delegating("a").with_avoid_proxy(true)),
        Arc::new(BarePlugin("bare")),
    ]);
    assert!(manager
        .should_handle_locally(&Method::DELETE, "/session/1", None)
        .unwrap());
}
