//! Integration tests for plugin chaining
//!
//! Tests verify that:
//! - A chain of delegating plugins returns the driver's result unchanged
//! - A short-circuiting plugin decides the result and hides later plugins
//! - Registration order decides which plugin is outermost
//! - Declined commands still get exactly one history entry

use automation_plugin_chain::driver::CommandError;
use automation_plugin_chain::plugin::{Plugin, PluginManager};
use automation_plugin_chain::test_utils::{MockDriver, MockPlugin};
use serde_json::json;
use std::sync::Arc;

fn manager_with(plugins: Vec<Arc<dyn Plugin>>) -> PluginManager {
    let mut manager = PluginManager::new();
    for plugin in plugins {
        manager.register_plugin(plugin).unwrap();
    }
    manager
}

#[tokio::test]
async fn test_delegating_chain_returns_terminal_result() {
    for n in 0..5 {
        let plugins: Vec<Arc<dyn Plugin>> = (0..n)
            .map(|i| Arc::new(MockPlugin::delegating(&format!("p{i}"))) as Arc<dyn Plugin>)
            .collect();
        let manager = manager_with(plugins);
        let driver = Arc::new(MockDriver::new());

        let result = manager
            .build_chain("getUrl", driver.clone(), vec![json!("s1")])
            .run()
            .await
            .unwrap();

        assert_eq!(result, json!({"command": "getUrl", "args": ["s1"]}), "chain of {n}");
        assert_eq!(driver.execute_calls(), 1);
        assert_eq!(driver.history().len(), 1);
    }
}

#[tokio::test]
async fn test_short_circuit_hides_later_plugins() {
    for position in 0..3 {
        let mut plugins: Vec<Arc<MockPlugin>> = (0..3)
            .map(|i| Arc::new(MockPlugin::delegating(&format!("p{i}"))))
            .collect();
        plugins[position] = Arc::new(MockPlugin::short_circuit("stop", json!("V")));

        let manager = manager_with(
            plugins
                .iter()
                .map(|p| p.clone() as Arc<dyn Plugin>)
                .collect(),
        );
        let driver = Arc::new(MockDriver::new());

        let result = manager
            .build_chain("title", driver.clone(), vec![])
            .run()
            .await
            .unwrap();

        assert_eq!(result, json!("V"));
        assert_eq!(driver.execute_calls(), 0);
        for (i, plugin) in plugins.iter().enumerate() {
            let expected = if i <= position { 1 } else { 0 };
            assert_eq!(plugin.calls(), expected, "plugin {i}, stop at {position}");
        }
    }
}

#[tokio::test]
async fn test_registration_order_decides_who_runs() {
    // Logger first: it runs, then the short-circuit answers.
    let logger = Arc::new(MockPlugin::delegating("logger"));
    let stopper = Arc::new(MockPlugin::short_circuit("stopper", json!("stopped")));
    let manager = manager_with(vec![logger.clone() as Arc<dyn Plugin>, stopper.clone()]);
    let driver = Arc::new(MockDriver::new());

    let result = manager
        .build_chain("click", driver.clone(), vec![])
        .run()
        .await
        .unwrap();
    assert_eq!(result, json!("stopped"));
    assert_eq!(logger.calls(), 1);
    assert_eq!(stopper.calls(), 1);

    // Swapped: the logger never executes.
    let logger = Arc::new(MockPlugin::delegating("logger"));
    let stopper = Arc::new(MockPlugin::short_circuit("stopper", json!("stopped")));
    let manager = manager_with(vec![stopper.clone() as Arc<dyn Plugin>, logger.clone()]);

    let result = manager
        .build_chain("click", driver.clone(), vec![])
        .run()
        .await
        .unwrap();
    assert_eq!(result, json!("stopped"));
    assert_eq!(logger.calls(), 0);
    assert_eq!(stopper.calls(), 1);
    assert_eq!(driver.execute_calls(), 0);
}

#[tokio::test]
async fn test_outer_plugin_wraps_short_circuit_result() {
    let a = Arc::new(MockPlugin::wrapping("A"));
    let b = Arc::new(MockPlugin::short_circuit("B", json!("B-result")));
    let manager = manager_with(vec![a.clone() as Arc<dyn Plugin>, b.clone()]);
    let driver = Arc::new(MockDriver::new());

    let result = manager
        .build_chain("getUrl", driver.clone(), vec![])
        .run()
        .await
        .unwrap();

    assert_eq!(result, json!("A(B-result)"));
    assert_eq!(a.observed(), vec![json!("B-result")]);
    assert_eq!(driver.execute_calls(), 0);

    // B took over bookkeeping: one record, timeout toggled off then on.
    assert_eq!(driver.history().len(), 1);
    assert_eq!(driver.history()[0].cmd, "getUrl");
    assert_eq!(driver.timeout_stops(), 1);
    assert_eq!(driver.timeout_starts(), 1);
}

#[tokio::test]
async fn test_failure_propagates_unmodified() {
    let outer = Arc::new(MockPlugin::delegating("outer"));
    let failing = Arc::new(MockPlugin::failing("failing", "element is stale"));
    let manager = manager_with(vec![outer.clone() as Arc<dyn Plugin>, failing]);
    let driver = Arc::new(MockDriver::new());

    let err = manager
        .build_chain("click", driver.clone(), vec![])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Failed(message) if message == "element is stale"));
    assert_eq!(outer.calls(), 1);
    assert_eq!(driver.execute_calls(), 0);
}

#[tokio::test]
async fn test_driver_failure_reaches_outermost_plugin() {
    let wrapper = Arc::new(MockPlugin::wrapping("W"));
    let manager = manager_with(vec![wrapper.clone() as Arc<dyn Plugin>]);
    let driver = Arc::new(MockDriver::failing_with("no such window"));

    let err = manager
        .build_chain("title", driver.clone(), vec![])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Failed(_)));
    assert!(wrapper.observed().is_empty());
    // The terminal still did its bookkeeping.
    assert_eq!(driver.history().len(), 1);
    assert_eq!(driver.timeout_starts(), 1);
}

#[tokio::test]
async fn test_command_handler_used_only_for_its_command() {
    let plugin = Arc::new(MockPlugin::delegating("p").with_command_result("getTitle", json!("T")));
    let manager = manager_with(vec![plugin.clone() as Arc<dyn Plugin>]);
    let driver = Arc::new(MockDriver::new());

    let title = manager
        .build_chain("getTitle", driver.clone(), vec![])
        .run()
        .await
        .unwrap();
    assert_eq!(title, json!("T"));
    assert_eq!(plugin.calls(), 0);

    manager
        .build_chain("getUrl", driver.clone(), vec![])
        .run()
        .await
        .unwrap();
    assert_eq!(plugin.calls(), 1);
    assert_eq!(driver.execute_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_chains_share_registry() {
    let manager = Arc::new(manager_with(vec![
        Arc::new(MockPlugin::wrapping("A")) as Arc<dyn Plugin>,
    ]));
    let driver = Arc::new(MockDriver::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let manager = manager.clone();
            let driver = driver.clone();
            tokio::spawn(async move {
                manager
                    .build_chain("getUrl", driver, vec![json!(i)])
                    .run()
                    .await
            })
        })
        .collect();

    for handle in handles {
        let value = handle.await.unwrap().unwrap();
        assert!(value.as_str().unwrap().starts_with("A("));
    }
    assert_eq!(driver.execute_calls(), 16);
    assert_eq!(driver.history().len(), 16);
}
