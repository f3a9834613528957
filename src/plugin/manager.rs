//! Plugin registration and the process-wide plugin list
//!
//! The manager is filled once at startup and then shared read-only behind an
//! `Arc`, so chains can be built concurrently without locking.

use crate::driver::{self, DriverRef};
use crate::plugin::builtin::PluginCatalog;
use crate::plugin::chain::{self, CommandHandler, Handler, Next};
use crate::plugin::config::validate_plugin_args;
use crate::plugin::schema::{MethodMap, PluginError};
use crate::plugin::{Plugin, PluginFactory};
use crate::server::ServerBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use warp::http::Method;

/// One registered plugin
pub struct PluginSlot {
    name: String,
    instance: Arc<dyn Plugin>,
    factory: Option<Arc<dyn PluginFactory>>,
    handlers: HashMap<String, CommandHandler>,
    method_map: MethodMap,
}

impl PluginSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &Arc<dyn Plugin> {
        &self.instance
    }

    pub fn factory(&self) -> Option<&Arc<dyn PluginFactory>> {
        self.factory.as_ref()
    }

    pub fn method_map(&self) -> &MethodMap {
        &self.method_map
    }

    /// Whether the plugin has a dedicated handler for `command`
    pub fn handles(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Pick the handler for `command`, falling back to the generic hook.
    pub fn resolve(&self, command: &str) -> Handler {
        match self.handlers.get(command) {
            Some(handler) => Handler::Command(handler.clone()),
            None => Handler::Generic(self.instance.clone()),
        }
    }
}

/// Ordered list of registered plugins
#[derive(Default)]
pub struct PluginManager {
    slots: Vec<PluginSlot>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the plugin list named by `use_plugins`, in that order.
    pub fn from_config(
        catalog: &PluginCatalog,
        use_plugins: &[String],
        plugin_args: &HashMap<String, Value>,
    ) -> Result<Self, PluginError> {
        let mut manager = Self::new();
        for name in use_plugins {
            let factory = catalog
                .get(name)
                .ok_or_else(|| PluginError::NotFound { name: name.clone() })?;
            manager.register(factory, plugin_args.get(name))?;
        }
        Ok(manager)
    }

    /// Validate options, construct the plugin and append its slot.
    pub fn register(
        &mut self,
        factory: Arc<dyn PluginFactory>,
        raw_options: Option<&Value>,
    ) -> Result<(), PluginError> {
        let name = factory.name().to_string();
        self.ensure_unique(&name)?;

        let options = validate_plugin_args(&name, &factory.args_constraints(), raw_options)?;
        debug!(plugin = %name, options = options.len(), "Constructing plugin");
        let instance = factory.create(options)?;
        let method_map = factory.new_method_map();

        self.push_slot(name, instance, Some(factory), method_map);
        Ok(())
    }

    /// Register an already constructed instance that declares no routes.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        self.ensure_unique(&name)?;
        self.push_slot(name, plugin, None, MethodMap::default());
        Ok(())
    }

    fn ensure_unique(&self, name: &str) -> Result<(), PluginError> {
        if self.slots.iter().any(|slot| slot.name == name) {
            return Err(PluginError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn push_slot(
        &mut self,
        name: String,
        instance: Arc<dyn Plugin>,
        factory: Option<Arc<dyn PluginFactory>>,
        method_map: MethodMap,
    ) {
        let handlers = instance.command_handlers();
        info!(
            plugin = %name,
            position = self.slots.len(),
            command_handlers = handlers.len(),
            routes = method_map.len(),
            "Registered plugin"
        );
        self.slots.push(PluginSlot {
            name,
            instance,
            factory,
            handlers,
            method_map,
        });
    }

    pub fn slots(&self) -> &[PluginSlot] {
        &self.slots
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(PluginSlot::name).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Compose the chain for one command, ending in the driver call.
    pub fn build_chain(&self, command: &str, driver: DriverRef, args: Vec<Value>) -> Next {
        let terminal = driver::terminal(driver.clone(), command, args.clone());
        chain::build_chain(&self.slots, command, &driver, &args, terminal)
    }

    pub fn should_handle_locally(
        &self,
        method: &Method,
        route: &str,
        body: Option<&Value>,
    ) -> Result<bool, PluginError> {
        crate::proxy::should_handle_locally(&self.slots, method, route, body)
    }

    pub async fn apply_server_extensions(
        &self,
        server: &mut ServerBuilder,
    ) -> Result<(), PluginError> {
        crate::server::apply_server_extensions(&self.slots, server).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::schema::{ArgConstraints, CommandSpec, ConstraintRule, PluginOptions};
    use crate::test_utils::{MockDriver, MockPlugin};
    use serde_json::json;

    struct EchoFactory;

    impl PluginFactory for EchoFactory {
        fn name(&self) -> &str {
            "echo"
        }

        fn new_method_map(&self) -> MethodMap {
            MethodMap::new().route("/echo", Method::GET, CommandSpec::new("echo"))
        }

        fn args_constraints(&self) -> ArgConstraints {
            let mut c = ArgConstraints::new();
            c.insert("prefix".into(), ConstraintRule::string().required());
            c
        }

        fn create(&self, options: PluginOptions) -> Result<Arc<dyn Plugin>, PluginError> {
            let prefix = options
                .get("prefix")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Arc::new(MockPlugin::short_circuit("echo", json!(prefix))))
        }
    }

    #[test]
    fn test_register_validates_before_construction() {
        let mut manager = PluginManager::new();
        let err = manager.register(Arc::new(EchoFactory), None).unwrap_err();
        assert!(matches!(err, PluginError::InvalidArgs { .. }));
        assert!(manager.is_empty());

        manager
            .register(Arc::new(EchoFactory), Some(&json!({"prefix": ">"})))
            .unwrap();
        assert_eq!(manager.names(), vec!["echo"]);
        assert_eq!(manager.slots()[0].method_map().len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut manager = PluginManager::new();
        manager.register_plugin(Arc::new(MockPlugin::delegating("a"))).unwrap();
        let err = manager
            .register_plugin(Arc::new(MockPlugin::delegating("a")))
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateName { name } if name == "a"));
    }

    #[test]
    fn test_from_config_uses_catalog_order() {
        let mut catalog = PluginCatalog::new();
        catalog.insert(Arc::new(EchoFactory));

        let mut args = HashMap::new();
        args.insert("echo".to_string(), json!({"prefix": "x"}));
        let manager =
            PluginManager::from_config(&catalog, &["echo".to_string()], &args).unwrap();
        assert_eq!(manager.len(), 1);

        let err = PluginManager::from_config(&catalog, &["missing".to_string()], &args)
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::NotFound { name } if name == "missing"));
    }

    #[tokio::test]
    async fn test_resolve_prefers_command_handler() {
        let mut manager = PluginManager::new();
        manager
            .register_plugin(Arc::new(
                MockPlugin::delegating("p").with_command_result("getTitle", json!("T")),
            ))
            .unwrap();
        let slot = &manager.slots()[0];

        assert!(slot.handles("getTitle"));
        assert_eq!(slot.resolve("getTitle").kind(), "command");
        assert_eq!(slot.resolve("getUrl").kind(), "generic");

        let driver = Arc::new(MockDriver::new());
        let value = manager
            .build_chain("getTitle", driver.clone(), vec![])
            .run()
            .await
            .unwrap();
        assert_eq!(value, json!("T"));
        assert_eq!(driver.execute_calls(), 0);
    }
}
