//! Plugins compiled into the server binary

use crate::plugin::PluginFactory;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod command_log;
pub mod deny_list;

pub use command_log::CommandLogFactory;
pub use deny_list::DenyListFactory;

/// Factories known to the server, looked up by the names in `usePlugins`
#[derive(Default, Clone)]
pub struct PluginCatalog {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every built-in plugin
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.insert(Arc::new(CommandLogFactory::new()));
        catalog.insert(Arc::new(DenyListFactory));
        catalog
    }

    /// Add a factory, replacing any previous one with the same name.
    pub fn insert(&mut self, factory: Arc<dyn PluginFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
