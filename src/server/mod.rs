//! Server assembly: route table, listeners and plugin server extensions
//!
//! Routes and listeners can only be added through a [`ServerBuilder`], which is
//! consumed by [`ServerBuilder::build`]. Once built, the [`Server`] is shared
//! read-only by every request.

use crate::driver::CommandResult;
use crate::plugin::{CommandSpec, MethodMap, PluginError, PluginManager, PluginSlot};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use warp::http::{Method, StatusCode};

pub mod listener;
pub mod routes;

pub use listener::{ListenerSet, ServerListener};
pub use routes::{
    base_method_map, RawHandler, Route, RouteMatch, RoutePattern, RouteRequest, RouteTable,
    RouteTarget,
};

const SERVER_OWNER: &str = "server";

/// Mutable registration surface handed to plugins before traffic starts
pub struct ServerBuilder {
    routes: Vec<Route>,
    listeners: Vec<Arc<dyn ServerListener>>,
    owner: String,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            listeners: Vec::new(),
            owner: SERVER_OWNER.to_string(),
        }
    }

    /// A builder preloaded with the server's own commands
    pub fn with_base_routes() -> Result<Self, PluginError> {
        let mut builder = Self::new();
        builder.merge_method_map(SERVER_OWNER, &base_method_map())?;
        Ok(builder)
    }

    /// Name recorded as owner of routes added from now on
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: &str) {
        self.owner = owner.to_string();
    }

    /// Bind every entry of `map` on behalf of `owner`.
    pub fn merge_method_map(&mut self, owner: &str, map: &MethodMap) -> Result<(), PluginError> {
        for (path, method, spec) in map.bindings() {
            let method =
                Method::from_bytes(method.as_bytes()).map_err(|e| PluginError::InvalidRoute {
                    path: path.to_string(),
                    reason: format!("invalid HTTP method '{method}': {e}"),
                })?;
            self.insert(owner, method, path, RouteTarget::Command(spec.clone()))?;
        }
        Ok(())
    }

    /// Bind `method path` to a command so it runs through the plugin chain.
    pub fn add_command_route(
        &mut self,
        method: Method,
        path: &str,
        spec: CommandSpec,
    ) -> Result<(), PluginError> {
        let owner = self.owner.clone();
        self.insert(&owner, method, path, RouteTarget::Command(spec))
    }

    /// Bind `method path` to a raw handler that bypasses the plugin chain.
    pub fn add_route<F, Fut>(
        &mut self,
        method: Method,
        path: &str,
        handler: F,
    ) -> Result<(), PluginError>
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        let handler: RawHandler = Arc::new(move |request| handler(request).boxed());
        let owner = self.owner.clone();
        self.insert(&owner, method, path, RouteTarget::Raw(handler))
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ServerListener>) {
        debug!(owner = %self.owner, "Adding server listener");
        self.listeners.push(listener);
    }

    fn insert(
        &mut self,
        owner: &str,
        method: Method,
        path: &str,
        target: RouteTarget,
    ) -> Result<(), PluginError> {
        let pattern = RoutePattern::parse(path)?;
        let shape = pattern.shape();

        if let Some(existing) = self
            .routes
            .iter()
            .find(|route| route.method == method && route.pattern.shape() == shape)
        {
            return Err(PluginError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
                existing: existing.owner.clone(),
                source_name: owner.to_string(),
            });
        }

        debug!(owner = %owner, method = %method, path = %path, "Binding route");
        self.routes.push(Route {
            pattern,
            method,
            target,
            owner: owner.to_string(),
        });
        Ok(())
    }

    pub fn build(self) -> Server {
        Server {
            routes: Arc::new(RouteTable::new(self.routes)),
            listeners: Arc::new(ListenerSet::new(self.listeners)),
        }
    }
}

/// Frozen routes and listeners
#[derive(Clone)]
pub struct Server {
    pub routes: Arc<RouteTable>,
    pub listeners: Arc<ListenerSet>,
}

impl Server {
    /// Notify listeners of a finished request.
    pub fn observe(&self, method: &Method, path: &str, status: StatusCode) {
        self.listeners.notify_response(method, path, status);
    }
}

/// Run every plugin's server hook in registration order, stopping at the first failure.
pub async fn apply_server_extensions(
    plugins: &[PluginSlot],
    server: &mut ServerBuilder,
) -> Result<(), PluginError> {
    for slot in plugins {
        let Some(factory) = slot.factory() else {
            continue;
        };

        info!(plugin = %slot.name(), "Applying server extension");
        server.set_owner(slot.name());
        let outcome = factory.update_server(server).await;
        server.set_owner(SERVER_OWNER);

        outcome.map_err(|e| match e {
            PluginError::ServerExtension { .. } => e,
            other => PluginError::ServerExtension {
                plugin: slot.name().to_string(),
                reason: other.to_string(),
            },
        })?;
    }
    Ok(())
}

/// Assemble the server: built-in routes, plugin method maps, then plugin extensions.
pub async fn build_server(plugins: &PluginManager) -> Result<Server, PluginError> {
    let mut builder = ServerBuilder::with_base_routes()?;
    for slot in plugins.slots() {
        builder.merge_method_map(slot.name(), slot.method_map())?;
    }
    plugins.apply_server_extensions(&mut builder).await?;

    let server = builder.build();
    for slot in plugins.slots() {
        slot.instance().server_ready(&server);
    }
    info!(
        routes = server.routes.len(),
        listeners = server.listeners.len(),
        "Server routes assembled"
    );
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginFactory, PluginOptions};
    use crate::test_utils::MockPlugin;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RouteFactory {
        name: &'static str,
        path: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PluginFactory for RouteFactory {
        fn name(&self) -> &str {
            self.name
        }

        async fn update_server(&self, server: &mut ServerBuilder) -> Result<(), PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PluginError::InvalidRoute {
                    path: self.path.to_string(),
                    reason: "refused".to_string(),
                });
            }
            server.add_route(Method::GET, self.path, |_request| async {
                Ok(json!("raw"))
            })
        }

        fn create(&self, _options: PluginOptions) -> Result<Arc<dyn Plugin>, PluginError> {
            Ok(Arc::new(MockPlugin::delegating(self.name)))
        }
    }

    fn factory(name: &'static str, path: &'static str, fail: bool) -> Arc<RouteFactory> {
        Arc::new(RouteFactory {
            name,
            path,
            fail,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[test]
    fn test_duplicate_bindings_rejected() {
        let mut builder = ServerBuilder::with_base_routes().unwrap();
        let err = builder
            .add_command_route(Method::GET, "/session/:id/url", CommandSpec::new("other"))
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateRoute { existing, .. } if existing == "server"));

        // Same path with another method is fine.
        builder
            .add_command_route(Method::PUT, "/session/:id/url", CommandSpec::new("other"))
            .unwrap();
    }

    #[test]
    fn test_raw_routes_resolve_before_commands() {
        let mut builder = ServerBuilder::new();
        builder
            .add_command_route(Method::GET, "/a/:x", CommandSpec::new("getA"))
            .unwrap();
        builder
            .add_route(Method::GET, "/a/raw", |_r| async { Ok(json!(1)) })
            .unwrap();
        let server = builder.build();

        match server.routes.resolve(&Method::GET, "/a/raw") {
            RouteMatch::Found { route, .. } => {
                assert!(matches!(route.target(), RouteTarget::Raw(_)))
            }
            _ => panic!("expected raw route"),
        }
        match server.routes.resolve(&Method::GET, "/a/other") {
            RouteMatch::Found { route, params } => {
                assert!(matches!(route.target(), RouteTarget::Command(_)));
                assert_eq!(params, vec![("x".to_string(), "other".to_string())]);
            }
            _ => panic!("expected command route"),
        }
        assert!(matches!(
            server.routes.resolve(&Method::POST, "/a/1"),
            RouteMatch::MethodNotAllowed
        ));
        assert!(matches!(
            server.routes.resolve(&Method::GET, "/nope"),
            RouteMatch::NotFound
        ));
    }

    #[tokio::test]
    async fn test_extensions_run_in_order_with_owner() {
        let first = factory("first", "/plugin/first", false);
        let second = factory("second", "/plugin/second", false);

        let mut manager = PluginManager::new();
        manager.register(first.clone(), None).unwrap();
        manager.register(second.clone(), None).unwrap();

        let server = build_server(&manager).await.unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);

        match server.routes.resolve(&Method::GET, "/plugin/second") {
            RouteMatch::Found { route, .. } => assert_eq!(route.owner(), "second"),
            _ => panic!("plugin route missing"),
        }
    }

    #[tokio::test]
    async fn test_extension_failure_aborts_startup() {
        let broken = factory("broken", "/plugin/broken", true);
        let after = factory("after", "/plugin/after", false);

        let mut manager = PluginManager::new();
        manager.register(broken, None).unwrap();
        manager.register(after.clone(), None).unwrap();

        let err = build_server(&manager).await.err().unwrap();
        assert!(matches!(err, PluginError::ServerExtension { plugin, .. } if plugin == "broken"));
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conflicting_plugin_routes_fail() {
        let a = factory("a", "/plugin/shared", false);
        let b = factory("b", "/plugin/shared", false);

        let mut manager = PluginManager::new();
        manager.register(a, None).unwrap();
        manager.register(b, None).unwrap();

        let err = build_server(&manager).await.err().unwrap();
        assert!(err.to_string().contains("already bound by 'a'"));
    }
}
