//! `deny-list`: refuses a configured set of commands before they reach the driver
//!
//! Denied commands are answered with [`CommandError::Blocked`] by a
//! command-specific handler that never delegates, so the driver is not called
//! and the plugin takes over the session bookkeeping. Because a forwarded
//! request would bypass the chain, the plugin also votes to keep local any
//! request whose route resolves to a denied command, whoever bound the route.

use crate::driver::{CommandError, DriverRef};
use crate::plugin::{
    ArgConstraints, CommandHandler, CommandSpec, ConstraintRule, MethodMap, Next, Plugin,
    PluginError, PluginFactory, PluginOptions,
};
use crate::server::{RouteMatch, RouteTable, RouteTarget, Server, ServerBuilder};
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::warn;
use warp::http::Method;

pub const NAME: &str = "deny-list";
pub const LIST_COMMAND: &str = "getDeniedCommands";

pub struct DenyListFactory;

impl PluginFactory for DenyListFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn new_method_map(&self) -> MethodMap {
        MethodMap::new().route(
            "/session/:sessionId/deny-list",
            Method::GET,
            CommandSpec::new(LIST_COMMAND),
        )
    }

    fn args_constraints(&self) -> ArgConstraints {
        let mut constraints = ArgConstraints::new();
        constraints.insert("commands".to_string(), ConstraintRule::array().required());
        constraints
    }

    fn create(&self, options: PluginOptions) -> Result<Arc<dyn Plugin>, PluginError> {
        let entries = options
            .get("commands")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut denied = BTreeSet::new();
        for entry in entries {
            match entry {
                Value::String(command) => {
                    denied.insert(command);
                }
                other => {
                    return Err(PluginError::Construction {
                        plugin: NAME.to_string(),
                        reason: format!("command names must be strings, got {other}"),
                    })
                }
            }
        }

        // Until the server is frozen, only built-in routes and our own are known.
        let mut builder = ServerBuilder::with_base_routes()?;
        builder.merge_method_map(NAME, &self.new_method_map())?;

        Ok(Arc::new(DenyListPlugin {
            denied: Arc::new(denied),
            known_routes: builder.build().routes,
            server_routes: OnceLock::new(),
        }))
    }
}

pub struct DenyListPlugin {
    denied: Arc<BTreeSet<String>>,
    known_routes: Arc<RouteTable>,
    server_routes: OnceLock<Arc<RouteTable>>,
}

impl DenyListPlugin {
    fn keeps_local(&self, command: &str) -> bool {
        command == LIST_COMMAND || self.denied.contains(command)
    }

    fn blocking_handler() -> CommandHandler {
        Arc::new(|next: Next, _driver: DriverRef, _args: Vec<Value>| {
            async move {
                let bookkeeping = next.decline();
                let command = bookkeeping.command().to_string();
                warn!(command = %command, "Blocked denied command");
                bookkeeping.finish(Err::<Value, _>(CommandError::Blocked {
                    command,
                    plugin: NAME.to_string(),
                }))
            }
            .boxed()
        })
    }
}

impl Plugin for DenyListPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn command_handlers(&self) -> HashMap<String, CommandHandler> {
        let mut handlers: HashMap<String, CommandHandler> = self
            .denied
            .iter()
            .map(|command| (command.clone(), Self::blocking_handler()))
            .collect();

        let denied = self.denied.clone();
        let list: CommandHandler =
            Arc::new(move |next: Next, _driver: DriverRef, _args: Vec<Value>| {
                let denied = denied.clone();
                async move { next.decline().finish(Ok::<_, CommandError>(json!(*denied))) }
                    .boxed()
            });
        handlers.insert(LIST_COMMAND.to_string(), list);
        handlers
    }

    fn should_avoid_proxy(
        &self,
        method: &Method,
        route: &str,
        _body: Option<&Value>,
    ) -> Result<bool, PluginError> {
        let routes = self.server_routes.get().unwrap_or(&self.known_routes);
        Ok(match routes.resolve(method, route) {
            RouteMatch::Found { route, .. } => matches!(
                route.target(),
                RouteTarget::Command(spec) if self.keeps_local(&spec.command)
            ),
            _ => false,
        })
    }

    fn server_ready(&self, server: &Server) {
        if self.server_routes.set(server.routes.clone()).is_err() {
            warn!("Server routes were already attached");
        }
    }
}
