//! Plugin system for command interception
//!
//! A plugin is split in two halves:
//!
//! - [`PluginFactory`]: the static side. It names the plugin, declares the
//!   routes it adds and the options it accepts, may extend the server before
//!   traffic starts, and constructs the instance from validated options.
//! - [`Plugin`]: the instance. It intercepts commands, either through
//!   command-specific handlers collected at registration time or through the
//!   generic [`Plugin::handle`] hook, and votes on proxy avoidance.
//!
//! # Modules
//!
//! - `chain`: continuation type and chain composition
//! - `manager`: registration slots and the process-wide plugin list
//! - `schema`: method maps, argument constraints and errors
//! - `config`: option validation against constraints
//! - `builtin`: plugins compiled into the server binary

use crate::driver::{CommandResult, DriverRef};
use crate::server::{Server, ServerBuilder};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use warp::http::Method;

pub mod builtin;
pub mod chain;
pub mod config;
pub mod manager;
pub mod schema;

pub use builtin::PluginCatalog;
pub use chain::{build_chain, Bookkeeping, CommandHandler, Handler, Next};
pub use manager::{PluginManager, PluginSlot};
pub use schema::{
    ArgConstraints, CommandSpec, ConstraintRule, MethodMap, PayloadParams, PluginError,
    PluginOptions, RequiredParam,
};

/// A constructed plugin instance
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registration name, unique within a server
    fn name(&self) -> &str;

    /// Handlers for individual commands, keyed by command name.
    ///
    /// Collected once at registration. Commands without an entry go through
    /// [`Plugin::handle`].
    fn command_handlers(&self) -> HashMap<String, CommandHandler> {
        HashMap::new()
    }

    /// Generic interception hook.
    ///
    /// Either run `next` (at most once, it is consumed) and return or adapt
    /// its result, or call [`Next::decline`] and produce a result of its own,
    /// finishing the bookkeeping token afterwards.
    async fn handle(
        &self,
        next: Next,
        _driver: DriverRef,
        _command: &str,
        _args: Vec<Value>,
    ) -> CommandResult {
        next.run().await
    }

    /// Whether a request that would be proxied must be handled locally instead.
    ///
    /// Plugins are expected to override this; the default fails.
    fn should_avoid_proxy(
        &self,
        _method: &Method,
        _route: &str,
        _body: Option<&Value>,
    ) -> Result<bool, PluginError> {
        Err(PluginError::Unimplemented {
            plugin: self.name().to_string(),
            capability: "should_avoid_proxy",
        })
    }

    /// Called once the server is frozen, before any request is served.
    fn server_ready(&self, _server: &Server) {}
}

/// The static side of a plugin
#[async_trait]
pub trait PluginFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Routes this plugin adds, bound to new command names
    fn new_method_map(&self) -> MethodMap {
        MethodMap::default()
    }

    /// Rules for the options accepted under `pluginArgs.<name>`
    fn args_constraints(&self) -> ArgConstraints {
        ArgConstraints::default()
    }

    /// Install raw routes or listeners. Runs once, before traffic starts.
    async fn update_server(&self, _server: &mut ServerBuilder) -> Result<(), PluginError> {
        Ok(())
    }

    /// Build the instance from already validated options.
    fn create(&self, options: PluginOptions) -> Result<Arc<dyn Plugin>, PluginError>;
}
