//! `command-log`: logs every command passing through the chain and counts them

use crate::driver::{CommandResult, DriverRef};
use crate::plugin::{
    ArgConstraints, ConstraintRule, Next, Plugin, PluginError, PluginFactory, PluginOptions,
};
use crate::server::ServerBuilder;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use warp::http::Method;

pub const NAME: &str = "command-log";
pub const STATS_ROUTE: &str = "/plugin/command-log/stats";

type CommandCounts = Arc<DashMap<String, u64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
}

pub struct CommandLogFactory {
    counts: CommandCounts,
}

impl Default for CommandLogFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLogFactory {
    pub fn new() -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
        }
    }

    fn snapshot(counts: &DashMap<String, u64>) -> Value {
        let sorted: BTreeMap<String, u64> = counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        json!(sorted)
    }
}

#[async_trait]
impl PluginFactory for CommandLogFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn args_constraints(&self) -> ArgConstraints {
        let mut constraints = ArgConstraints::new();
        constraints.insert(
            "level".to_string(),
            ConstraintRule::string().one_of(["debug", "info"]),
        );
        constraints
    }

    async fn update_server(&self, server: &mut ServerBuilder) -> Result<(), PluginError> {
        let counts = self.counts.clone();
        server.add_route(Method::GET, STATS_ROUTE, move |_request| {
            let counts = counts.clone();
            async move { Ok(CommandLogFactory::snapshot(&counts)) }
        })
    }

    fn create(&self, options: PluginOptions) -> Result<Arc<dyn Plugin>, PluginError> {
        let level = match options.get("level").and_then(Value::as_str) {
            Some("debug") => LogLevel::Debug,
            _ => LogLevel::Info,
        };
        Ok(Arc::new(CommandLogPlugin {
            level,
            counts: self.counts.clone(),
        }))
    }
}

pub struct CommandLogPlugin {
    level: LogLevel,
    counts: CommandCounts,
}

#[async_trait]
impl Plugin for CommandLogPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn handle(
        &self,
        next: Next,
        _driver: DriverRef,
        command: &str,
        args: Vec<Value>,
    ) -> CommandResult {
        *self.counts.entry(command.to_string()).or_insert(0) += 1;

        let started = Instant::now();
        let result = next.run().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let ok = result.is_ok();

        match self.level {
            LogLevel::Debug => {
                debug!(command = %command, args = args.len(), elapsed_ms, ok, "Command finished")
            }
            LogLevel::Info => {
                info!(command = %command, args = args.len(), elapsed_ms, ok, "Command finished")
            }
        }
        result
    }

    fn should_avoid_proxy(
        &self,
        _method: &Method,
        _route: &str,
        _body: Option<&Value>,
    ) -> Result<bool, PluginError> {
        Ok(false)
    }
}
