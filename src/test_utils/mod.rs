//! Test doubles shared by unit and integration tests

use crate::driver::{CommandError, CommandRecord, CommandResult, Driver, DriverRef};
use crate::plugin::{CommandHandler, Next, Plugin, PluginError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use warp::http::Method;

/// Mock driver that counts every interaction
#[derive(Default)]
pub struct MockDriver {
    execute_calls: AtomicUsize,
    timeout_stops: AtomicUsize,
    timeout_starts: AtomicUsize,
    history: Mutex<Vec<CommandRecord>>,
    proxied: Mutex<Vec<(String, String)>>,
    proxied_bodies: Mutex<Vec<Bytes>>,
    failure: Option<String>,
    proxying: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every executed command fails with `CommandError::Failed(message)`
    pub fn failing_with(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Requests are forwarded upstream unless a plugin avoids the proxy
    pub fn proxying() -> Self {
        Self {
            proxying: true,
            ..Self::default()
        }
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn timeout_stops(&self) -> usize {
        self.timeout_stops.load(Ordering::SeqCst)
    }

    pub fn timeout_starts(&self) -> usize {
        self.timeout_starts.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<CommandRecord> {
        self.history.lock().unwrap().clone()
    }

    /// (method, route) pairs that went through the proxy
    pub fn proxied(&self) -> Vec<(String, String)> {
        self.proxied.lock().unwrap().clone()
    }

    /// Raw bodies forwarded upstream, in order
    pub fn proxied_bodies(&self) -> Vec<Bytes> {
        self.proxied_bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn execute_command(&self, command: &str, args: Vec<Value>) -> CommandResult {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(CommandError::Failed(message.clone())),
            None => Ok(json!({ "command": command, "args": args })),
        }
    }

    fn stop_new_command_timeout(&self) {
        self.timeout_stops.fetch_add(1, Ordering::SeqCst);
    }

    fn start_new_command_timeout(&self) {
        self.timeout_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn record_command(&self, record: CommandRecord) {
        self.history.lock().unwrap().push(record);
    }

    fn is_proxying(&self) -> bool {
        self.proxying
    }

    async fn proxy_request(&self, method: &Method, route: &str, body: Bytes) -> CommandResult {
        if !self.proxying {
            return Err(CommandError::Proxy(format!("not proxying {method} {route}")));
        }
        self.proxied
            .lock()
            .unwrap()
            .push((method.to_string(), route.to_string()));
        self.proxied_bodies.lock().unwrap().push(body);
        Ok(json!({ "proxied": true, "route": route }))
    }
}

#[derive(Clone)]
enum Behavior {
    Delegate,
    ShortCircuit(Value),
    Wrap,
    Fail(String),
}

/// Configurable plugin for chain tests
///
/// - `delegating`: runs `next` and returns its result
/// - `short_circuit`: declines `next`, finishes bookkeeping, returns a value
/// - `wrapping`: runs `next` and returns `"<name>(<inner>)"`
/// - `failing`: returns `CommandError::Failed` without delegating
pub struct MockPlugin {
    name: String,
    behavior: Behavior,
    avoid_proxy: bool,
    command_results: HashMap<String, Value>,
    calls: AtomicUsize,
    observed: Mutex<Vec<Value>>,
}

impl MockPlugin {
    fn with_behavior(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            avoid_proxy: false,
            command_results: HashMap::new(),
            calls: AtomicUsize::new(0),
            observed: Mutex::new(Vec::new()),
        }
    }

    pub fn delegating(name: &str) -> Self {
        Self::with_behavior(name, Behavior::Delegate)
    }

    pub fn short_circuit(name: &str, value: Value) -> Self {
        Self::with_behavior(name, Behavior::ShortCircuit(value))
    }

    pub fn wrapping(name: &str) -> Self {
        Self::with_behavior(name, Behavior::Wrap)
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self::with_behavior(name, Behavior::Fail(message.to_string()))
    }

    pub fn with_avoid_proxy(mut self, avoid: bool) -> Self {
        self.avoid_proxy = avoid;
        self
    }

    /// Short-circuit `command` through a command-specific handler
    pub fn with_command_result(mut self, command: &str, value: Value) -> Self {
        self.command_results.insert(command.to_string(), value);
        self
    }

    /// How many times the generic hook ran
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Results this plugin received from its continuation
    pub fn observed(&self) -> Vec<Value> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn command_handlers(&self) -> HashMap<String, CommandHandler> {
        self.command_results
            .iter()
            .map(|(command, value)| {
                let value = value.clone();
                let handler: CommandHandler =
                    Arc::new(move |next: Next, _driver: DriverRef, _args: Vec<Value>| {
                        let value = value.clone();
                        async move { next.decline().finish(Ok::<_, CommandError>(value)) }
                            .boxed()
                    });
                (command.clone(), handler)
            })
            .collect()
    }

    async fn handle(
        &self,
        next: Next,
        _driver: DriverRef,
        _command: &str,
        _args: Vec<Value>,
    ) -> CommandResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Delegate => next.run().await,
            Behavior::ShortCircuit(value) => next.decline().finish(Ok(value.clone())),
            Behavior::Wrap => {
                let inner = next.run().await?;
                self.observed.lock().unwrap().push(inner.clone());
                let inner = match inner {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(json!(format!("{}({})", self.name, inner)))
            }
            Behavior::Fail(message) => next
                .decline()
                .finish(Err(CommandError::Failed(message.clone()))),
        }
    }

    fn should_avoid_proxy(
        &self,
        _method: &Method,
        _route: &str,
        _body: Option<&Value>,
    ) -> Result<bool, PluginError> {
        Ok(self.avoid_proxy)
    }
}

/// Plugin that overrides nothing beyond its name
pub struct BarePlugin(pub &'static str);

impl Plugin for BarePlugin {
    fn name(&self) -> &str {
        self.0
    }
}
