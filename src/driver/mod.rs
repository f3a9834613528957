//! Driver collaborator interface and the terminal command invoker
//!
//! The driver performs real automation work. The chain only ever reaches it
//! through [`terminal`], which wraps the call with the session bookkeeping
//! (idle-timeout tracking and command history) that a short-circuiting plugin
//! has to perform itself through [`crate::plugin::Bookkeeping`].

use crate::plugin::chain::Next;
use crate::plugin::schema::PluginError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use warp::http::Method;

pub mod loopback;

pub use loopback::LoopbackDriver;

/// Result type every link of a command chain produces
pub type CommandResult = std::result::Result<Value, CommandError>;

/// Shared handle to the driver serving the current session
pub type DriverRef = Arc<dyn Driver>;

/// Failures raised by commands, whether by the driver or by a plugin link
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command '{command}' was blocked by plugin '{plugin}'")]
    Blocked { command: String, plugin: String },

    #[error("Driver error: {0}")]
    Failed(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// One entry of the driver's append-only command history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub cmd: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CommandRecord {
    pub fn new(cmd: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            cmd: cmd.into(),
            start_time,
            end_time: Utc::now(),
        }
    }
}

/// The automation driver as seen by the interception chain
#[async_trait]
pub trait Driver: Send + Sync {
    /// Perform the named command.
    async fn execute_command(&self, command: &str, args: Vec<Value>) -> CommandResult;

    /// Suspend idle-timeout tracking while a command is in flight.
    fn stop_new_command_timeout(&self);

    /// Re-arm idle-timeout tracking once a command has finished.
    fn start_new_command_timeout(&self);

    /// Append to the command history.
    fn record_command(&self, record: CommandRecord);

    /// Whether requests for this session are normally forwarded upstream.
    fn is_proxying(&self) -> bool {
        false
    }

    /// Forward a request upstream. The body is passed through as received.
    async fn proxy_request(&self, method: &Method, route: &str, _body: Bytes) -> CommandResult {
        Err(CommandError::Proxy(format!(
            "driver is not proxying, cannot forward {method} {route}"
        )))
    }
}

/// Run a command on the driver, owning the timeout and history bookkeeping.
pub async fn invoke_command(driver: DriverRef, command: String, args: Vec<Value>) -> CommandResult {
    driver.stop_new_command_timeout();
    let start_time = Utc::now();

    tracing::debug!(command = %command, "Invoking driver command");
    let result = driver.execute_command(&command, args).await;

    if let Err(e) = &result {
        tracing::debug!(command = %command, error = %e, "Driver command failed");
    }

    driver.record_command(CommandRecord::new(command, start_time));
    driver.start_new_command_timeout();
    result
}

/// Build the innermost continuation of a chain: the real driver call.
pub fn terminal(driver: DriverRef, command: &str, args: Vec<Value>) -> Next {
    let command = command.to_string();
    let driver_for_call = driver.clone();
    let command_for_call = command.clone();
    Next::new(command, driver, move || {
        invoke_command(driver_for_call, command_for_call, args).boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDriver;
    use serde_json::json;

    #[tokio::test]
    async fn test_invoke_command_performs_bookkeeping() {
        let driver = Arc::new(MockDriver::new());
        let result = invoke_command(driver.clone(), "getUrl".to_string(), vec![])
            .await
            .unwrap();

        assert_eq!(result, json!({"command": "getUrl", "args": []}));
        assert_eq!(driver.execute_calls(), 1);
        assert_eq!(driver.timeout_stops(), 1);
        assert_eq!(driver.timeout_starts(), 1);

        let history = driver.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cmd, "getUrl");
        assert!(history[0].end_time >= history[0].start_time);
    }

    #[tokio::test]
    async fn test_invoke_command_records_failures_too() {
        let driver = Arc::new(MockDriver::failing_with("boom"));
        let err = invoke_command(driver.clone(), "click".to_string(), vec![json!("el-1")])
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Failed(msg) if msg == "boom"));
        assert_eq!(driver.history().len(), 1);
        assert_eq!(driver.timeout_starts(), 1);
    }

    #[tokio::test]
    async fn test_terminal_runs_driver_once() {
        let driver = Arc::new(MockDriver::new());
        let next = terminal(driver.clone(), "title", vec![json!(1)]);
        assert_eq!(next.command(), "title");

        let value = next.run().await.unwrap();
        assert_eq!(value["args"], json!([1]));
        assert_eq!(driver.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_default_proxy_request_fails() {
        let driver = LoopbackDriver::new();
        assert!(!driver.is_proxying());

        let err = driver
            .proxy_request(&Method::GET, "/session/1/url", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Proxy(_)));
    }
}
