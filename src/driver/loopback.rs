//! In-process driver used when the server runs without a real automation backend.
//!
//! It answers `getStatus` and `getCommandHistory`, and echoes every other
//! command back to the caller so that plugin chains can be exercised end to end.
//! `deleteSession` clears the history, which otherwise keeps the most recent
//! [`DEFAULT_HISTORY_LIMIT`] records.

use super::{CommandRecord, CommandResult, Driver};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

pub struct LoopbackDriver {
    history: Mutex<VecDeque<CommandRecord>>,
    history_limit: usize,
    timeout_armed: AtomicBool,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            history_limit,
            timeout_armed: AtomicBool::new(false),
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<CommandRecord>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn history(&self) -> Vec<CommandRecord> {
        self.records().iter().cloned().collect()
    }

    pub fn timeout_armed(&self) -> bool {
        self.timeout_armed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for LoopbackDriver {
    async fn execute_command(&self, command: &str, args: Vec<Value>) -> CommandResult {
        match command {
            "getStatus" => Ok(json!({
                "ready": true,
                "message": "loopback driver ready",
                "build": { "version": env!("CARGO_PKG_VERSION") },
            })),
            "getCommandHistory" => Ok(serde_json::to_value(self.history())
                .map_err(|e| super::CommandError::Failed(e.to_string()))?),
            "deleteSession" => {
                self.records().clear();
                Ok(Value::Null)
            }
            _ => Ok(json!({ "command": command, "args": args })),
        }
    }

    fn stop_new_command_timeout(&self) {
        self.timeout_armed.store(false, Ordering::SeqCst);
    }

    fn start_new_command_timeout(&self) {
        self.timeout_armed.store(true, Ordering::SeqCst);
    }

    fn record_command(&self, record: CommandRecord) {
        let mut records = self.records();
        if self.history_limit == 0 {
            return;
        }
        while records.len() >= self.history_limit {
            records.pop_front();
        }
        records.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::invoke_command;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_status_and_echo() {
        let driver = LoopbackDriver::new();

        let status = driver.execute_command("getStatus", vec![]).await.unwrap();
        assert_eq!(status["ready"], true);

        let echoed = driver
            .execute_command("setUrl", vec![json!("https://example.com")])
            .await
            .unwrap();
        assert_eq!(echoed["command"], "setUrl");
        assert_eq!(echoed["args"][0], "https://example.com");
    }

    #[tokio::test]
    async fn test_history_reflects_invocations() {
        let driver = Arc::new(LoopbackDriver::new());
        invoke_command(driver.clone(), "title".into(), vec![])
            .await
            .unwrap();

        assert!(driver.timeout_armed());
        let history = driver
            .execute_command("getCommandHistory", vec![])
            .await
            .unwrap();
        assert_eq!(history[0]["cmd"], "title");
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_cleared_on_delete() {
        let driver = Arc::new(LoopbackDriver::with_history_limit(2));
        for command in ["a", "b", "c"] {
            invoke_command(driver.clone(), command.into(), vec![])
                .await
                .unwrap();
        }
        let commands: Vec<_> = driver.history().into_iter().map(|r| r.cmd).collect();
        assert_eq!(commands, vec!["b", "c"]);

        // The delete itself is recorded after the clear.
        invoke_command(driver.clone(), "deleteSession".into(), vec![json!("s1")])
            .await
            .unwrap();
        let commands: Vec<_> = driver.history().into_iter().map(|r| r.cmd).collect();
        assert_eq!(commands, vec!["deleteSession"]);
    }
}
