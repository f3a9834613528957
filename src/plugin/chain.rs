//! Command chain composition
//!
//! Plugins wrap the driver call in registration order: the first registered
//! plugin is the outermost link and sees the final result, the driver call is
//! the innermost link.
//!
//! Every link receives a [`Next`] continuation. Running it delegates to the
//! rest of the chain. `Next` is consumed on use, so a link can delegate at most
//! once. A link that never delegates must take over the session bookkeeping
//! the driver call would have done, by calling [`Next::decline`] and finishing
//! the returned [`Bookkeeping`] token once its own work is complete.

use crate::driver::{CommandRecord, CommandResult, DriverRef};
use crate::plugin::manager::PluginSlot;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

use super::Plugin;

type Continuation = Box<dyn FnOnce() -> BoxFuture<'static, CommandResult> + Send>;

/// Command-specific handler collected from a plugin at registration time
pub type CommandHandler =
    Arc<dyn Fn(Next, DriverRef, Vec<Value>) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// The rest of the chain, as seen from one link
pub struct Next {
    command: String,
    driver: DriverRef,
    continuation: Continuation,
}

impl Next {
    pub fn new<F>(command: impl Into<String>, driver: DriverRef, continuation: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, CommandResult> + Send + 'static,
    {
        Self {
            command: command.into(),
            driver,
            continuation: Box::new(continuation),
        }
    }

    /// Name of the command this chain serves
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Delegate to the next link.
    pub async fn run(self) -> CommandResult {
        (self.continuation)().await
    }

    /// Give up delegation and take over bookkeeping for this command.
    ///
    /// Idle-timeout tracking is suspended immediately. The returned token must
    /// be finished once the link has produced its own result.
    pub fn decline(self) -> Bookkeeping {
        tracing::debug!(command = %self.command, "Link declined delegation, taking over bookkeeping");
        self.driver.stop_new_command_timeout();
        Bookkeeping {
            command: self.command,
            driver: self.driver,
            start_time: Utc::now(),
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Acknowledgement that a link owns the bookkeeping of a declined command
#[must_use = "a declined command must finish its bookkeeping"]
pub struct Bookkeeping {
    command: String,
    driver: DriverRef,
    start_time: DateTime<Utc>,
}

impl Bookkeeping {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Record the command in history, re-arm the idle timeout and hand back
    /// `result` unchanged.
    pub fn finish<T>(self, result: T) -> T {
        self.driver
            .record_command(CommandRecord::new(self.command, self.start_time));
        self.driver.start_new_command_timeout();
        result
    }
}

/// How one plugin handles one command, resolved once when the chain is built
#[derive(Clone)]
pub enum Handler {
    Command(CommandHandler),
    Generic(Arc<dyn Plugin>),
}

impl Handler {
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Command(_) => "command",
            Handler::Generic(_) => "generic",
        }
    }

    fn invoke(
        self,
        next: Next,
        driver: DriverRef,
        command: String,
        args: Vec<Value>,
    ) -> BoxFuture<'static, CommandResult> {
        match self {
            Handler::Command(handler) => handler(next, driver, args),
            Handler::Generic(plugin) => {
                async move { plugin.handle(next, driver, &command, args).await }.boxed()
            }
        }
    }
}

/// Compose `plugins` around `terminal` for one command.
///
/// The fold runs right to left so that `plugins[0]` ends up outermost. With no
/// plugins the terminal is returned as is.
pub fn build_chain(
    plugins: &[PluginSlot],
    command: &str,
    driver: &DriverRef,
    args: &[Value],
    terminal: Next,
) -> Next {
    plugins.iter().rev().fold(terminal, |next, slot| {
        let handler = slot.resolve(command);
        let plugin_name = slot.name().to_string();
        let link_driver = driver.clone();
        let link_command = command.to_string();
        let link_args = args.to_vec();

        Next::new(command, driver.clone(), move || {
            let span = tracing::debug_span!(
                "plugin_link",
                plugin = %plugin_name,
                command = %link_command,
                handler = handler.kind(),
            );
            handler
                .invoke(next, link_driver, link_command, link_args)
                .instrument(span)
                .boxed()
        })
    })
}
