//! Process-wide state shared by every request

use crate::config::Config;
use crate::driver::DriverRef;
use crate::error::Result;
use crate::plugin::{PluginCatalog, PluginManager};
use crate::server::{build_server, Server};
use std::sync::Arc;
use tokio::sync::broadcast;

pub mod metrics;

pub use metrics::{Metrics, RequestTimer};

pub struct AppState {
    pub config: Config,
    pub plugins: Arc<PluginManager>,
    pub server: Server,
    pub driver: DriverRef,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Register the configured plugins, apply their server extensions and
    /// freeze the result.
    ///
    /// Any plugin failure (unknown name, invalid args, a failing extension)
    /// aborts startup.
    pub async fn build(
        config: Config,
        catalog: &PluginCatalog,
        driver: DriverRef,
    ) -> Result<(Arc<Self>, broadcast::Receiver<()>)> {
        let plugins = PluginManager::from_config(catalog, &config.use_plugins, &config.plugin_args)?;
        tracing::info!(plugins = ?plugins.names(), "Plugins registered");

        let server = build_server(&plugins).await?;

        let metrics = Arc::new(Metrics::new()?);
        metrics.set_registered_plugins(plugins.len());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let state = Arc::new(Self {
            config,
            plugins: Arc::new(plugins),
            server,
            driver,
            metrics,
            shutdown_tx,
        });

        Ok((state, shutdown_rx))
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating application shutdown");
        let _ = self.shutdown_tx.send(());
    }
}
