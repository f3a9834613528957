use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use automation_plugin_chain::config;
use automation_plugin_chain::driver::LoopbackDriver;
use automation_plugin_chain::plugin::PluginCatalog;
use automation_plugin_chain::state::AppState;
use automation_plugin_chain::web;

#[derive(Parser, Debug)]
#[command(name = "automation-server")]
#[command(about = "Automation server with a pluggable command interception chain", long_about = None)]
struct Args {
    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Plugins to load, in chain order. Replaces `usePlugins` from the config.
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    use_plugins: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Configuration decides the log format, so it is loaded before tracing is up.
    let mut config = match &args.config {
        Some(path) => config::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => config::load_from_env_or_file().context("Failed to load configuration")?,
    };

    init_tracing(args.debug, config.log.json)?;
    match &args.config {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Configuration loaded from default locations"),
    }

    if let Some(plugins) = args.use_plugins {
        config.use_plugins = plugins;
        config::validate(&config)?;
    }

    let catalog = PluginCatalog::with_builtins();
    info!(available = ?catalog.names(), enabled = ?config.use_plugins, "Loading plugins");

    let (state, _shutdown_rx) = AppState::build(config, &catalog, Arc::new(LoopbackDriver::new()))
        .await
        .context("Failed to initialise plugins")?;

    let web_state = state.clone();
    let mut web_handle = tokio::spawn(async move { web::start_server(web_state).await });

    tokio::select! {
        _ = shutdown_signal() => {}
        finished = &mut web_handle => {
            // The server only stops on its own when it failed to start or crashed.
            finished.context("Automation server task panicked")??;
            return Ok(());
        }
    }

    info!("Shutting down automation server");
    state.shutdown();

    match tokio::time::timeout(tokio::time::Duration::from_secs(30), web_handle).await {
        Ok(Ok(Err(e))) => error!("Automation server error: {}", e),
        Ok(_) => info!("Graceful shutdown completed"),
        Err(_) => {
            error!("Shutdown timeout exceeded, forcing exit");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_tracing(debug: bool, json: bool) -> anyhow::Result<()> {
    let log_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("automation_plugin_chain={log_level}").parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
