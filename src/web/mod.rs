use crate::error::{ConfigError, Result, ServerError};
use crate::state::AppState;
use std::sync::Arc;
use warp::Filter;

pub mod dispatch;


pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.bind_address();
    tracing::info!("Starting automation server on {}", addr);

    let routes = create_routes(state.clone());

    let addr: std::net::SocketAddr = addr.parse().map_err(|e| {
        ServerError::Config(ConfigError::Parse(format!("Invalid server address: {}", e)))
    })?;

    // Start server with graceful shutdown
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_rx.recv().await;
    })
    .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::AddrInUse, e)))?;

    tracing::info!(address = %bound, base_path = %state.config.base_path(), "Listening");
    server.await;

    tracing::info!("Automation server stopped");
    Ok(())
}

pub fn create_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(dispatch::metrics);

    let commands = warp::method()
        .and(warp::path::full())
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(dispatch::handle_request);

    metrics.or(commands)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}
