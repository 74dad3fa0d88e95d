//! HTTP API and WebSocket feed for the Lua error panel.
//!
//! Every tenant-facing route takes the caller from the `x-user-id` and
//! `x-user-admin` headers and passes it explicitly into the log service.

pub mod config;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;
pub mod websocket;

pub use config::WebConfig;
pub use extract::{ApiError, ApiResult};
pub use router::create_app;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use tracing::info;

use crate::error::{LogError, Result};

/// Serve the API until `shutdown` resolves.
pub async fn start_web_server<F>(state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = state.config.clone();
    let app = create_app(state);

    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| LogError::config_error(format!("Invalid bind address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LogError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    info!("Starting luawatch API on http://{}", addr);
    info!("WebSocket feed: ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| LogError::web_server_error(format!("Server error: {}", e)))?;

    info!("Web server stopped");
    Ok(())
}
