//! Smelt compiler service HTTP server.
//!
//! # Architecture
//!
//! The server consists of:
//! - **Routes**: axum handlers over one shared [`smelt_core::CompileService`]
//! - **Protocol**: JSON response shapes
//! - **Client**: client identity used as the rate limit key
//! - **Error**: mapping of core errors to HTTP responses
//!
//! The retention sweeper runs as a background task for the server's
//! lifetime.

pub mod client;
pub mod error;
pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use smelt_core::CompileService;

pub use client::ClientId;
pub use error::{ServerError, ServerResult};
pub use routes::{AppState, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Trust `X-Forwarded-For` for client identity.
    pub trust_forwarded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            trust_forwarded: false,
        }
    }
}

/// Run the HTTP server until Ctrl+C.
pub async fn serve(service: CompileService, config: ServerConfig) -> ServerResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", config.host, config.port)))?;

    let state = Arc::new(AppState::new(service, config.trust_forwarded));
    let sweeper_task = state.service.spawn_sweeper();
    let app = create_router(state.clone());

    let service_config = state.service.config();
    tracing::info!(
        "Starting smelt server at http://{} ({} workers, work dir {})",
        addr,
        state.service.pool().size(),
        service_config.work_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    // Handle Ctrl+C for graceful shutdown
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    // Peer addresses feed the rate limiter
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });

    server.await?;

    sweeper_task.abort();
    let _ = sweeper_task.await;

    tracing::info!("Server shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert!(!config.trust_forwarded);
    }
}
