//! Signaling relay server.
//!
//! Peers connect over WebSocket at `/ws`, register an identity, and exchange
//! signaling envelopes addressed by peer ID. The relay forwards frames and
//! keeps nothing beyond the in-memory registry of live connections.

pub mod config;
pub mod registry;
pub mod routes;
pub mod state;

pub use config::{ConfigError, ServerConfig};
pub use state::AppState;

use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the underlying server fails.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    axum::serve(listener, routes::app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
