use server::{AppState, ServeError, ServerConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ServeError> {
    tracing_subscriber::fmt::init();

    if let Err(e) = dotenvy::dotenv() {
        info!(error = %e, ".env not loaded, using process environment");
    }

    let config = ServerConfig::from_env()?;
    let state = AppState::new(&config);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(port = config.port, "relay listening");

    server::serve(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
