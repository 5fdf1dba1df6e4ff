//! Listener setup and graceful shutdown.

use axum::Router;

use crate::config::ServerSection;

/// Binds the listener and serves the router until shutdown.
///
/// # Errors
///
/// Returns an error when the address cannot be bound or the server fails.
pub async fn serve(config: &ServerSection, router: Router) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
