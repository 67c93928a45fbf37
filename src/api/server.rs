use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use super::routes::build_router;
use crate::backend::ApprovedSecretsBackend;
use crate::config::ServerConfig;
use crate::errors::{ApprovalError, Result};

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(
    config: &ServerConfig,
    backend: Arc<ApprovedSecretsBackend>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| ApprovalError::config(format!("Invalid API address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ApprovalError::config(format!("Failed to bind API server: {}", e)))?;

    info!(address = %addr, "Starting HTTP API server");
    axum::serve(listener, build_router(backend))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApprovalError::internal(format!("API server error: {}", e)))?;

    info!("API server shutdown completed");
    Ok(())
}
