//! HTTP server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::RpcServerError;
use super::handlers::RpcState;
use super::routes::create_router;
use crate::core::TimingSystem;

/// Serves the RPC routes on `addr` until `shutdown` is cancelled.
pub async fn serve(
    system: Arc<TimingSystem>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), RpcServerError> {
    let router = create_router(RpcState::new(system));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| RpcServerError::Bind { addr, source })?;
    info!(addr = %addr, "rpc server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("rpc server stopped");
    Ok(())
}
