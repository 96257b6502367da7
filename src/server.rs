/// Listener construction and graceful shutdown
use crate::error::{ApiError, ApiResult};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Serve `app` on `addr` until the stop signal fires, then drain in-flight
/// connections. Returns when the listener exits.
pub async fn run(
    name: &'static str,
    addr: &str,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> ApiResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::Internal(format!("{} listener bind {} failed: {}", name, addr, e)))?;

    info!(listener = name, addr = addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
        info!(listener = name, "draining");
    })
    .await
    .map_err(|e| ApiError::Internal(format!("{} server error: {}", name, e)))
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
