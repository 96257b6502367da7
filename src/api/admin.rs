/// Admin listener surface: metrics exposition, readiness and build info.
/// Bound to loopback by default; carries no business routes.
use crate::context::AppContext;
use crate::db;
use crate::metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

const READY_DEADLINE: Duration = Duration::from_secs(3);

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .with_state(ctx)
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::render_metrics()
}

/// Readiness is a live database ping.
async fn readyz(State(ctx): State<AppContext>) -> impl IntoResponse {
    match timeout(READY_DEADLINE, db::ping(&ctx.db)).await {
        Ok(Ok(())) => (StatusCode::OK, "DB ready"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "DB ping failed"),
    }
}

async fn version(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "service_name": ctx.config.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_COMMIT").unwrap_or("none"),
        "build_time": option_env!("BUILD_TIME").unwrap_or("unknown"),
    }))
}
