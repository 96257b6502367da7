/// PostgreSQL connection pool setup
use crate::error::ApiResult;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Create a PostgreSQL connection pool from a DSN.
pub async fn create_pool(dsn: &str) -> ApiResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(3))
        .max_lifetime(Duration::from_secs(1800))
        .idle_timeout(Duration::from_secs(600))
        .connect(dsn)
        .await?;

    info!("database connection established");
    Ok(pool)
}

/// Verify database connectivity.
pub async fn ping(pool: &PgPool) -> ApiResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
