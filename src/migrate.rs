/// Schema migration runner.
///
/// Applies lexicographically ordered `*.sql` files from the migrations
/// directory exactly once. Each file runs inside a single transaction that
/// both executes the file and records its version in `schema_migrations`.
use crate::error::{ApiError, ApiResult};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tracing::info;

/// Outcome of a migration run.
#[derive(Debug, Default)]
pub struct MigrationResult {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Apply all pending migrations from `dir`.
pub async fn up(pool: &PgPool, dir: &Path) -> ApiResult<MigrationResult> {
    ensure_table(pool).await?;

    let mut result = MigrationResult::default();
    for name in list_sql_files(dir)? {
        if is_applied(pool, &name).await? {
            result.skipped.push(name);
            continue;
        }
        apply_file(pool, dir, &name).await?;
        info!(version = %name, "migration applied");
        result.applied.push(name);
    }
    Ok(result)
}

async fn ensure_table(pool: &PgPool) -> ApiResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version TEXT PRIMARY KEY,
           applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Sorted list of migration file names under `dir`.
fn list_sql_files(dir: &Path) -> ApiResult<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ApiError::Internal(format!("read migrations dir {:?}: {}", dir, e)))?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.to_ascii_lowercase().ends_with(".sql"))
        .collect();
    names.sort();
    Ok(names)
}

async fn is_applied(pool: &PgPool, version: &str) -> ApiResult<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version=$1)")
            .bind(version)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

async fn apply_file(pool: &PgPool, dir: &Path, name: &str) -> ApiResult<()> {
    let path: PathBuf = dir.join(name);
    let sql = std::fs::read_to_string(&path)
        .map_err(|e| ApiError::Internal(format!("read migration {}: {}", name, e)))?;

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(&sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("apply migration {}: {}", name, e)))?;
    sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Resolve the migrations directory: `$MIGRATIONS_DIR`, then `./migrations`.
pub fn resolve_dir() -> ApiResult<PathBuf> {
    if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let dir = PathBuf::from("migrations");
    if dir.is_dir() {
        return Ok(dir);
    }
    Err(ApiError::Internal("migrations dir not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_sql_files_is_sorted_and_filtered() {
        let dir = std::env::temp_dir().join(format!("migrate-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("0002_b.sql"), "SELECT 2;").unwrap();
        std::fs::write(dir.join("0001_a.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.join("0010_c.SQL"), "SELECT 3;").unwrap();

        let names = list_sql_files(&dir).unwrap();
        assert_eq!(names, vec!["0001_a.sql", "0002_b.sql", "0010_c.SQL"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
