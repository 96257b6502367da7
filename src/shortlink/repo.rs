/// Shortlink repository: authoritative create / resolve / disable / list
/// over PostgreSQL, with write-through caching and the membership filter
/// gating the read path.
use super::cache::{CodeFilter, ShortlinkCache, NOT_FOUND_SENTINEL};
use super::codec;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

const RESOLVE_DEADLINE: Duration = Duration::from_secs(1);
const CREATE_DEADLINE: Duration = Duration::from_secs(3);
const READ_DEADLINE: Duration = Duration::from_secs(1);
const LIST_DEADLINE: Duration = Duration::from_secs(3);
const CACHE_FILL_DEADLINE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShortlinkMetadata {
    pub url: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserShortlink {
    pub code: String,
    pub url: String,
    pub disabled: bool,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClickStat {
    /// Row id, used as the keyset pagination cursor.
    pub id: i64,
    pub clicked_at: DateTime<Utc>,
    pub referer: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub total_clicks: i64,
    pub recent_clicks: Vec<ClickStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
}

pub struct ShortlinkRepo {
    db: PgPool,
    cache: Option<Arc<ShortlinkCache>>,
    /// Optional membership gate; None skips the gate entirely.
    filter: Option<Arc<CodeFilter>>,
}

impl ShortlinkRepo {
    pub fn new(
        db: PgPool,
        cache: Option<Arc<ShortlinkCache>>,
        filter: Option<Arc<CodeFilter>>,
    ) -> Self {
        Self { db, cache, filter }
    }

    /// Create a shortlink for `url`, generating the code from the row id.
    ///
    /// Concurrent creates for the same URL race on the url-unique index; the
    /// upsert returns the existing row's id and code atomically so the loser
    /// converges on the winner's code.
    pub async fn create(&self, url: &str, created_by: Option<i64>) -> ApiResult<String> {
        let code = timeout(CREATE_DEADLINE, self.create_tx(url, created_by))
            .await
            .map_err(|_| ApiError::Timeout("shortlink create"))??;

        metrics::SHORTLINK_CREATED.inc();
        if let Some(filter) = &self.filter {
            filter.add(&code);
        }
        self.cache_fill(&code, url).await;
        Ok(code)
    }

    async fn create_tx(&self, url: &str, created_by: Option<i64>) -> ApiResult<String> {
        let mut tx = self.db.begin().await?;

        let (id, mut code): (i64, String) = sqlx::query_as(
            "INSERT INTO shortlinks (url, disabled) VALUES ($1, false)
             ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url
             RETURNING id, COALESCE(code, '')",
        )
        .bind(url)
        .fetch_one(&mut *tx)
        .await?;

        if code.is_empty() {
            let new_code = codec::encode(id as u64)?;
            // Only set the code when still missing; if a concurrent writer
            // already set it, fall back to reading the stored value.
            let updated: Option<String> = sqlx::query_scalar(
                "UPDATE shortlinks SET code=$1 WHERE id=$2 AND (code IS NULL OR code='')
                 RETURNING code",
            )
            .bind(&new_code)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            code = match updated {
                Some(c) => c,
                None => {
                    sqlx::query_scalar("SELECT code FROM shortlinks WHERE id=$1")
                        .bind(id)
                        .fetch_one(&mut *tx)
                        .await?
                }
            };
        }

        if let Some(user_id) = created_by {
            sqlx::query(
                "INSERT INTO user_shortlinks (user_id, shortlink_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(code)
    }

    /// Create a shortlink with a caller-chosen code.
    ///
    /// Conflict rules:
    /// - code taken by another URL        -> CodeAlreadyExists
    /// - url stored with a different code -> UrlHasDifferentCode
    /// - url stored without a code        -> adopt the custom code
    /// - url stored with the same code    -> idempotent success
    pub async fn create_with_custom_code(
        &self,
        url: &str,
        code: &str,
        created_by: Option<i64>,
    ) -> ApiResult<String> {
        let got = timeout(CREATE_DEADLINE, self.create_custom_tx(url, code, created_by))
            .await
            .map_err(|_| ApiError::Timeout("shortlink create"))??;

        metrics::SHORTLINK_CREATED.inc();
        if let Some(filter) = &self.filter {
            filter.add(&got);
        }
        self.cache_fill(&got, url).await;
        Ok(got)
    }

    async fn create_custom_tx(
        &self,
        url: &str,
        code: &str,
        created_by: Option<i64>,
    ) -> ApiResult<String> {
        let mut tx = self.db.begin().await?;

        let inserted: Option<(i64, String)> = sqlx::query_as(
            "INSERT INTO shortlinks (url, code, disabled) VALUES ($1, $2, false)
             ON CONFLICT (url) DO NOTHING
             RETURNING id, code",
        )
        .bind(url)
        .bind(code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| promote_code_conflict(e))?;

        let (id, got_code) = match inserted {
            Some(row) => row,
            None => {
                // The URL already exists; reconcile with its stored code.
                let (id, existing): (i64, String) =
                    sqlx::query_as("SELECT id, COALESCE(code, '') FROM shortlinks WHERE url=$1")
                        .bind(url)
                        .fetch_one(&mut *tx)
                        .await?;

                if !existing.is_empty() && existing != code {
                    return Err(ApiError::UrlHasDifferentCode);
                }
                if existing.is_empty() {
                    let adopted: Option<String> = sqlx::query_scalar(
                        "UPDATE shortlinks SET code=$1 WHERE url=$2 AND (code IS NULL OR code='')
                         RETURNING code",
                    )
                    .bind(code)
                    .bind(url)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| promote_code_conflict(e))?;

                    match adopted {
                        Some(adopted) => (id, adopted),
                        None => {
                            // A concurrent writer filled the code first.
                            let current: String =
                                sqlx::query_scalar("SELECT COALESCE(code, '') FROM shortlinks WHERE url=$1")
                                    .bind(url)
                                    .fetch_one(&mut *tx)
                                    .await?;
                            if current != code {
                                return Err(ApiError::UrlHasDifferentCode);
                            }
                            (id, current)
                        }
                    }
                } else {
                    (id, existing)
                }
            }
        };

        if let Some(user_id) = created_by {
            sqlx::query(
                "INSERT INTO user_shortlinks (user_id, shortlink_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(got_code)
    }

    /// Resolve a code to its target URL. Returns None for unknown or
    /// disabled codes; infrastructure failures degrade to a miss.
    pub async fn resolve(&self, code: &str) -> Option<String> {
        if let Some(cache) = &self.cache {
            match cache.get(code).await {
                Ok(Some(value)) => {
                    if value == NOT_FOUND_SENTINEL {
                        return None;
                    }
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, code, "cache read failed, falling through"),
            }
        }

        // Both tiers missed. A definite-negative from the filter suppresses
        // the database lookup for enumerated / random paths.
        if let Some(filter) = &self.filter {
            if !filter.might_exist(code) {
                metrics::record_cache_op("bloom", "rejected");
                return None;
            }
        }

        let lookup = timeout(
            RESOLVE_DEADLINE,
            sqlx::query_scalar::<_, String>(
                "SELECT url FROM shortlinks WHERE code=$1 AND disabled=false",
            )
            .bind(code)
            .fetch_optional(&self.db),
        )
        .await;

        match lookup {
            Ok(Ok(Some(url))) => {
                if let Some(filter) = &self.filter {
                    filter.add(code);
                }
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.set(code, &url).await {
                        warn!(error = %e, code, "cache write-through failed");
                    }
                }
                Some(url)
            }
            Ok(Ok(None)) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.set_not_found(code).await {
                        warn!(error = %e, code, "negative cache write failed");
                    }
                }
                None
            }
            Ok(Err(e)) => {
                error!(error = %e, code, "resolve query failed");
                None
            }
            Err(_) => {
                error!(code, "resolve query timed out");
                None
            }
        }
    }

    pub async fn find_by_code(&self, code: &str) -> ApiResult<ShortlinkMetadata> {
        let row = timeout(
            READ_DEADLINE,
            sqlx::query_as::<_, ShortlinkMetadata>(
                "SELECT url, disabled, created_at, updated_at FROM shortlinks WHERE code=$1",
            )
            .bind(code)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("shortlink lookup"))??;

        row.ok_or(ApiError::ShortlinkNotFound)
    }

    /// Disable a shortlink and purge both cache tiers for its code.
    pub async fn disable_by_code(&self, code: &str) -> ApiResult<()> {
        let updated: Option<i32> = timeout(
            READ_DEADLINE,
            sqlx::query_scalar(
                "UPDATE shortlinks SET disabled=true, updated_at=now()
                 WHERE code=$1 AND disabled=false
                 RETURNING 1",
            )
            .bind(code)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("shortlink disable"))??;

        if updated.is_some() {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.delete(code).await {
                    warn!(error = %e, code, "cache invalidation failed");
                }
            }
            return Ok(());
        }

        // No row updated: distinguish not-found from already-disabled.
        let disabled: Option<bool> =
            sqlx::query_scalar("SELECT disabled FROM shortlinks WHERE code=$1")
                .bind(code)
                .fetch_optional(&self.db)
                .await?;

        match disabled {
            None => Err(ApiError::ShortlinkNotFound),
            Some(true) => Err(ApiError::AlreadyDisabled),
            Some(false) => Err(ApiError::Internal("shortlink disable failed".to_string())),
        }
    }

    pub async fn list_by_user_id(&self, user_id: i64, limit: i64) -> ApiResult<Vec<UserShortlink>> {
        let rows = timeout(
            LIST_DEADLINE,
            sqlx::query_as::<_, UserShortlink>(
                "SELECT s.code, s.url, s.disabled, s.click_count, us.created_at
                 FROM user_shortlinks us
                 JOIN shortlinks s ON s.id = us.shortlink_id
                 WHERE us.user_id = $1
                 ORDER BY us.created_at DESC
                 LIMIT $2",
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("shortlink list"))??;

        Ok(rows)
    }

    /// Remove only the user association; the shortlink row stays.
    pub async fn remove_from_user_list(&self, user_id: i64, code: &str) -> ApiResult<()> {
        timeout(
            LIST_DEADLINE,
            sqlx::query(
                "DELETE FROM user_shortlinks us
                 USING shortlinks s
                 WHERE us.user_id = $1
                   AND us.shortlink_id = s.id
                   AND s.code = $2",
            )
            .bind(user_id)
            .bind(code)
            .execute(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("shortlink unlink"))??;
        Ok(())
    }

    pub async fn user_owns_shortlink(&self, user_id: i64, code: &str) -> ApiResult<bool> {
        let owns: bool = timeout(
            READ_DEADLINE,
            sqlx::query_scalar(
                "SELECT EXISTS(
                   SELECT 1 FROM user_shortlinks us
                   JOIN shortlinks s ON s.id = us.shortlink_id
                   WHERE us.user_id = $1 AND s.code = $2)",
            )
            .bind(user_id)
            .bind(code)
            .fetch_one(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("ownership check"))??;
        Ok(owns)
    }

    /// Keyset-paginated click stats, newest first. `cursor = 0` means the
    /// first page; `next_cursor` is present iff the page came back full.
    pub async fn list_stats_by_code(
        &self,
        code: &str,
        limit: i64,
        cursor: i64,
    ) -> ApiResult<StatsResponse> {
        let total: Option<i64> = timeout(
            LIST_DEADLINE,
            sqlx::query_scalar("SELECT click_count FROM shortlinks WHERE code=$1")
                .bind(code)
                .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("stats lookup"))??;

        let total_clicks = total.ok_or(ApiError::ShortlinkNotFound)?;

        let recent_clicks = if cursor == 0 {
            sqlx::query_as::<_, ClickStat>(
                "SELECT id, clicked_at, referer, user_agent FROM click_stats
                 WHERE code = $1 ORDER BY id DESC LIMIT $2",
            )
            .bind(code)
            .bind(limit)
            .fetch_all(&self.db)
            .await?
        } else {
            sqlx::query_as::<_, ClickStat>(
                "SELECT id, clicked_at, referer, user_agent FROM click_stats
                 WHERE code = $1 AND id < $2 ORDER BY id DESC LIMIT $3",
            )
            .bind(code)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.db)
            .await?
        };

        let next_cursor = if recent_clicks.len() as i64 == limit {
            recent_clicks.last().map(|c| c.id)
        } else {
            None
        };

        Ok(StatsResponse {
            total_clicks,
            recent_clicks,
            next_cursor,
        })
    }

    /// Seed the membership filter with every known code. Called once at
    /// startup so the gate does not reject codes created before this process.
    pub async fn warm_filter(&self) -> ApiResult<u64> {
        let Some(filter) = &self.filter else {
            return Ok(0);
        };
        let codes: Vec<String> =
            sqlx::query_scalar("SELECT code FROM shortlinks WHERE code IS NOT NULL AND code <> ''")
                .fetch_all(&self.db)
                .await?;
        let count = codes.len() as u64;
        for code in codes {
            filter.add(&code);
        }
        Ok(count)
    }

    /// Best-effort write-through after a successful create. Never fatal.
    async fn cache_fill(&self, code: &str, url: &str) {
        let Some(cache) = &self.cache else { return };
        if code.is_empty() {
            return;
        }
        match timeout(CACHE_FILL_DEADLINE, cache.set(code, url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, code, "cache fill failed"),
            Err(_) => warn!(code, "cache fill timed out"),
        }
    }
}

/// Map a unique violation on the code index to the typed conflict error.
fn promote_code_conflict(err: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505")
            && db.constraint().map_or(false, |c| c.to_lowercase().contains("code"))
        {
            return ApiError::CodeAlreadyExists;
        }
    }
    ApiError::Database(err)
}
