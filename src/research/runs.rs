/// Research run repository.
///
/// State machine: pending -> running -> (succeeded | failed). Marking a run
/// running is idempotent over `status IN ('pending','running')` and never
/// overwrites the original `started_at`, so redelivered jobs are harmless.
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::timeout;

const DB_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct CreateRunParams {
    pub user_id: i64,
    pub api_key_id: i64,
    pub topic: String,
    pub sources: Vec<String>,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Run {
    pub id: i64,
    pub user_id: i64,
    pub api_key_id: i64,
    pub status: String,
    pub topic: String,
    #[sqlx(json)]
    pub sources: Vec<String>,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_md: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub tokens_used: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

pub struct RunsRepo {
    db: PgPool,
}

impl RunsRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, params: CreateRunParams) -> ApiResult<i64> {
        let sources = serde_json::to_value(&params.sources)
            .map_err(|e| ApiError::Internal(format!("sources serialization failed: {}", e)))?;

        let id: i64 = timeout(
            DB_DEADLINE,
            sqlx::query_scalar(
                "INSERT INTO ai_research_runs (user_id, api_key_id, status, topic, sources, language)
                 VALUES ($1, $2, 'pending', $3, $4, $5)
                 RETURNING id",
            )
            .bind(params.user_id)
            .bind(params.api_key_id)
            .bind(&params.topic)
            .bind(&sources)
            .bind(&params.language)
            .fetch_one(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("run insert"))??;
        Ok(id)
    }

    pub async fn get_for_user(&self, run_id: i64, user_id: i64) -> ApiResult<Run> {
        let run = timeout(
            DB_DEADLINE,
            sqlx::query_as::<_, Run>(
                "SELECT id, user_id, api_key_id, status, topic, sources, language,
                        result_md, error, created_at, started_at, finished_at,
                        tokens_used, cost_usd
                 FROM ai_research_runs
                 WHERE id=$1 AND user_id=$2
                 LIMIT 1",
            )
            .bind(run_id)
            .bind(user_id)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("run lookup"))??;

        run.ok_or(ApiError::NotFound)
    }

    pub async fn mark_running(&self, run_id: i64) -> ApiResult<()> {
        timeout(
            DB_DEADLINE,
            sqlx::query(
                "UPDATE ai_research_runs
                 SET status='running', started_at = COALESCE(started_at, now())
                 WHERE id=$1 AND status IN ('pending','running')",
            )
            .bind(run_id)
            .execute(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("run update"))??;
        Ok(())
    }

    pub async fn mark_succeeded(
        &self,
        run_id: i64,
        result_md: &str,
        tokens_used: i32,
        cost_usd: f64,
    ) -> ApiResult<()> {
        timeout(
            DB_DEADLINE,
            sqlx::query(
                "UPDATE ai_research_runs
                 SET status='succeeded', result_md=$2, tokens_used=$3, cost_usd=$4,
                     finished_at=now(), error=NULL
                 WHERE id=$1",
            )
            .bind(run_id)
            .bind(result_md)
            .bind(tokens_used)
            .bind(cost_usd)
            .execute(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("run update"))??;
        Ok(())
    }

    pub async fn mark_failed(&self, run_id: i64, error_message: &str) -> ApiResult<()> {
        timeout(
            DB_DEADLINE,
            sqlx::query(
                "UPDATE ai_research_runs
                 SET status='failed', error=$2, finished_at=now()
                 WHERE id=$1",
            )
            .bind(run_id)
            .bind(error_message)
            .execute(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("run update"))??;
        Ok(())
    }
}
