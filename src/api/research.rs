/// Research API: run submission/lookup and API key management
use super::{require_user_id, ApiJson};
use crate::auth::Identity;
use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};
use crate::research::api_keys::{ApiKeyIdentity, ApiKeyRow};
use crate::research::runs::{CreateRunParams, Run};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const MAX_TOPIC_LEN: usize = 200;
const MAX_KEY_NAME_LEN: usize = 64;
const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateResearchRunRequest {
    pub topic: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResearchRunResponse {
    pub run_id: i64,
}

pub async fn create_run(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<ApiKeyIdentity>,
    ApiJson(req): ApiJson<CreateResearchRunRequest>,
) -> ApiResult<(StatusCode, Json<CreateResearchRunResponse>)> {
    let topic = req.topic.trim().to_string();
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
        return Err(ApiError::InvalidInput("invalid topic".to_string()));
    }
    let language = req
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let run_id = ctx
        .runs
        .create(CreateRunParams {
            user_id: identity.user_id,
            api_key_id: identity.api_key_id,
            topic,
            sources: req.sources,
            language,
        })
        .await?;

    if let Err(e) = ctx.research_queue.enqueue(run_id).await {
        warn!(error = %e, run_id, "research enqueue failed");
        if let Err(e) = ctx.runs.mark_failed(run_id, "enqueue failed").await {
            warn!(error = %e, run_id, "mark failed after enqueue error");
        }
        return Err(ApiError::UpstreamUnavailable("enqueue failed"));
    }

    Ok((StatusCode::ACCEPTED, Json(CreateResearchRunResponse { run_id })))
}

pub async fn get_run(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Run>> {
    let run_id = id
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ApiError::InvalidInput("invalid id".to_string()))?;

    let run = ctx.runs.get_for_user(run_id, identity.user_id).await?;
    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateApiKeyRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: i64,
    pub name: String,
    pub prefix: String,
    pub created_at: DateTime<Utc>,
    /// The plain key. Returned exactly once, never stored.
    pub api_key: String,
}

pub async fn create_key(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    let user_id = require_user_id(&identity)?;
    let name = req.name.trim();
    if name.is_empty() || name.len() > MAX_KEY_NAME_LEN {
        return Err(ApiError::InvalidInput("invalid name".to_string()));
    }

    let (plain, row) = ctx.api_keys.create(user_id, name).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            id: row.id,
            name: row.name,
            prefix: row.prefix,
            created_at: row.created_at,
            api_key: plain,
        }),
    ))
}

pub async fn list_keys(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<ApiKeyRow>>> {
    let user_id = require_user_id(&identity)?;
    let rows = ctx.api_keys.list(user_id, 100).await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub ok: bool,
}

pub async fn revoke_key(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<RevokeResponse>> {
    let user_id = require_user_id(&identity)?;
    let key_id = id
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ApiError::InvalidInput("invalid id".to_string()))?;

    ctx.api_keys.revoke(user_id, key_id).await?;
    Ok(Json(RevokeResponse { ok: true }))
}
