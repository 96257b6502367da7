/// User handlers: register, login, identity echo, owned links and stats
use super::{require_user_id, ApiJson};
use crate::auth::Identity;
use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};
use crate::shortlink::repo::{StatsResponse, UserShortlink};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MINE_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: i64,
    pub username: String,
}

pub async fn register(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let id = ctx.users.register(&req.username, &req.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id,
            username: req.username.trim().to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn login(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = match ctx.users.find_by_username(&req.username).await {
        Ok(user) => user,
        Err(ApiError::NotFound) => return Err(ApiError::Unauthenticated("invalid credentials")),
        Err(e) => return Err(e),
    };

    if !ctx
        .users
        .verify_password(&req.password, &user.password_hash)
        .await?
    {
        return Err(ApiError::Unauthenticated("invalid credentials"));
    }

    let token = ctx
        .tokens
        .sign(&user.id.to_string(), &user.role)
        .map_err(|_| ApiError::UpstreamUnavailable("sign failed"))?;

    Ok(Json(LoginResponse { token }))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub role: String,
}

pub async fn me(Extension(identity): Extension<Identity>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: identity.user_id,
        role: identity.role,
    })
}

pub async fn mine(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<UserShortlink>>> {
    let user_id = require_user_id(&identity)?;
    let list = ctx.shortlinks.list_by_user_id(user_id, MINE_LIMIT).await?;
    Ok(Json(list))
}

pub async fn remove_from_mine(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
) -> ApiResult<StatusCode> {
    let user_id = require_user_id(&identity)?;
    ctx.shortlinks.remove_from_user_list(user_id, &code).await?;
    Ok(StatusCode::OK)
}

pub async fn stats(
    State(ctx): State<AppContext>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<StatsResponse>> {
    let user_id = require_user_id(&identity)?;

    if !ctx.shortlinks.user_owns_shortlink(user_id, &code).await? {
        return Err(ApiError::Forbidden("no permission"));
    }

    let limit = match params.get("limit") {
        None => 20,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| (1..=100).contains(n))
            .ok_or_else(|| ApiError::InvalidInput("invalid limit".to_string()))?,
    };
    let cursor = match params.get("cursor") {
        None => 0,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ApiError::InvalidInput("invalid cursor".to_string()))?,
    };

    let stats = ctx.shortlinks.list_stats_by_code(&code, limit, cursor).await?;
    Ok(Json(stats))
}
