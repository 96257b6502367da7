/// HTTP surface: route registration and shared handler plumbing
pub mod admin;
pub mod middleware;
pub mod research;
pub mod shortlinks;
pub mod users;

use crate::auth::Identity;
use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use self::middleware::{
    access_log, api_key_required, auth_optional, auth_required, rate_limit, request_id,
    require_admin, track_metrics, PanicResponder, RouteLimit,
};
use serde::de::DeserializeOwned;
use tower_http::catch_panic::CatchPanicLayer;

/// Build the public router with the full middleware chain.
pub fn router(ctx: AppContext) -> Router {
    let limiter = ctx.limiter.clone();
    let rl = |prefix: &'static str, limit: i64| RouteLimit::per_minute(limiter.clone(), prefix, limit);

    let users_routes = Router::new()
        .route("/me", get(users::me))
        .route("/mine", get(users::mine))
        .route("/mine/:code", delete(users::remove_from_mine))
        .route("/shortlinks/:code/stats", get(users::stats))
        .route_layer(from_fn_with_state(ctx.clone(), auth_required));

    let admin_routes = Router::new()
        .route("/ping", get(admin_ping))
        .route("/shortlinks/:code/disable", post(shortlinks::disable))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(ctx.clone(), auth_required));

    let research_routes = Router::new()
        .route(
            "/research",
            post(research::create_run).layer(from_fn_with_state(rl("research", 10), rate_limit)),
        )
        .route("/research/runs/:id", get(research::get_run))
        .route_layer(from_fn_with_state(ctx.clone(), api_key_required));

    let key_routes = Router::new()
        .route(
            "/api-keys",
            post(research::create_key)
                .layer(from_fn_with_state(rl("api_keys_create", 10), rate_limit))
                .get(research::list_keys),
        )
        .route("/api-keys/:id", delete(research::revoke_key))
        .route_layer(from_fn_with_state(ctx.clone(), auth_required));

    let api = Router::new()
        .route(
            "/shortlinks",
            post(shortlinks::create).layer(from_fn_with_state(rl("create", 10), rate_limit)),
        )
        .route("/shortlinks/:code", get(shortlinks::find))
        .route(
            "/register",
            post(users::register).layer(from_fn_with_state(rl("register", 3), rate_limit)),
        )
        .route(
            "/login",
            post(users::login).layer(from_fn_with_state(rl("login", 5), rate_limit)),
        )
        .nest("/users", users_routes)
        .nest("/admin", admin_routes)
        .merge(research_routes)
        .merge(key_routes)
        .layer(from_fn_with_state(ctx.clone(), auth_optional));

    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/:code",
            get(shortlinks::redirect).layer(from_fn_with_state(rl("redirect", 100), rate_limit)),
        )
        .nest("/api/v1", api)
        .route_layer(from_fn(track_metrics))
        .fallback(not_found)
        .with_state(ctx)
        .layer(from_fn(access_log))
        .layer(CatchPanicLayer::custom(PanicResponder))
        .layer(from_fn(request_id))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn admin_ping() -> &'static str {
    "pong"
}

/// Unmatched paths: keep the route label bounded and answer with the
/// standard error shape.
async fn not_found() -> ApiError {
    metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&["FALLBACK", "UNMATCHED", StatusCode::NOT_FOUND.as_str()])
        .inc();
    ApiError::NotFound
}

/// JSON body extractor producing this service's error shape on rejection.
/// Exactly one JSON value per body; unknown fields are rejected by the
/// target types.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::InvalidInput(rejection.body_text())),
        }
    }
}

/// Numeric user id from an authenticated identity.
pub(crate) fn require_user_id(identity: &Identity) -> ApiResult<i64> {
    identity
        .user_id
        .parse()
        .map_err(|_| ApiError::Internal("invalid user id".to_string()))
}
