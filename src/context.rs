/// Application context and dependency wiring
use crate::{
    auth::TokenService,
    config::Config,
    ratelimit::SlidingWindowLimiter,
    research::{ApiKeysRepo, ResearchQueue, RunsRepo},
    shortlink::repo::ShortlinkRepo,
    stats::Collector,
    users::UsersRepo,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Shared services handed to every handler and middleware.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub shortlinks: Arc<ShortlinkRepo>,
    pub users: Arc<UsersRepo>,
    pub tokens: Arc<TokenService>,
    pub collector: Arc<dyn Collector>,
    pub runs: Arc<RunsRepo>,
    pub api_keys: Arc<ApiKeysRepo>,
    pub research_queue: Arc<ResearchQueue>,
    /// None when rate limiting is disabled by configuration.
    pub limiter: Option<Arc<SlidingWindowLimiter>>,
}
