use gee_api::{
    api,
    auth::TokenService,
    config::Config,
    context::AppContext,
    db,
    error::ApiResult,
    migrate,
    ratelimit::SlidingWindowLimiter,
    research::{ApiKeysRepo, ResearchQueue, ResearchWorker, RunsRepo},
    server,
    shortlink::cache::{CodeFilter, LocalCache, ShortlinkCache},
    shortlink::repo::ShortlinkRepo,
    stats::{ChannelCollector, ClickConsumer, Collector, KafkaClickConsumer, KafkaCollector},
    users::UsersRepo,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLICK_BUFFER_SIZE: usize = 10_000;
const LOCAL_CACHE_ITEMS: u64 = 100_000;
const FILTER_EXPECTED_CODES: usize = 1_000_000;
const FILTER_FP_RATE: f64 = 0.01;

#[tokio::main]
async fn main() {
    let cfg = Config::from_env();
    init_logging(&cfg);

    if let Err(e) = run(cfg).await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> ApiResult<()> {
    // Database
    let pool = db::create_pool(&cfg.db_dsn).await?;
    db::ping(&pool).await?;
    let migrations_dir = migrate::resolve_dir()?;
    let migrations = migrate::up(&pool, &migrations_dir).await?;
    info!(
        applied = migrations.applied.len(),
        skipped = migrations.skipped.len(),
        "schema migrations up to date"
    );

    // Redis
    let redis_client = redis::Client::open(cfg.redis_url())?;
    let redis_conn = ConnectionManager::new(redis_client).await?;
    info!("redis connection established");

    // Rate limiter
    let limiter = if cfg.rate_limit_enabled {
        Some(Arc::new(SlidingWindowLimiter::new(redis_conn.clone())))
    } else {
        warn!("rate limiting disabled by config");
        None
    };

    // Shortlink caches and repository
    let local_cache = LocalCache::new(LOCAL_CACHE_ITEMS);
    let sl_cache = Arc::new(ShortlinkCache::new(redis_conn.clone(), Some(local_cache)));
    let filter = Arc::new(CodeFilter::new(FILTER_EXPECTED_CODES, FILTER_FP_RATE));
    let shortlinks = Arc::new(ShortlinkRepo::new(
        pool.clone(),
        Some(sl_cache),
        Some(filter),
    ));
    match shortlinks.warm_filter().await {
        Ok(count) => info!(codes = count, "membership filter warmed"),
        Err(e) => warn!(error = %e, "membership filter warm-up failed"),
    }

    let users = Arc::new(UsersRepo::new(pool.clone()));
    let tokens = Arc::new(TokenService::new(&cfg.jwt_secret, &cfg.jwt_issuer, cfg.jwt_ttl)?);

    // Click pipeline: in-process channel or Kafka, per config.
    let mut channel_consumer = None;
    let mut kafka_consumer = None;
    let collector: Arc<dyn Collector> = if cfg.kafka_enabled {
        info!(brokers = ?cfg.kafka_brokers, topic = %cfg.kafka_topic, "collecting clicks via kafka");
        kafka_consumer = Some(KafkaClickConsumer::new(
            &cfg.kafka_brokers,
            &cfg.kafka_topic,
            pool.clone(),
        )?);
        Arc::new(KafkaCollector::new(&cfg.kafka_brokers, &cfg.kafka_topic)?)
    } else {
        info!("collecting clicks via in-process channel");
        let (collector, rx) = ChannelCollector::new(CLICK_BUFFER_SIZE);
        channel_consumer = Some(ClickConsumer::new(pool.clone(), rx));
        Arc::new(collector)
    };

    // Research subsystem
    let runs = Arc::new(RunsRepo::new(pool.clone()));
    let api_keys = Arc::new(ApiKeysRepo::new(pool.clone()));
    let research_queue = Arc::new(
        ResearchQueue::new(
            redis_conn.clone(),
            &cfg.ai_research_stream,
            &cfg.ai_research_group,
            &cfg.ai_research_consumer,
        )
        .await?,
    );

    if cfg.pprof_enabled {
        warn!("PPROF_ENABLED is set but profiling endpoints are not available in this build");
    }
    if cfg.tracing_enabled {
        info!(endpoint = %cfg.otlp_grpc_endpoint, "trace export is handled by an external collector");
    }

    let ctx = AppContext {
        config: Arc::new(cfg.clone()),
        db: pool.clone(),
        shortlinks,
        users,
        tokens,
        collector,
        runs: Arc::clone(&runs),
        api_keys,
        research_queue: Arc::clone(&research_queue),
        limiter,
    };

    // Process-wide stop signal shared by listeners and background tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            server::shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    if let Some(consumer) = channel_consumer {
        tokio::spawn(consumer.run(shutdown_rx.clone()));
    }
    if let Some(consumer) = kafka_consumer {
        tokio::spawn(consumer.run(shutdown_rx.clone()));
    }
    if cfg.ai_worker_enabled {
        let worker = ResearchWorker::new(research_queue, runs);
        tokio::spawn(worker.run(shutdown_rx.clone()));
    } else {
        warn!("research worker disabled by config");
    }

    // Public and admin listeners start concurrently.
    let public_app = api::router(ctx.clone());
    let admin_app = api::admin::router(ctx);

    let (err_tx, mut err_rx) = mpsc::channel::<ApiResult<()>>(2);
    {
        let tx = err_tx.clone();
        let rx = shutdown_rx.clone();
        let addr = cfg.bind_addr();
        tokio::spawn(async move {
            let _ = tx.send(server::run("public", &addr, public_app, rx).await).await;
        });
    }
    {
        let tx = err_tx;
        let rx = shutdown_rx;
        let addr = cfg.admin_addr.clone();
        tokio::spawn(async move {
            let _ = tx.send(server::run("admin", &addr, admin_app, rx).await).await;
        });
    }

    // Wait for the first listener to exit; on failure, propagate the stop
    // and give the other listener a bounded window to drain.
    let first = err_rx.recv().await.unwrap_or(Ok(()));
    let _ = shutdown_tx.send(true);
    let drain = cfg.shutdown_timeout + Duration::from_secs(1);
    let _ = timeout(drain, err_rx.recv()).await;
    first
}

fn init_logging(cfg: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
