mod clock;
mod config;
mod db;
mod engine;
mod errors;
mod generation;
mod kv;
mod llm_client;
mod models;
mod notify;
mod platform;
mod retry;
mod routes;
mod state;
mod store;
mod telegram;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::create_pool;
use crate::engine::commands::WebhookCommandHandler;
use crate::engine::dedup::Deduplicator;
use crate::engine::pipeline::{ApplicationPipeline, PipelineDeps};
use crate::engine::quota::QuotaTracker;
use crate::engine::scheduler::Scheduler;
use crate::engine::token::TokenManager;
use crate::kv::{KvStore, MemoryKv, RedisKv};
use crate::llm_client::LlmClient;
use crate::platform::hh_client::HhClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::postgres::PgStore;
use crate::telegram::client::TelegramNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting auto-apply API v{}", env!("CARGO_PKG_VERSION"));

    let timeout = config.engine.external_call_timeout;

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db));

    // Initialize Redis, or fall back to process memory
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => {
            let redis = RedisKv::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            info!("Redis client initialized");
            Arc::new(redis)
        }
        None => {
            warn!("REDIS_URL not set; failure counters will not survive a restart");
            Arc::new(MemoryKv::new())
        }
    };

    // External clients
    let platform = Arc::new(
        HhClient::new(&config.platform, timeout).context("Failed to build platform client")?,
    );
    let llm = Arc::new(
        LlmClient::new(config.anthropic_api_key.clone(), timeout)
            .context("Failed to build LLM client")?,
    );
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let notifier = Arc::new(
        TelegramNotifier::new(config.telegram_bot_token.clone(), timeout)
            .context("Failed to build Telegram client")?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let quota = Arc::new(QuotaTracker::new());
    let dedup = Arc::new(Deduplicator::new(
        kv,
        store.clone(),
        config.engine.dedup_ttl,
    ));
    let tokens = Arc::new(TokenManager::new(
        store.clone(),
        platform.clone(),
        clock.clone(),
        config.engine.token_safety_margin,
        timeout,
    ));

    let pipeline = Arc::new(ApplicationPipeline::new(
        PipelineDeps {
            users: store.clone(),
            applications: store.clone(),
            source: platform,
            generator: llm,
            notifier: notifier.clone(),
            tokens,
            quota: quota.clone(),
            dedup,
            clock: clock.clone(),
        },
        config.engine.clone(),
    ));

    let scheduler = Scheduler::new(
        pipeline,
        store.clone(),
        notifier.clone(),
        clock.clone(),
        config.engine.clone(),
    );
    let resumed = scheduler
        .resume_enabled()
        .await
        .context("Failed to resume auto-apply runs")?;
    info!("Resumed {resumed} auto-apply run(s)");

    let webhook = Arc::new(WebhookCommandHandler::new(
        scheduler.clone(),
        store.clone(),
        store,
        notifier,
        quota,
        clock,
    ));

    // Build app state
    let state = AppState {
        webhook,
        webhook_secret: config.telegram_webhook_secret.clone(),
    };

    // Build router
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining auto-apply cycles");
    scheduler.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
