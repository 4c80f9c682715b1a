use anyhow::{Context, anyhow};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod middleware;
mod modules;
mod pipeline;
mod routes;
mod state;
mod workers;

use config::settings::{AppConfig, SettingsBackend};
use infrastructure::redis::client::RedisService;
use infrastructure::telegram::client::TelegramClient;
use modules::bot::service::BotService;
use modules::settings::repository::{
    MemorySettingsRepository, RedisSettingsRepository, SettingsStore,
};
use modules::settings::service::SettingsService;
use pipeline::bridge::{AccessPolicy, IngestBridge};
use pipeline::cleanup::ScratchSpace;
use pipeline::encoder::Supervisor;
use pipeline::machine::JobRunner;
use pipeline::probe::Prober;
use pipeline::tally::JobTally;
use state::AppState;
use workers::transcoder::{TranscoderWorker, start_transcoder_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("invalid configuration")?;
    let (redis, store): (RedisService, Arc<dyn SettingsStore>) = match config.settings_store {
        SettingsBackend::Redis => {
            let redis = RedisService::new(&config.redis_url)
                .await
                .context("failed to connect to Redis")?;
            let store: Arc<dyn SettingsStore> = Arc::new(RedisSettingsRepository::new(redis.clone()));
            (redis, store)
        }
        SettingsBackend::Memory => {
            warn!("Settings are kept in memory and will be lost on restart");
            let redis = RedisService::open(&config.redis_url).context("invalid REDIS_URL")?;
            let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsRepository::default());
            (redis, store)
        }
    };
    let telegram = TelegramClient::new(&config.telegram_api_url, &config.bot_token)
        .context("failed to build the Bot API client")?;
    let settings = SettingsService::new(store);

    let (bridge, queue) = IngestBridge::new(
        config.ingest_queue_capacity,
        AccessPolicy::allow_list(config.authorized_users.iter().copied()),
    );
    let runner = JobRunner::new(
        Arc::new(telegram.clone()),
        Arc::new(telegram.clone()),
        Prober::new(&config.ffprobe_path),
        Supervisor::new(&config.ffmpeg_path, config.progress_interval)
            .with_global_args(config.ffmpeg_global_args.clone()),
        ScratchSpace::new(&config.scratch_dir),
    );
    let jobs = JobTally::default();
    let (report_tx, reports) = mpsc::unbounded_channel();
    tokio::spawn(jobs.clone().observe(reports));
    let worker = start_transcoder_worker(
        TranscoderWorker::new(runner, settings.clone()).with_reports(report_tx),
        queue,
    )
    .context("failed to start the transcoder thread")?;

    if let Some(url) = &config.webhook_url {
        if let Err(e) = telegram.set_webhook(url, &config.webhook_secret).await {
            warn!("Could not register webhook: {}", e);
        }
    }

    let addr = format!("0.0.0.0:{}", config.server_port);
    let state = AppState::new(config, redis, telegram, settings, bridge, jobs);
    let app = app::create_app(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server running on http://{}", addr);

    tokio::spawn(async move {
        BotService::notify_startup(&state).await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HTTP server stopped, waiting for the pipeline to drain");
    tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow!("transcoder thread panicked"))?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
