use crate::config::settings::AppConfig;
use crate::infrastructure::redis::client::RedisService;
use crate::infrastructure::telegram::client::TelegramClient;
use crate::modules::settings::service::SettingsService;
use crate::pipeline::bridge::IngestBridge;
use crate::pipeline::tally::JobTally;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub redis: RedisService,
    pub telegram: TelegramClient,
    pub settings: SettingsService,
    pub bridge: IngestBridge,
    pub jobs: JobTally,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        redis: RedisService,
        telegram: TelegramClient,
        settings: SettingsService,
        bridge: IngestBridge,
        jobs: JobTally,
    ) -> Self {
        Self {
            config: Arc::new(config),
            redis,
            telegram,
            settings,
            bridge,
            jobs,
        }
    }
}
