use crate::config::env::{self, EnvKey};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Where per-user settings live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsBackend {
    Redis,
    /// Lost on restart; for local runs without Redis.
    Memory,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub redis_url: String,
    pub bot_token: String,
    pub telegram_api_url: String,
    pub webhook_secret: String,
    pub webhook_url: Option<String>,
    pub authorized_users: Vec<i64>,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ffmpeg_global_args: Vec<String>,
    pub progress_interval: Duration,
    pub ingest_queue_capacity: usize,
    pub settings_store: SettingsBackend,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let authorized_users = parse_user_list(&required(EnvKey::AuthorizedUsers)?).map_err(
            |reason| ConfigError::Invalid {
                key: EnvKey::AuthorizedUsers.as_str(),
                reason,
            },
        )?;

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            redis_url: required(EnvKey::RedisUrl)?,
            bot_token: required(EnvKey::BotToken)?,
            telegram_api_url: checked_url(
                EnvKey::TelegramApiUrl,
                env::get_or(EnvKey::TelegramApiUrl, "https://api.telegram.org"),
            )?,
            webhook_secret: required(EnvKey::WebhookSecret)?,
            webhook_url: env::get_opt(EnvKey::WebhookUrl)
                .map(|u| checked_url(EnvKey::WebhookUrl, u))
                .transpose()?,
            authorized_users,
            scratch_dir: PathBuf::from(env::get_or(EnvKey::ScratchDir, "scratch")),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
            ffmpeg_global_args: env::get_or(EnvKey::FfmpegGlobalArgs, "")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            progress_interval: Duration::from_secs(
                env::get_parsed(EnvKey::ProgressIntervalSecs, 5u64).max(1),
            ),
            ingest_queue_capacity: env::get_parsed(EnvKey::IngestQueueCapacity, 64usize).max(1),
            settings_store: parse_settings_backend(&env::get_or(EnvKey::SettingsStore, "redis"))?,
        })
    }
}

fn required(key: EnvKey) -> Result<String, ConfigError> {
    env::get_opt(key).ok_or(ConfigError::Missing(key.as_str()))
}

fn checked_url(key: EnvKey, raw: String) -> Result<String, ConfigError> {
    match Url::parse(&raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(raw),
        Ok(url) => Err(ConfigError::Invalid {
            key: key.as_str(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key: key.as_str(),
            reason: e.to_string(),
        }),
    }
}

fn parse_settings_backend(raw: &str) -> Result<SettingsBackend, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "redis" => Ok(SettingsBackend::Redis),
        "memory" => Ok(SettingsBackend::Memory),
        other => Err(ConfigError::Invalid {
            key: EnvKey::SettingsStore.as_str(),
            reason: format!("expected 'redis' or 'memory', got '{}'", other),
        }),
    }
}

fn parse_user_list(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|e| format!("'{}': {}", s, e)))
        .collect()
}
