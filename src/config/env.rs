use std::env;
use std::str::FromStr;

#[derive(Clone, Copy, Debug)]
pub enum EnvKey {
    ServerPort,
    RedisUrl,
    BotToken,
    TelegramApiUrl,
    WebhookSecret,
    WebhookUrl,
    AuthorizedUsers,
    ScratchDir,
    FfmpegPath,
    FfprobePath,
    FfmpegGlobalArgs,
    ProgressIntervalSecs,
    IngestQueueCapacity,
    SettingsStore,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::BotToken => "BOT_TOKEN",
            EnvKey::TelegramApiUrl => "TELEGRAM_API_URL",
            EnvKey::WebhookSecret => "WEBHOOK_SECRET",
            EnvKey::WebhookUrl => "WEBHOOK_URL",
            EnvKey::AuthorizedUsers => "AUTHORIZED_USERS",
            EnvKey::ScratchDir => "SCRATCH_DIR",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::FfmpegGlobalArgs => "FFMPEG_GLOBAL_ARGS",
            EnvKey::ProgressIntervalSecs => "PROGRESS_INTERVAL_SECS",
            EnvKey::IngestQueueCapacity => "INGEST_QUEUE_CAPACITY",
            EnvKey::SettingsStore => "SETTINGS_STORE",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
