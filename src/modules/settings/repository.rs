use super::model::{FIELD_CUSTOM_NAME, FIELD_QUALITY, FIELD_THUMBNAIL, UserSettings};
use crate::infrastructure::redis::client::RedisService;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("settings store unavailable: {0}")]
    Store(#[from] redis::RedisError),
}

impl From<validator::ValidationErrors> for SettingsError {
    fn from(e: validator::ValidationErrors) -> Self {
        SettingsError::Invalid(e.to_string())
    }
}

/// Key-value access to per-owner settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self, owner: i64) -> Result<UserSettings, SettingsError>;

    async fn save(&self, owner: i64, settings: &UserSettings) -> Result<(), SettingsError>;
}

/// One hash per owner: `settings:<owner>`.
#[derive(Clone)]
pub struct RedisSettingsRepository {
    redis: RedisService,
}

impl RedisSettingsRepository {
    pub fn new(redis: RedisService) -> Self {
        Self { redis }
    }

    fn key(owner: i64) -> String {
        format!("settings:{}", owner)
    }
}

#[async_trait]
impl SettingsStore for RedisSettingsRepository {
    async fn load(&self, owner: i64) -> Result<UserSettings, SettingsError> {
        let mut conn = self.redis.get_conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(Self::key(owner)).await?;
        Ok(UserSettings::from_fields(&fields))
    }

    async fn save(&self, owner: i64, settings: &UserSettings) -> Result<(), SettingsError> {
        let mut conn = self.redis.get_conn().await?;
        let key = Self::key(owner);
        let (set, unset) = hash_writes(settings);

        let _: () = conn.hset_multiple(&key, set.as_slice()).await?;
        if !unset.is_empty() {
            let _: () = conn.hdel(&key, unset).await?;
        }
        Ok(())
    }
}

/// Fields to `HSET` and fields to `HDEL` so the hash mirrors `settings`.
/// Cleared values are removed rather than stored empty.
fn hash_writes(settings: &UserSettings) -> (Vec<(&'static str, String)>, Vec<&'static str>) {
    let mut set = vec![(FIELD_QUALITY, settings.quality.label().to_string())];
    let mut unset = Vec::new();
    for (field, value) in [
        (FIELD_CUSTOM_NAME, &settings.custom_name),
        (FIELD_THUMBNAIL, &settings.thumbnail),
    ] {
        match value {
            Some(v) => set.push((field, v.clone())),
            None => unset.push(field),
        }
    }
    (set, unset)
}

/// Process-local store for tests and Redis-less runs.
#[derive(Default)]
pub struct MemorySettingsRepository {
    entries: RwLock<HashMap<i64, UserSettings>>,
}

#[async_trait]
impl SettingsStore for MemorySettingsRepository {
    async fn load(&self, owner: i64) -> Result<UserSettings, SettingsError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, owner: i64, settings: &UserSettings) -> Result<(), SettingsError> {
        self.entries.write().await.insert(owner, settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::profile::Quality;

    #[test]
    fn one_hash_per_owner() {
        assert_eq!(RedisSettingsRepository::key(42), "settings:42");
        assert_eq!(RedisSettingsRepository::key(-100123), "settings:-100123");
    }

    #[test]
    fn cleared_values_are_deleted_from_the_hash() {
        let settings = UserSettings {
            quality: Quality::P480,
            custom_name: None,
            thumbnail: None,
        };
        let (set, unset) = hash_writes(&settings);
        assert_eq!(set, vec![(FIELD_QUALITY, "480p".to_string())]);
        assert_eq!(unset, vec![FIELD_CUSTOM_NAME, FIELD_THUMBNAIL]);
    }

    #[test]
    fn written_fields_read_back_as_the_same_settings() {
        let settings = UserSettings {
            quality: Quality::P360,
            custom_name: Some("promo".to_string()),
            thumbnail: Some("AgAD".to_string()),
        };
        let (set, unset) = hash_writes(&settings);
        assert!(unset.is_empty());

        let fields: HashMap<String, String> = set
            .into_iter()
            .map(|(field, value)| (field.to_string(), value))
            .collect();
        assert_eq!(UserSettings::from_fields(&fields), settings);
    }

    #[test]
    fn absent_hash_reads_as_defaults() {
        assert_eq!(UserSettings::from_fields(&HashMap::new()), UserSettings::default());
    }

    #[tokio::test]
    async fn memory_store_keeps_owners_apart() {
        let store = MemorySettingsRepository::default();
        let mut mine = store.load(1).await.unwrap();
        mine.quality = Quality::P360;
        store.save(1, &mine).await.unwrap();

        assert_eq!(store.load(1).await.unwrap().quality, Quality::P360);
        assert_eq!(store.load(2).await.unwrap(), UserSettings::default());
    }
}
