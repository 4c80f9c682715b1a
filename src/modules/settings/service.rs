use super::dto::{CustomNameRequest, SettingsResponse};
use super::repository::{SettingsError, SettingsStore};
use crate::pipeline::job::AssetRef;
use crate::pipeline::profile::{EncodeProfile, Quality};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, owner: i64) -> Result<SettingsResponse, SettingsError> {
        let settings = self.store.load(owner).await?;
        Ok(SettingsResponse::from(&settings))
    }

    /// Everything a new job needs from the owner's settings, read once.
    pub async fn snapshot(&self, owner: i64) -> Result<(EncodeProfile, Option<AssetRef>), SettingsError> {
        let settings = self.store.load(owner).await?;
        Ok((settings.profile(), settings.thumbnail_ref()))
    }

    pub async fn set_quality(&self, owner: i64, quality: Quality) -> Result<(), SettingsError> {
        let mut settings = self.store.load(owner).await?;
        settings.quality = quality;
        self.store.save(owner, &settings).await?;
        info!(owner, %quality, "Quality updated");
        Ok(())
    }

    /// `None` clears the override.
    pub async fn set_custom_name(&self, owner: i64, name: Option<String>) -> Result<(), SettingsError> {
        let name = match name.map(|n| n.trim().to_string()) {
            Some(name) => {
                let req = CustomNameRequest { name };
                req.validate()?;
                if req.name.contains('\\') {
                    return Err(SettingsError::Invalid(
                        "Name cannot contain path separators".to_string(),
                    ));
                }
                Some(req.name)
            }
            None => None,
        };

        let mut settings = self.store.load(owner).await?;
        settings.custom_name = name;
        self.store.save(owner, &settings).await?;
        info!(owner, custom_name = ?settings.custom_name, "Custom name updated");
        Ok(())
    }

    pub async fn set_thumbnail(&self, owner: i64, file_id: Option<String>) -> Result<(), SettingsError> {
        let mut settings = self.store.load(owner).await?;
        settings.thumbnail = file_id;
        self.store.save(owner, &settings).await?;
        info!(owner, set = settings.thumbnail.is_some(), "Thumbnail updated");
        Ok(())
    }
}
