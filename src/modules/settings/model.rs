use crate::pipeline::job::AssetRef;
use crate::pipeline::profile::{EncodeProfile, Quality};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FIELD_QUALITY: &str = "quality";
pub const FIELD_CUSTOM_NAME: &str = "custom_name";
pub const FIELD_THUMBNAIL: &str = "thumbnail";

/// Per-owner preferences, as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub quality: Quality,
    pub custom_name: Option<String>,
    /// File id of the owner's branding thumbnail.
    pub thumbnail: Option<String>,
}

impl UserSettings {
    /// Unknown or missing fields fall back to defaults.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let non_empty = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            quality: fields
                .get(FIELD_QUALITY)
                .and_then(|q| q.parse().ok())
                .unwrap_or_default(),
            custom_name: non_empty(FIELD_CUSTOM_NAME),
            thumbnail: non_empty(FIELD_THUMBNAIL),
        }
    }

    pub fn profile(&self) -> EncodeProfile {
        EncodeProfile::new(self.quality, self.custom_name.clone())
    }

    pub fn thumbnail_ref(&self) -> Option<AssetRef> {
        self.thumbnail.clone().map(AssetRef)
    }
}
