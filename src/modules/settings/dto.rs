use crate::modules::settings::model::UserSettings;
use crate::pipeline::profile::Quality;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CustomNameRequest {
    #[validate(
        length(min = 1, max = 64, message = "Name must be 1-64 characters"),
        does_not_contain(pattern = "/", message = "Name cannot contain '/'")
    )]
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    pub quality: Quality,
    pub custom_name: Option<String>,
    pub has_thumbnail: bool,
}

impl From<&UserSettings> for SettingsResponse {
    fn from(s: &UserSettings) -> Self {
        Self {
            quality: s.quality,
            custom_name: s.custom_name.clone(),
            has_thumbnail: s.thumbnail.is_some(),
        }
    }
}

impl SettingsResponse {
    pub fn render(&self) -> String {
        format!(
            "Current settings\n\nQuality: {}\nCustom name: {}\nThumbnail: {}\nCodec: H264 (preset medium, CRF 23)",
            self.quality,
            self.custom_name.as_deref().unwrap_or("not set"),
            if self.has_thumbnail { "set" } else { "not set" },
        )
    }
}
