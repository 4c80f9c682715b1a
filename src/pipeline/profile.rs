use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use utoipa::ToSchema;

/// Container extension of every encoded output.
pub const OUTPUT_EXTENSION: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
pub enum Quality {
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::P720, Quality::P480, Quality::P360];

    pub fn label(&self) -> &'static str {
        match self {
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
        }
    }

    /// Bounding box the encoder scales into.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Quality::P720 => (1280, 720),
            Quality::P480 => (854, 480),
            Quality::P360 => (640, 360),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::ALL
            .into_iter()
            .find(|q| q.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown quality '{}', expected one of 720p, 480p, 360p", s))
    }
}

/// Encoding parameters frozen for the lifetime of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeProfile {
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
    pub name_override: Option<String>,
}

impl EncodeProfile {
    pub fn new(quality: Quality, name_override: Option<String>) -> Self {
        let (width, height) = quality.dimensions();
        Self {
            quality,
            width,
            height,
            name_override: name_override.filter(|n| !n.trim().is_empty()),
        }
    }
}

/// `<override or input stem>_<quality>.mp4`
pub fn derive_output_name(original_name: &str, profile: &EncodeProfile) -> String {
    let base = match profile.name_override.as_deref() {
        Some(name) => name.trim().to_string(),
        None => Path::new(original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "video".to_string()),
    };

    format!("{}_{}.{}", base, profile.quality.label(), OUTPUT_EXTENSION)
}
