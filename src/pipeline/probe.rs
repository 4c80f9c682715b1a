use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Facts about a media file. Every field is zero when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
}

impl MediaInfo {
    pub fn has_duration(&self) -> bool {
        self.duration_seconds > 0.0
    }
}

#[derive(Debug, Error)]
enum ProbeError {
    #[error("failed to launch prober: {0}")]
    Launch(#[from] std::io::Error),

    #[error("prober exited with {0}")]
    Exit(std::process::ExitStatus),

    #[error("unreadable prober output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize, Default)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeFormat {
    duration: Option<Value>,
    size: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Reads container metadata with an ffprobe-compatible tool.
#[derive(Debug, Clone)]
pub struct Prober {
    program: String,
}

impl Prober {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Never fails: any problem degrades to [`MediaInfo::default`].
    pub async fn probe(&self, path: &Path) -> MediaInfo {
        match self.try_probe(path).await {
            Ok(info) => {
                debug!(path = %path.display(), ?info, "Probed media");
                info
            }
            Err(e) => {
                warn!(path = %path.display(), "Probe failed, continuing without metadata: {}", e);
                MediaInfo::default()
            }
        }
    }

    async fn try_probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Exit(output.status));
        }

        Ok(parse_probe_output(&output.stdout)?)
    }
}

/// Extracts the consumed fields from the prober's JSON document.
pub fn parse_probe_output(raw: &[u8]) -> Result<MediaInfo, serde_json::Error> {
    let probe: ProbeOutput = serde_json::from_slice(raw)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration_seconds = probe
        .format
        .duration
        .as_ref()
        .and_then(number_of)
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let byte_size = probe
        .format
        .size
        .as_ref()
        .and_then(number_of)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s as u64)
        .unwrap_or(0);

    Ok(MediaInfo {
        duration_seconds,
        byte_size,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
    })
}

// ffprobe reports numbers as strings
fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
