//! Encoder process supervision.

use crate::pipeline::profile::EncodeProfile;
use crate::pipeline::progress::{ProgressEvent, ProgressParser};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const VIDEO_CODEC: &str = "libx264";
pub const PRESET: &str = "medium";
pub const CRF: u8 = 23;
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "128k";

const STDERR_TAIL_LINES: usize = 20;

/// Fits the picture inside the profile's box without ever upscaling,
/// keeping both dimensions even.
pub fn scale_filter(profile: &EncodeProfile) -> String {
    format!(
        "scale=w='min({w},iw)':h='min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
        w = profile.width,
        h = profile.height
    )
}

/// Argument vector for one encode, without the program name.
pub fn encode_args(input: &Path, output: &Path, profile: &EncodeProfile) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c:v".into(),
        VIDEO_CODEC.into(),
        "-preset".into(),
        PRESET.into(),
        "-crf".into(),
        CRF.to_string(),
        "-vf".into(),
        scale_filter(profile),
        "-c:a".into(),
        AUDIO_CODEC.into(),
        "-b:a".into(),
        AUDIO_BITRATE.into(),
        "-movflags".into(),
        "+faststart".into(),
        "-progress".into(),
        "pipe:1".into(),
        output.to_string_lossy().into_owned(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitInfo {
    Code(i32),
    /// Terminated by a signal the supervisor did not send.
    Signalled,
    LaunchFailed(String),
    Cancelled,
    WaitFailed(String),
}

#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub success: bool,
    pub exit: ExitInfo,
    pub stderr_tail: Vec<String>,
}

impl EncodeOutcome {
    fn from_exit(exit: ExitInfo, stderr_tail: Vec<String>) -> Self {
        Self {
            success: exit == ExitInfo::Code(0),
            exit,
            stderr_tail,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.exit == ExitInfo::Cancelled
    }

    /// Short human-readable explanation of a failed encode.
    pub fn describe(&self) -> String {
        let head = match &self.exit {
            ExitInfo::Code(0) => "encoder finished".to_string(),
            ExitInfo::Code(code) => format!("encoder exited with status {}", code),
            ExitInfo::Signalled => "encoder was killed by a signal".to_string(),
            ExitInfo::LaunchFailed(e) => format!("encoder could not be started: {}", e),
            ExitInfo::Cancelled => "encode cancelled".to_string(),
            ExitInfo::WaitFailed(e) => format!("lost track of the encoder: {}", e),
        };
        match self.stderr_tail.last() {
            Some(line) => format!("{}: {}", head, line),
            None => head,
        }
    }
}

/// Launches the encoder and owns the child until it exits.
#[derive(Debug, Clone)]
pub struct Supervisor {
    program: String,
    global_args: Vec<String>,
    progress_interval: Duration,
}

impl Supervisor {
    pub fn new(program: impl Into<String>, progress_interval: Duration) -> Self {
        Self {
            program: program.into(),
            global_args: Vec::new(),
            progress_interval,
        }
    }

    /// Arguments placed ahead of the derived argument vector.
    pub fn with_global_args(mut self, args: Vec<String>) -> Self {
        self.global_args = args;
        self
    }

    /// Runs one encode to completion. `total_secs <= 0` means the input
    /// duration is unknown. Never panics or errors: every failure is an
    /// unsuccessful [`EncodeOutcome`].
    pub async fn run<F>(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
        total_secs: f64,
        cancel: &CancellationToken,
        mut sink: F,
    ) -> EncodeOutcome
    where
        F: FnMut(ProgressEvent) + Send,
    {
        if cancel.is_cancelled() {
            return EncodeOutcome::from_exit(ExitInfo::Cancelled, Vec::new());
        }

        let mut args = self.global_args.clone();
        args.extend(encode_args(input, output, profile));
        debug!(program = %self.program, ?args, "Launching encoder");

        let mut child = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, "Failed to launch encoder: {}", e);
                return EncodeOutcome::from_exit(ExitInfo::LaunchFailed(e.to_string()), Vec::new());
            }
        };

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr, STDERR_TAIL_LINES)));

        let mut parser = ProgressParser::new(total_secs, self.progress_interval);
        let mut cancelled = false;

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    read = reader.read_until(b'\n', &mut buf) => match read {
                        Ok(0) => break,
                        Ok(_) => {
                            if let Some(event) = parser.feed(&String::from_utf8_lossy(&buf)) {
                                sink(event);
                            }
                        }
                        Err(e) => {
                            debug!("Progress stream closed early: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        let status = if cancelled {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                status = child.wait() => Some(status),
            }
        };

        let exit = match status {
            None => {
                info!(pid = ?child.id(), "Terminating encoder on cancellation");
                if let Err(e) = child.start_kill() {
                    warn!("Failed to signal encoder: {}", e);
                }
                let _ = child.wait().await;
                ExitInfo::Cancelled
            }
            Some(Ok(status)) => match status.code() {
                Some(code) => ExitInfo::Code(code),
                None => ExitInfo::Signalled,
            },
            Some(Err(e)) => ExitInfo::WaitFailed(e.to_string()),
        };

        let stderr_tail = match stderr_task {
            Some(task) => match tokio::time::timeout(Duration::from_secs(2), task).await {
                Ok(Ok(tail)) => tail,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        let outcome = EncodeOutcome::from_exit(exit, stderr_tail);
        debug!(exit = ?outcome.exit, "Encoder finished");
        outcome
    }
}

async fn collect_tail<R>(stream: R, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut tail = VecDeque::with_capacity(keep);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if tail.len() == keep {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    }
    tail.into()
}
