use crate::pipeline::profile::{EncodeProfile, derive_output_name};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Upper bound on the user-visible failure detail.
pub const MAX_DETAIL_CHARS: usize = 512;

/// Identifier of the request that created a job: `<chat>-<message>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn from_message(chat_id: i64, message_id: i64) -> Self {
        Self(format!("{}-{}", chat_id, message_id))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (chat, message) = raw.trim().rsplit_once('-')?;
        let chat = chat.parse::<i64>().ok()?;
        let message = message.parse::<i64>().ok()?;
        Some(Self::from_message(chat, message))
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a remote asset (a file id on the messaging service).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAsset {
    pub file_ref: AssetRef,
    pub file_name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Downloading,
    Probing,
    Encoding,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed) | (_, Cancelled) => true,
            (Created, Downloading)
            | (Downloading, Probing)
            | (Probing, Encoding)
            | (Encoding, Uploading)
            | (Uploading, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transfer,
    Encode,
    Probe,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transfer => "transfer",
            ErrorKind::Encode => "encode",
            ErrorKind::Probe => "probe",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: bounded(detail.into()),
        }
    }

    pub fn transfer(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transfer, detail)
    }

    pub fn encode(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encode, detail)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled by request")
    }
}

fn bounded(detail: String) -> String {
    if detail.chars().count() <= MAX_DETAIL_CHARS {
        return detail;
    }
    let mut cut: String = detail.chars().take(MAX_DETAIL_CHARS - 1).collect();
    cut.push('…');
    cut
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Everything the pipeline needs to create a job, as handed over by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub owner: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub source: SourceAsset,
}

impl IngestRequest {
    pub fn job_id(&self) -> JobId {
        JobId::from_message(self.chat_id, self.message_id)
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub scratch_key: Uuid,
    pub owner: i64,
    pub chat_id: i64,
    pub reply_to: i64,
    pub source: SourceAsset,
    pub profile: EncodeProfile,
    pub thumbnail: Option<AssetRef>,
    pub output_name: String,
    pub input_ref: Option<PathBuf>,
    pub output_ref: Option<PathBuf>,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    status: JobStatus,
    progress: Option<f64>,
    error: Option<JobError>,
    history: Vec<JobStatus>,
}

impl Job {
    pub fn new(request: IngestRequest, profile: EncodeProfile, thumbnail: Option<AssetRef>) -> Self {
        let output_name = derive_output_name(&request.source.file_name, &profile);
        Self {
            id: request.job_id(),
            scratch_key: Uuid::new_v4(),
            owner: request.owner,
            chat_id: request.chat_id,
            reply_to: request.message_id,
            source: request.source,
            profile,
            thumbnail,
            output_name,
            input_ref: None,
            output_ref: None,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            status: JobStatus::Created,
            progress: None,
            error: None,
            history: vec![JobStatus::Created],
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn advance(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if next == JobStatus::Failed {
            // failures must carry a JobError
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.enter(next)
    }

    /// Terminal transition for a stage failure or a cancellation.
    pub fn terminate(&mut self, error: JobError) -> Result<(), TransitionError> {
        let next = match error.kind {
            ErrorKind::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };
        self.enter(next)?;
        if next == JobStatus::Failed {
            self.error = Some(error);
        }
        Ok(())
    }

    /// Progress only moves forward, and only while encoding.
    pub fn record_progress(&mut self, fraction: f64) {
        if self.status != JobStatus::Encoding || !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        self.progress = Some(self.progress.map_or(fraction, |p| p.max(fraction)));
    }

    fn enter(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.history.push(next);
        if next.is_terminal() {
            self.ended_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    pub fn elapsed(&self) -> time::Duration {
        self.ended_at.unwrap_or_else(OffsetDateTime::now_utc) - self.started_at
    }

    pub fn report(&self) -> JobReport {
        JobReport {
            id: self.id.clone(),
            owner: self.owner,
            status: self.status,
            error: self.error.clone(),
            output_name: self.output_name.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            history: self.history.clone(),
        }
    }
}

/// Terminal summary of a job, emitted once the job is discarded.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub owner: i64,
    pub status: JobStatus,
    pub error: Option<JobError>,
    pub output_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub history: Vec<JobStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::profile::Quality;

    fn job() -> Job {
        let request = IngestRequest {
            owner: 7,
            chat_id: 7,
            message_id: 42,
            source: SourceAsset {
                file_ref: AssetRef("file-1".into()),
                file_name: "clip.mov".into(),
                size: Some(1024),
            },
        };
        Job::new(request, EncodeProfile::new(Quality::P720, None), None)
    }

    #[test]
    fn new_job_derives_id_and_name() {
        let job = job();
        assert_eq!(job.id.as_str(), "7-42");
        assert_eq!(job.output_name, "clip_720p.mp4");
        assert_eq!(job.status(), JobStatus::Created);
    }

    #[test]
    fn job_id_round_trips_through_text() {
        let id = JobId::from_message(-100123, 9);
        assert_eq!(JobId::parse(id.as_str()), Some(id));
        assert_eq!(JobId::parse("nope"), None);
    }

    #[test]
    fn happy_path_walks_the_linear_order() {
        let mut job = job();
        for next in [
            JobStatus::Downloading,
            JobStatus::Probing,
            JobStatus::Encoding,
            JobStatus::Uploading,
            JobStatus::Completed,
        ] {
            job.advance(next).unwrap();
        }
        assert_eq!(
            job.report().history,
            vec![
                JobStatus::Created,
                JobStatus::Downloading,
                JobStatus::Probing,
                JobStatus::Encoding,
                JobStatus::Uploading,
                JobStatus::Completed,
            ]
        );
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn skipping_or_reversing_is_rejected() {
        let mut job = job();
        assert!(job.advance(JobStatus::Encoding).is_err());
        job.advance(JobStatus::Downloading).unwrap();
        assert!(job.advance(JobStatus::Created).is_err());
        assert!(job.advance(JobStatus::Uploading).is_err());
    }

    #[test]
    fn failure_requires_an_error_and_is_final() {
        let mut job = job();
        job.advance(JobStatus::Downloading).unwrap();
        assert!(job.advance(JobStatus::Failed).is_err());
        job.terminate(JobError::transfer("connection reset")).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().unwrap().kind, ErrorKind::Transfer);
        assert!(job.advance(JobStatus::Probing).is_err());
        assert!(job.terminate(JobError::cancelled()).is_err());
    }

    #[test]
    fn cancellation_leaves_no_error() {
        let mut job = job();
        job.terminate(JobError::cancelled()).unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.error().is_none());
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let mut job = job();
        job.record_progress(0.5);
        assert_eq!(job.progress(), None);

        job.advance(JobStatus::Downloading).unwrap();
        job.advance(JobStatus::Probing).unwrap();
        job.advance(JobStatus::Encoding).unwrap();
        job.record_progress(0.4);
        job.record_progress(0.2);
        assert_eq!(job.progress(), Some(0.4));
        job.record_progress(3.0);
        assert_eq!(job.progress(), Some(1.0));
        job.record_progress(f64::NAN);
        assert_eq!(job.progress(), Some(1.0));
    }

    #[test]
    fn long_details_are_truncated() {
        let err = JobError::encode("x".repeat(2000));
        assert_eq!(err.detail.chars().count(), MAX_DETAIL_CHARS);
        assert!(err.detail.ends_with('…'));
    }
}
