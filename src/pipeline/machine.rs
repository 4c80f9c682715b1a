//! The per-job state machine.

use crate::pipeline::cleanup::{JobScratch, ScratchSpace};
use crate::pipeline::encoder::Supervisor;
use crate::pipeline::job::{ErrorKind, Job, JobError, JobReport, JobStatus};
use crate::pipeline::ports::{AssetTransfer, Delivery, StatusSink};
use crate::pipeline::probe::{MediaInfo, Prober};
use crate::pipeline::status::StatusReporter;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const THUMBNAIL_FILE: &str = "thumb.jpg";

/// Drives jobs from `Created` to a terminal state.
#[derive(Clone)]
pub struct JobRunner {
    transfer: Arc<dyn AssetTransfer>,
    status: Arc<dyn StatusSink>,
    prober: Prober,
    supervisor: Supervisor,
    scratch: ScratchSpace,
}

impl JobRunner {
    pub fn new(
        transfer: Arc<dyn AssetTransfer>,
        status: Arc<dyn StatusSink>,
        prober: Prober,
        supervisor: Supervisor,
        scratch: ScratchSpace,
    ) -> Self {
        Self {
            transfer,
            status,
            prober,
            supervisor,
            scratch,
        }
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    /// Runs `job` to completion. Scratch files are gone by the time this returns,
    /// whatever the outcome.
    pub async fn run(&self, mut job: Job, cancel: CancellationToken) -> JobReport {
        let reporter = StatusReporter::new(self.status.clone(), &job);

        let result = match self.scratch.allocate(job.scratch_key).await {
            Ok(mut scratch) => {
                debug!(job_id = %job.id, dir = %scratch.dir().display(), "Scratch allocated");
                let result = AssertUnwindSafe(self.drive(&mut job, &mut scratch, &reporter, &cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        error!(job_id = %job.id, status = %job.status(), "Job stage panicked");
                        Err(JobError::new(
                            panic_kind(job.status()),
                            format!("internal error while {}", job.status().to_string().to_lowercase()),
                        ))
                    });

                debug!(
                    job_id = %job.id,
                    input = ?job.input_ref,
                    output = ?job.output_ref,
                    "Reclaiming scratch"
                );
                if let Err(e) = scratch.cleanup().await {
                    warn!(job_id = %job.id, "Scratch cleanup incomplete: {}", e);
                }
                result
            }
            Err(e) => Err(JobError::transfer(format!("scratch storage unavailable: {}", e))),
        };

        let settled = match result {
            Ok(()) => job.advance(JobStatus::Completed),
            Err(error) => job.terminate(error),
        };
        if let Err(e) = settled {
            error!(job_id = %job.id, "{}", e);
        }

        reporter.finish(&job).await;

        match job.error() {
            Some(error) => warn!(
                job_id = %job.id,
                owner = job.owner,
                kind = %error.kind,
                detail = %error.detail,
                progress = ?job.progress(),
                "Job failed"
            ),
            None => info!(
                job_id = %job.id,
                owner = job.owner,
                status = %job.status(),
                elapsed_secs = job.elapsed().whole_seconds(),
                "Job finished"
            ),
        }
        job.report()
    }

    async fn drive(
        &self,
        job: &mut Job,
        scratch: &mut JobScratch,
        reporter: &StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        self.enter(job, JobStatus::Downloading, reporter, cancel)?;
        let input = scratch.track(&input_file_name(&job.source.file_name));
        job.input_ref = Some(input.clone());
        let bytes = until_cancelled(cancel, self.transfer.fetch(&job.source.file_ref, &input))
            .await?
            .map_err(|e| JobError::transfer(format!("download failed: {}", e)))?;
        info!(job_id = %job.id, bytes, "Source downloaded");

        self.enter(job, JobStatus::Probing, reporter, cancel)?;
        let media = until_cancelled(cancel, self.prober.probe(&input)).await?;

        self.enter(job, JobStatus::Encoding, reporter, cancel)?;
        let output = scratch.track(&job.output_name);
        self.encode(job, &input, &output, media, reporter, cancel).await?;
        job.output_ref = Some(output.clone());

        self.enter(job, JobStatus::Uploading, reporter, cancel)?;
        let thumbnail = self.fetch_thumbnail(job, scratch, cancel).await?;
        let encoded = until_cancelled(cancel, self.prober.probe(&output)).await?;
        let delivery = Delivery {
            chat_id: job.chat_id,
            reply_to: job.reply_to,
            video: &output,
            file_name: &job.output_name,
            caption: format!("Encoded to {}\n\n{}", job.profile.quality, job.output_name),
            thumbnail: thumbnail.as_deref(),
            media: encoded,
        };
        until_cancelled(cancel, self.transfer.deliver(delivery))
            .await?
            .map_err(|e| JobError::transfer(format!("upload failed: {}", e)))?;
        Ok(())
    }

    fn enter(
        &self,
        job: &mut Job,
        next: JobStatus,
        reporter: &StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::cancelled());
        }
        job.advance(next)
            .map_err(|e| JobError::new(panic_kind(job.status()), e.to_string()))?;
        info!(job_id = %job.id, status = %next, "Job transition");
        reporter.stage(job);
        Ok(())
    }

    async fn encode(
        &self,
        job: &mut Job,
        input: &Path,
        output: &Path,
        media: MediaInfo,
        reporter: &StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let profile = job.profile.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let encode = self.supervisor.run(
            input,
            output,
            &profile,
            media.duration_seconds,
            cancel,
            move |event| {
                let _ = tx.send(event);
            },
        );
        tokio::pin!(encode);

        let outcome = loop {
            tokio::select! {
                outcome = &mut encode => break outcome,
                Some(event) = rx.recv() => {
                    if let Some(fraction) = event.fraction {
                        job.record_progress(fraction);
                    }
                    reporter.progress(job, &event);
                }
            }
        };

        if outcome.is_cancelled() {
            return Err(JobError::cancelled());
        }
        if !outcome.success {
            return Err(JobError::encode(outcome.describe()));
        }
        Ok(())
    }

    /// A missing thumbnail never fails the upload.
    async fn fetch_thumbnail(
        &self,
        job: &Job,
        scratch: &mut JobScratch,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, JobError> {
        let Some(thumbnail) = job.thumbnail.as_ref() else {
            return Ok(None);
        };
        let path = scratch.track(THUMBNAIL_FILE);
        match until_cancelled(cancel, self.transfer.fetch(thumbnail, &path)).await? {
            Ok(_) => Ok(Some(path)),
            Err(e) => {
                warn!(job_id = %job.id, "Thumbnail unavailable, uploading without it: {}", e);
                Ok(None)
            }
        }
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, JobError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::cancelled()),
        out = fut => Ok(out),
    }
}

fn panic_kind(status: JobStatus) -> ErrorKind {
    match status {
        JobStatus::Encoding => ErrorKind::Encode,
        _ => ErrorKind::Transfer,
    }
}

/// Scratch name for the downloaded source, keeping its extension.
fn input_file_name(original: &str) -> String {
    match Path::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("input.{}", ext.to_ascii_lowercase())
        }
        _ => "input".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::job::{AssetRef, IngestRequest, JobId, SourceAsset};
    use crate::pipeline::ports::{StatusRef, StatusTarget, TransferError};
    use crate::pipeline::profile::{EncodeProfile, Quality};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Serves every fetch from bytes in memory and records deliveries.
    #[derive(Default)]
    pub(crate) struct FakeTransfer {
        pub fail_fetch: bool,
        pub fail_deliver: bool,
        pub delivered: Mutex<Vec<(String, bool, Vec<u8>)>>,
    }

    #[async_trait]
    impl AssetTransfer for FakeTransfer {
        async fn fetch(&self, asset: &AssetRef, dest: &Path) -> Result<u64, TransferError> {
            if self.fail_fetch {
                return Err(TransferError::Api {
                    method: "getFile".to_string(),
                    description: format!("{} unreachable", asset.0),
                });
            }
            tokio::fs::write(dest, b"source-bytes").await?;
            Ok(12)
        }

        async fn deliver(&self, delivery: Delivery<'_>) -> Result<(), TransferError> {
            if self.fail_deliver {
                return Err(TransferError::Api {
                    method: "sendVideo".to_string(),
                    description: "upload rejected".to_string(),
                });
            }
            let body = tokio::fs::read(delivery.video).await?;
            self.delivered.lock().unwrap().push((
                delivery.file_name.to_string(),
                delivery.thumbnail.is_some_and(|t| t.exists()),
                body,
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn post(
            &self,
            target: StatusTarget,
            text: &str,
            _cancel: Option<&JobId>,
        ) -> Result<StatusRef, TransferError> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(StatusRef {
                chat_id: target.chat_id,
                message_id: 1,
            })
        }

        async fn edit(
            &self,
            _status: StatusRef,
            text: &str,
            _cancel: Option<&JobId>,
        ) -> Result<(), TransferError> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    pub(crate) fn request(message_id: i64) -> IngestRequest {
        IngestRequest {
            owner: 7,
            chat_id: 7,
            message_id,
            source: SourceAsset {
                file_ref: AssetRef(format!("file-{}", message_id)),
                file_name: "clip.mov".into(),
                size: None,
            },
        }
    }

    pub(crate) fn encoder_script(dir: &Path, body: &str) -> Supervisor {
        let path = dir.join(format!("encoder-{}.sh", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("for last; do :; done\n{}\n", body)).unwrap();
        Supervisor::new("/bin/sh", Duration::ZERO)
            .with_global_args(vec![path.to_string_lossy().into_owned()])
    }

    pub(crate) const GOOD_ENCODER: &str =
        "printf 'out_time_us=500000\\nprogress=continue\\n'\nprintf encoded > \"$last\"";

    fn runner(
        transfer: Arc<FakeTransfer>,
        sink: Arc<RecordingSink>,
        supervisor: Supervisor,
        root: &Path,
    ) -> JobRunner {
        JobRunner::new(
            transfer,
            sink,
            // a missing prober degrades to unknown duration
            Prober::new("/nonexistent/ffprobe"),
            supervisor,
            ScratchSpace::new(root.join("scratch")),
        )
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[tokio::test]
    async fn completes_and_reclaims_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::default());
        let sink = Arc::new(RecordingSink::default());
        let runner = runner(
            transfer.clone(),
            sink.clone(),
            encoder_script(dir.path(), GOOD_ENCODER),
            dir.path(),
        );

        let job = Job::new(
            request(1),
            EncodeProfile::new(Quality::P720, None),
            Some(AssetRef("thumb".into())),
        );
        let report = runner.run(job, CancellationToken::new()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(
            report.history,
            vec![
                JobStatus::Created,
                JobStatus::Downloading,
                JobStatus::Probing,
                JobStatus::Encoding,
                JobStatus::Uploading,
                JobStatus::Completed,
            ]
        );
        let delivered = transfer.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "clip_720p.mp4");
        assert!(delivered[0].1, "thumbnail should be attached");
        assert_eq!(delivered[0].2, b"encoded");
        assert!(is_empty_dir(&dir.path().join("scratch")));

        let texts = sink.texts.lock().unwrap();
        assert!(texts.last().unwrap().starts_with("Done: clip_720p.mp4"));
    }

    #[tokio::test]
    async fn encoder_failure_fails_with_encode_kind() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::default());
        let sink = Arc::new(RecordingSink::default());
        let runner = runner(
            transfer.clone(),
            sink.clone(),
            encoder_script(
                dir.path(),
                "printf partial > \"$last\"\necho 'Conversion failed!' >&2\nexit 1",
            ),
            dir.path(),
        );

        let job = Job::new(request(2), EncodeProfile::new(Quality::P480, None), None);
        let report = runner.run(job, CancellationToken::new()).await;

        assert_eq!(report.status, JobStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Encode);
        assert!(error.detail.contains("Conversion failed!"));
        assert!(transfer.delivered.lock().unwrap().is_empty());
        assert!(is_empty_dir(&dir.path().join("scratch")));
        assert!(
            sink.texts
                .lock()
                .unwrap()
                .last()
                .unwrap()
                .starts_with("Failed (encode)")
        );
    }

    #[tokio::test]
    async fn download_failure_fails_with_transfer_kind() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer {
            fail_fetch: true,
            ..Default::default()
        });
        let runner = runner(
            transfer,
            Arc::new(RecordingSink::default()),
            encoder_script(dir.path(), GOOD_ENCODER),
            dir.path(),
        );

        let job = Job::new(request(3), EncodeProfile::new(Quality::P720, None), None);
        let report = runner.run(job, CancellationToken::new()).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error.unwrap().kind, ErrorKind::Transfer);
        assert_eq!(
            report.history,
            vec![JobStatus::Created, JobStatus::Downloading, JobStatus::Failed]
        );
        assert!(is_empty_dir(&dir.path().join("scratch")));
    }

    #[tokio::test]
    async fn upload_failure_fails_with_transfer_kind() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer {
            fail_deliver: true,
            ..Default::default()
        });
        let runner = runner(
            transfer,
            Arc::new(RecordingSink::default()),
            encoder_script(dir.path(), GOOD_ENCODER),
            dir.path(),
        );

        let job = Job::new(request(4), EncodeProfile::new(Quality::P720, None), None);
        let report = runner.run(job, CancellationToken::new()).await;

        assert_eq!(report.status, JobStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Transfer);
        assert!(error.detail.contains("upload rejected"));
        assert!(is_empty_dir(&dir.path().join("scratch")));
    }

    #[tokio::test]
    async fn probe_failure_does_not_fail_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::default());
        // "false" exits non-zero for every probe
        let runner = JobRunner::new(
            transfer,
            Arc::new(RecordingSink::default()),
            Prober::new("false"),
            encoder_script(dir.path(), GOOD_ENCODER),
            ScratchSpace::new(dir.path().join("scratch")),
        );

        let job = Job::new(request(5), EncodeProfile::new(Quality::P360, None), None);
        let report = runner.run(job, CancellationToken::new()).await;
        assert_eq!(report.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancellation_during_encoding_kills_encoder_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("encoder.pid");
        let body = format!(
            "echo $$ > '{}'\nprintf partial > \"$last\"\nprintf 'out_time_us=1\\n'\nexec sleep 30",
            pid_file.display()
        );
        let transfer = Arc::new(FakeTransfer::default());
        let sink = Arc::new(RecordingSink::default());
        let runner = runner(
            transfer.clone(),
            sink.clone(),
            encoder_script(dir.path(), &body),
            dir.path(),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watched = sink.clone();
        tokio::spawn(async move {
            loop {
                let encoding = watched
                    .texts
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|t| t.starts_with("Encoding"));
                if encoding {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let job = Job::new(request(6), EncodeProfile::new(Quality::P720, None), None);
        let report = tokio::time::timeout(Duration::from_secs(10), runner.run(job, cancel))
            .await
            .expect("cancelled job should finish promptly");

        assert_eq!(report.status, JobStatus::Cancelled);
        assert!(report.history.contains(&JobStatus::Encoding));
        assert!(!report.history.contains(&JobStatus::Uploading));
        assert!(transfer.delivered.lock().unwrap().is_empty());
        assert!(is_empty_dir(&dir.path().join("scratch")));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .status()
            .unwrap()
            .success();
        assert!(!alive, "encoder process should be gone");
        assert_eq!(sink.texts.lock().unwrap().last().unwrap(), "Cancelled.");
    }

    /// Progress edits hang; everything else answers at once.
    #[derive(Default)]
    struct StallingSink {
        stalled: Notify,
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatusSink for StallingSink {
        async fn post(
            &self,
            target: StatusTarget,
            text: &str,
            _cancel: Option<&JobId>,
        ) -> Result<StatusRef, TransferError> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(StatusRef {
                chat_id: target.chat_id,
                message_id: 1,
            })
        }

        async fn edit(
            &self,
            _status: StatusRef,
            text: &str,
            _cancel: Option<&JobId>,
        ) -> Result<(), TransferError> {
            if text.contains('\n') {
                self.stalled.notify_one();
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn pending_status_edit_does_not_delay_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(StallingSink::default());
        let runner = JobRunner::new(
            Arc::new(FakeTransfer::default()),
            sink.clone(),
            Prober::new("/nonexistent/ffprobe"),
            encoder_script(
                dir.path(),
                "printf 'out_time_us=1\\nprogress=continue\\n'\nexec sleep 60",
            ),
            ScratchSpace::new(dir.path().join("scratch")),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watched = sink.clone();
        tokio::spawn(async move {
            watched.stalled.notified().await;
            trigger.cancel();
        });

        let job = Job::new(request(8), EncodeProfile::new(Quality::P720, None), None);
        let report = tokio::time::timeout(Duration::from_secs(5), runner.run(job, cancel))
            .await
            .expect("cancel should not wait for a pending status edit");

        assert_eq!(report.status, JobStatus::Cancelled);
        assert!(is_empty_dir(&dir.path().join("scratch")));
        assert_eq!(sink.texts.lock().unwrap().last().unwrap(), "Cancelled.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_while_probing_the_output_stops_the_upload() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let prober = dir.path().join("prober.sh");
        std::fs::write(
            &prober,
            "#!/bin/sh\nfor last; do :; done\ncase \"$last\" in\n  *_720p.mp4) exec sleep 60 ;;\nesac\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&prober, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transfer = Arc::new(FakeTransfer::default());
        let sink = Arc::new(RecordingSink::default());
        let runner = JobRunner::new(
            transfer.clone(),
            sink.clone(),
            Prober::new(prober.to_string_lossy()),
            encoder_script(dir.path(), GOOD_ENCODER),
            ScratchSpace::new(dir.path().join("scratch")),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watched = sink.clone();
        tokio::spawn(async move {
            loop {
                let uploading = watched
                    .texts
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|t| t.starts_with("Uploading"));
                if uploading {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            trigger.cancel();
        });

        let job = Job::new(request(9), EncodeProfile::new(Quality::P720, None), None);
        let report = tokio::time::timeout(Duration::from_secs(5), runner.run(job, cancel))
            .await
            .expect("cancel should interrupt the output probe");

        assert_eq!(report.status, JobStatus::Cancelled);
        assert!(report.history.contains(&JobStatus::Uploading));
        assert!(transfer.delivered.lock().unwrap().is_empty());
        assert!(is_empty_dir(&dir.path().join("scratch")));
    }

    #[tokio::test]
    async fn cancellation_before_start_runs_no_stage() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            Arc::new(FakeTransfer::default()),
            Arc::new(RecordingSink::default()),
            encoder_script(dir.path(), GOOD_ENCODER),
            dir.path(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let job = Job::new(request(7), EncodeProfile::new(Quality::P720, None), None);
        let report = runner.run(job, cancel).await;
        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(report.history, vec![JobStatus::Created, JobStatus::Cancelled]);
        assert!(is_empty_dir(&dir.path().join("scratch")));
    }

    #[test]
    fn input_names_keep_a_safe_extension() {
        assert_eq!(input_file_name("clip.MOV"), "input.mov");
        assert_eq!(input_file_name("noext"), "input");
        assert_eq!(input_file_name("weird.m p4"), "input");
    }
}
