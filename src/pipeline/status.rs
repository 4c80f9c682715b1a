use crate::pipeline::job::{Job, JobId, JobStatus};
use crate::pipeline::ports::{StatusRef, StatusSink, StatusTarget};
use crate::pipeline::progress::{ProgressEvent, format_clock};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// Text shown to the requester while a job is in `status`.
pub fn stage_text(job: &Job, status: JobStatus) -> String {
    match status {
        JobStatus::Created => "Queued…".to_string(),
        JobStatus::Downloading => "Downloading…".to_string(),
        JobStatus::Probing => "Reading media info…".to_string(),
        JobStatus::Encoding => format!("Encoding to {}…", job.profile.quality),
        JobStatus::Uploading => format!("Uploading {}…", job.output_name),
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => terminal_text(job),
    }
}

pub fn terminal_text(job: &Job) -> String {
    match job.status() {
        JobStatus::Completed => {
            let secs = job.elapsed().whole_seconds().max(0) as u64;
            format!(
                "Done: {} ({})",
                job.output_name,
                format_clock(std::time::Duration::from_secs(secs))
            )
        }
        JobStatus::Failed => match job.error() {
            Some(error) => format!("Failed ({}): {}", error.kind, error.detail),
            None => "Failed.".to_string(),
        },
        JobStatus::Cancelled => "Cancelled.".to_string(),
        other => stage_text(job, other),
    }
}

/// Keeps one status message per job up to date.
///
/// Updates are handed to a publisher task and never awaited by the job; only
/// the latest pending text is kept. The terminal text preempts an update that
/// is still in flight. Failures to post or edit are logged and otherwise
/// ignored.
pub struct StatusReporter {
    updates: watch::Sender<Option<String>>,
    terminal: oneshot::Sender<String>,
    publisher: JoinHandle<()>,
}

impl StatusReporter {
    pub fn new(sink: Arc<dyn StatusSink>, job: &Job) -> Self {
        let (updates, pending) = watch::channel(None);
        let (terminal, last) = oneshot::channel();
        let publisher = StatusPublisher {
            sink,
            target: StatusTarget {
                chat_id: job.chat_id,
                reply_to: job.reply_to,
            },
            job_id: job.id.clone(),
            message: None,
            shown: None,
        };
        Self {
            updates,
            terminal,
            publisher: tokio::spawn(publisher.run(pending, last)),
        }
    }

    pub fn stage(&self, job: &Job) {
        self.updates
            .send_replace(Some(stage_text(job, job.status())));
    }

    pub fn progress(&self, job: &Job, event: &ProgressEvent) {
        let text = format!("{}\n{}", stage_text(job, job.status()), event.describe());
        self.updates.send_replace(Some(text));
    }

    /// Shows the terminal text and waits until it has been posted or edited.
    pub async fn finish(self, job: &Job) {
        let _ = self.terminal.send(terminal_text(job));
        if let Err(e) = self.publisher.await {
            warn!(job_id = %job.id, "Status publisher stopped abnormally: {}", e);
        }
    }
}

struct StatusPublisher {
    sink: Arc<dyn StatusSink>,
    target: StatusTarget,
    job_id: JobId,
    message: Option<StatusRef>,
    shown: Option<String>,
}

impl StatusPublisher {
    async fn run(
        mut self,
        mut pending: watch::Receiver<Option<String>>,
        mut last: oneshot::Receiver<String>,
    ) {
        loop {
            let text = tokio::select! {
                biased;
                text = &mut last => {
                    if let Ok(text) = text {
                        self.show(text, false).await;
                    }
                    return;
                }
                changed = pending.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    pending.borrow_and_update().clone()
                }
            };
            let Some(text) = text else {
                continue;
            };

            let preempted = tokio::select! {
                biased;
                text = &mut last => Some(text),
                _ = self.show(text, true) => None,
            };
            if let Some(text) = preempted {
                if let Ok(text) = text {
                    self.show(text, false).await;
                }
                return;
            }
        }
    }

    async fn show(&mut self, text: String, cancellable: bool) {
        if self.shown.as_deref() == Some(text.as_str()) {
            return;
        }
        let cancel = cancellable.then_some(&self.job_id);
        let result = match self.message {
            Some(message) => self.sink.edit(message, &text, cancel).await,
            None => self
                .sink
                .post(self.target, &text, cancel)
                .await
                .map(|message| self.message = Some(message)),
        };
        match result {
            Ok(()) => self.shown = Some(text),
            Err(e) => warn!(job_id = %self.job_id, "Status update failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::JobError;
    use crate::pipeline::machine::tests::{RecordingSink, request};
    use crate::pipeline::profile::{EncodeProfile, Quality};

    #[tokio::test]
    async fn repeated_text_is_shown_once_and_terminal_text_last() {
        let sink = Arc::new(RecordingSink::default());
        let mut job = Job::new(request(1), EncodeProfile::new(Quality::P720, None), None);
        let reporter = StatusReporter::new(sink.clone(), &job);

        job.advance(JobStatus::Downloading).unwrap();
        reporter.stage(&job);
        tokio::task::yield_now().await;
        reporter.stage(&job);
        tokio::task::yield_now().await;

        job.terminate(JobError::transfer("connection reset")).unwrap();
        reporter.finish(&job).await;

        let texts = sink.texts.lock().unwrap();
        assert!(texts.iter().filter(|t| *t == "Downloading…").count() <= 1);
        assert_eq!(
            texts.last().map(String::as_str),
            Some("Failed (transfer): connection reset")
        );
    }
}
