//! The pipeline's scheduling context: one OS thread, one current-thread
//! runtime, every job a task on it.

use crate::modules::settings::service::SettingsService;
use crate::pipeline::bridge::{IngestQueue, PipelineCommand};
use crate::pipeline::job::{IngestRequest, Job, JobId, JobReport};
use crate::pipeline::machine::JobRunner;
use crate::pipeline::profile::{EncodeProfile, Quality};
use std::collections::HashMap;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ActiveJob {
    owner: i64,
    cancel: CancellationToken,
    task: task::Id,
}

#[derive(Clone)]
pub struct TranscoderWorker {
    runner: JobRunner,
    settings: SettingsService,
    reports: Option<mpsc::UnboundedSender<JobReport>>,
}

impl TranscoderWorker {
    pub fn new(runner: JobRunner, settings: SettingsService) -> Self {
        Self {
            runner,
            settings,
            reports: None,
        }
    }

    /// Every finished job's report is also sent here.
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<JobReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Drains `queue` until every bridge handle is dropped, then waits for
    /// running jobs to settle.
    pub async fn run(self, mut queue: IngestQueue) {
        info!("🎥 Starting Transcoder Worker...");

        if let Err(e) = self.runner.scratch().prepare().await {
            error!(
                root = %self.runner.scratch().root().display(),
                "❌ Failed to prepare scratch storage: {}", e
            );
        }

        let mut registry: HashMap<JobId, ActiveJob> = HashMap::new();
        let mut tasks: JoinSet<JobReport> = JoinSet::new();

        queue.mark_ready();
        info!("🎥 Transcoder Worker ready");

        loop {
            tokio::select! {
                command = queue.recv() => match command {
                    Some(PipelineCommand::Submit(request)) => {
                        self.start_job(request, &mut registry, &mut tasks);
                    }
                    Some(PipelineCommand::Cancel { job_id, requested_by }) => {
                        cancel_job(&registry, &job_id, requested_by);
                    }
                    None => break,
                },
                Some(finished) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.finish(finished, &mut registry);
                }
            }
        }

        drop(queue);
        if !tasks.is_empty() {
            info!(running = tasks.len(), "Intake closed, waiting for running jobs");
        }
        while let Some(finished) = tasks.join_next_with_id().await {
            self.finish(finished, &mut registry);
        }
        info!("🎥 Transcoder Worker stopped");
    }

    fn start_job(
        &self,
        request: IngestRequest,
        registry: &mut HashMap<JobId, ActiveJob>,
        tasks: &mut JoinSet<JobReport>,
    ) {
        let job_id = request.job_id();
        if registry.contains_key(&job_id) {
            warn!(job_id = %job_id, "Duplicate submission ignored");
            return;
        }

        let owner = request.owner;
        let cancel = CancellationToken::new();
        let runner = self.runner.clone();
        let settings = self.settings.clone();
        let token = cancel.clone();
        let handle = tasks.spawn(async move {
            let job = create_job(&settings, request, &token).await;
            runner.run(job, token).await
        });

        registry.insert(
            job_id,
            ActiveJob {
                owner,
                cancel,
                task: handle.id(),
            },
        );
    }

    fn finish(
        &self,
        finished: Result<(task::Id, JobReport), JoinError>,
        registry: &mut HashMap<JobId, ActiveJob>,
    ) {
        match finished {
            Ok((_, report)) => {
                registry.remove(&report.id);
                info!(
                    job_id = %report.id,
                    status = %report.status,
                    output = %report.output_name,
                    "✅ Job settled"
                );
                if let Some(reports) = &self.reports {
                    let _ = reports.send(report);
                }
            }
            Err(e) => {
                let id = e.id();
                registry.retain(|job_id, active| {
                    let lost = active.task == id;
                    if lost {
                        error!(job_id = %job_id, "❌ Job task aborted: {}", e);
                    }
                    !lost
                });
            }
        }
    }
}

/// Reads the owner's settings once. A job cancelled while the store is slow
/// starts with defaults and settles as cancelled before any stage runs.
async fn create_job(
    settings: &SettingsService,
    request: IngestRequest,
    cancel: &CancellationToken,
) -> Job {
    let owner = request.owner;
    let snapshot = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        snapshot = settings.snapshot(owner) => Some(snapshot),
    };
    let (profile, thumbnail) = match snapshot {
        Some(Ok(snapshot)) => snapshot,
        Some(Err(e)) => {
            warn!(owner, "Settings unavailable, encoding with defaults: {}", e);
            (EncodeProfile::new(Quality::default(), None), None)
        }
        None => (EncodeProfile::new(Quality::default(), None), None),
    };

    let job = Job::new(request, profile, thumbnail);
    info!(
        job_id = %job.id,
        owner,
        quality = %job.profile.quality,
        output = %job.output_name,
        "📦 Job created"
    );
    job
}

fn cancel_job(registry: &HashMap<JobId, ActiveJob>, job_id: &JobId, requested_by: i64) {
    match registry.get(job_id) {
        Some(active) if active.owner == requested_by => {
            info!(job_id = %job_id, "Cancellation requested");
            active.cancel.cancel();
        }
        Some(_) => warn!(job_id = %job_id, requested_by, "Cancel from a non-owner ignored"),
        None => debug!(job_id = %job_id, "Cancel for unknown or finished job ignored"),
    }
}

/// Runs the worker on its own thread with a current-thread runtime.
pub fn start_transcoder_worker(
    worker: TranscoderWorker,
    queue: IngestQueue,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("transcoder".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("❌ Failed to build pipeline runtime: {}", e);
                    return;
                }
            };
            runtime.block_on(worker.run(queue));
        })
}
