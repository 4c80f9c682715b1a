//! Running totals of settled jobs, fed from the worker's report stream.

use crate::pipeline::job::{JobReport, JobStatus};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct JobCounts {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Clone, Default)]
pub struct JobTally {
    counters: Arc<Counters>,
}

impl JobTally {
    pub fn record(&self, report: &JobReport) {
        let counter = match report.status {
            JobStatus::Completed => &self.counters.completed,
            JobStatus::Failed => &self.counters.failed,
            JobStatus::Cancelled => &self.counters.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Records reports until the worker drops its sender.
    pub async fn observe(self, mut reports: mpsc::UnboundedReceiver<JobReport>) {
        while let Some(report) = reports.recv().await {
            debug!(
                job_id = %report.id,
                status = %report.status,
                history = ?report.history,
                "Job report"
            );
            self.record(&report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::{Job, JobError};
    use crate::pipeline::machine::tests::request;
    use crate::pipeline::profile::{EncodeProfile, Quality};

    fn settled(message_id: i64, error: Option<JobError>) -> JobReport {
        let mut job = Job::new(request(message_id), EncodeProfile::new(Quality::P720, None), None);
        match error {
            Some(error) => job.terminate(error).unwrap(),
            None => {
                for next in [
                    JobStatus::Downloading,
                    JobStatus::Probing,
                    JobStatus::Encoding,
                    JobStatus::Uploading,
                    JobStatus::Completed,
                ] {
                    job.advance(next).unwrap();
                }
            }
        }
        job.report()
    }

    #[tokio::test]
    async fn observer_counts_terminal_outcomes() {
        let tally = JobTally::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(settled(1, None)).unwrap();
        tx.send(settled(2, None)).unwrap();
        tx.send(settled(3, Some(JobError::encode("exit 1")))).unwrap();
        tx.send(settled(4, Some(JobError::cancelled()))).unwrap();
        drop(tx);

        tally.clone().observe(rx).await;
        assert_eq!(
            tally.counts(),
            JobCounts {
                completed: 2,
                failed: 1,
                cancelled: 1,
            }
        );
    }
}
