//! Hand-off from transport threads into the pipeline's scheduling context.
//!
//! Submissions never block and never need the pipeline runtime: they go into
//! a bounded buffer that the transcoder worker drains once it is running.
//! Anything submitted before the worker starts simply waits in the buffer.

use crate::pipeline::job::{IngestRequest, JobId};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

#[derive(Debug)]
pub enum PipelineCommand {
    Submit(IngestRequest),
    Cancel { job_id: JobId, requested_by: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("user {0} is not allowed to use this service")]
    Unauthorized(i64),

    #[error("pipeline queue is full, retry later")]
    Backpressure,

    #[error("pipeline is shut down")]
    Closed,
}

/// Predicate deciding which principals may use the pipeline.
#[derive(Clone)]
pub struct AccessPolicy {
    permits: Arc<dyn Fn(i64) -> bool + Send + Sync>,
}

impl AccessPolicy {
    pub fn new(predicate: impl Fn(i64) -> bool + Send + Sync + 'static) -> Self {
        Self {
            permits: Arc::new(predicate),
        }
    }

    pub fn allow_list(users: impl IntoIterator<Item = i64>) -> Self {
        let users: HashSet<i64> = users.into_iter().collect();
        Self::new(move |principal| users.contains(&principal))
    }

    pub fn permits(&self, principal: i64) -> bool {
        (self.permits)(principal)
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy").finish_non_exhaustive()
    }
}

/// Returned to the transport as soon as a request is buffered.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Ack {
    pub job_id: JobId,
    /// `false` when the request is waiting for the worker to start.
    pub pipeline_ready: bool,
}

/// Producer side, cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct IngestBridge {
    tx: mpsc::Sender<PipelineCommand>,
    ready: Arc<AtomicBool>,
    policy: AccessPolicy,
}

/// Consumer side, owned by the transcoder worker.
#[derive(Debug)]
pub struct IngestQueue {
    rx: mpsc::Receiver<PipelineCommand>,
    ready: Arc<AtomicBool>,
}

impl IngestBridge {
    pub fn new(capacity: usize, policy: AccessPolicy) -> (Self, IngestQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let ready = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                ready: ready.clone(),
                policy,
            },
            IngestQueue { rx, ready },
        )
    }

    pub fn authorize(&self, principal: i64) -> Result<(), IngestError> {
        if self.policy.permits(principal) {
            Ok(())
        } else {
            Err(IngestError::Unauthorized(principal))
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn submit(&self, request: IngestRequest) -> Result<Ack, IngestError> {
        self.authorize(request.owner)?;
        let job_id = request.job_id();
        self.enqueue(PipelineCommand::Submit(request))?;
        debug!(job_id = %job_id, ready = self.is_ready(), "Job submitted");
        Ok(Ack {
            job_id,
            pipeline_ready: self.is_ready(),
        })
    }

    pub fn cancel(&self, job_id: JobId, requested_by: i64) -> Result<(), IngestError> {
        self.authorize(requested_by)?;
        self.enqueue(PipelineCommand::Cancel {
            job_id,
            requested_by,
        })
    }

    fn enqueue(&self, command: PipelineCommand) -> Result<(), IngestError> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => IngestError::Backpressure,
            TrySendError::Closed(_) => IngestError::Closed,
        })
    }
}

impl IngestQueue {
    /// Called by the worker once its runtime is up.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// `None` once every bridge handle is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<PipelineCommand> {
        self.rx.recv().await
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.ready.store(false, Ordering::Release);
    }
}
