//! Collaborators the pipeline drives but does not own.

use crate::pipeline::job::{AssetRef, JobId};
use crate::pipeline::probe::MediaInfo;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} rejected: {description}")]
    Api { method: String, description: String },

    #[error("{0} still rate limited after retries")]
    RateLimited(String),

    #[error("local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An encoded file on its way back to the requester.
#[derive(Debug)]
pub struct Delivery<'a> {
    pub chat_id: i64,
    pub reply_to: i64,
    pub video: &'a Path,
    pub file_name: &'a str,
    pub caption: String,
    pub thumbnail: Option<&'a Path>,
    pub media: MediaInfo,
}

#[async_trait]
pub trait AssetTransfer: Send + Sync {
    /// Materializes a remote asset at `dest`, returning the byte count.
    async fn fetch(&self, asset: &AssetRef, dest: &Path) -> Result<u64, TransferError>;

    async fn deliver(&self, delivery: Delivery<'_>) -> Result<(), TransferError>;
}

/// Where status messages for a job are posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTarget {
    pub chat_id: i64,
    pub reply_to: i64,
}

/// Handle to a posted status message, used to edit it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    /// `cancel` attaches a cancel control for that job.
    async fn post(
        &self,
        target: StatusTarget,
        text: &str,
        cancel: Option<&JobId>,
    ) -> Result<StatusRef, TransferError>;

    async fn edit(
        &self,
        status: StatusRef,
        text: &str,
        cancel: Option<&JobId>,
    ) -> Result<(), TransferError>;
}
