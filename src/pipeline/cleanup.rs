//! Per-job scratch storage and its reclamation.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Root directory under which every job gets its own namespace.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root and removes job directories left over by a previous run.
    pub async fn prepare(&self) -> io::Result<usize> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let is_job_dir = name
                .to_str()
                .is_some_and(|n| Uuid::parse_str(n).is_ok());
            if is_job_dir && entry.file_type().await?.is_dir() {
                remove_dir(&entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(root = %self.root.display(), removed, "Removed stale scratch directories");
        }
        Ok(removed)
    }

    pub async fn allocate(&self, key: Uuid) -> io::Result<JobScratch> {
        let dir = self.root.join(key.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(JobScratch {
            dir,
            tracked: Vec::new(),
            released: false,
        })
    }
}

/// Files a single job created. Removed by [`JobScratch::cleanup`], or on drop
/// if the job never got that far.
#[derive(Debug)]
pub struct JobScratch {
    dir: PathBuf,
    tracked: Vec<PathBuf>,
    released: bool,
}

impl JobScratch {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserves a path inside this job's directory. Only the final component
    /// of `name` is kept.
    pub fn track(&mut self, name: &str) -> PathBuf {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "file".into());
        let path = self.dir.join(file_name);
        if !self.tracked.contains(&path) {
            self.tracked.push(path.clone());
        }
        path
    }

    /// Safe to call repeatedly; files that are already gone are not an error.
    pub async fn cleanup(&mut self) -> io::Result<()> {
        for path in &self.tracked {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove scratch file: {}", e),
            }
        }
        remove_dir(&self.dir).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for JobScratch {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "Scratch reclaimed on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), "Failed to reclaim scratch on drop: {}", e),
        }
    }
}

async fn remove_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
