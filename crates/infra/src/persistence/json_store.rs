//! JSON-file persistence store
//!
//! One document per job under `<root>/jobs/` and one per parked lineage
//! under `<root>/failed/`. Writes go to a temporary file in the same
//! directory and are renamed into place, so readers never observe a
//! partially written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scribeflow_core::PersistenceStore;
use scribeflow_domain::{FailedJobRecord, JobId, ManagedJob, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{InfraError, InfraResult};

const JOBS_DIR: &str = "jobs";
const FAILED_DIR: &str = "failed";

/// File-backed [`PersistenceStore`].
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (and create, if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns `InfraError::Io` when the directories cannot be created.
    pub async fn open<P: Into<PathBuf>>(root: P) -> InfraResult<Self> {
        let store = Self { root: root.into() };
        for dir in [store.jobs_dir(), store.failed_dir()] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| InfraError::io(&dir, e))?;
        }
        debug!(root = %store.root.display(), "Opened JSON store");
        Ok(store)
    }

    /// Directory holding the store files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root.join(JOBS_DIR)
    }

    fn failed_dir(&self) -> PathBuf {
        self.root.join(FAILED_DIR)
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir().join(file_name(id))
    }

    fn failed_path(&self, root: &JobId) -> PathBuf {
        self.failed_dir().join(file_name(root))
    }
}

/// `<id>.json` with path-unsafe characters replaced.
fn file_name(id: &JobId) -> String {
    let safe: String = id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.json")
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> InfraResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));

    tokio::fs::write(&tmp, &bytes).await.map_err(|e| InfraError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(InfraError::io(path, e));
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> InfraResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InfraError::io(path, e)),
    }
}

/// Every `*.json` document in `dir`. Unreadable or corrupt documents are
/// skipped with a warning.
async fn load_all<T: DeserializeOwned>(dir: &Path) -> InfraResult<Vec<T>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(InfraError::io(dir, e)),
    };

    let mut documents = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| InfraError::io(dir, e))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<T>(&bytes).map_err(InfraError::from),
            Err(e) => Err(InfraError::io(&path, e)),
        };
        match parsed {
            Ok(document) => documents.push(document),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document"),
        }
    }
    Ok(documents)
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn save_job(&self, job: &ManagedJob) -> Result<()> {
        Ok(write_atomic(&self.job_path(job.id()), job).await?)
    }

    async fn remove_job(&self, id: &JobId) -> Result<()> {
        Ok(remove_if_present(&self.job_path(id)).await?)
    }

    async fn load_jobs(&self) -> Result<Vec<ManagedJob>> {
        let mut jobs: Vec<ManagedJob> = load_all(&self.jobs_dir()).await?;
        jobs.sort_by_key(ManagedJob::queued_at);
        Ok(jobs)
    }

    async fn save_failed(&self, record: &FailedJobRecord) -> Result<()> {
        Ok(write_atomic(&self.failed_path(record.lineage_root()), record).await?)
    }

    async fn remove_failed(&self, root: &JobId) -> Result<()> {
        Ok(remove_if_present(&self.failed_path(root)).await?)
    }

    async fn load_failed(&self) -> Result<Vec<FailedJobRecord>> {
        let mut records: Vec<FailedJobRecord> = load_all(&self.failed_dir()).await?;
        records.sort_by_key(|r| r.failed_at);
        Ok(records)
    }
}
