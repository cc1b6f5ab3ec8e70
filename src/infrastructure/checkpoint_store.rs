//! Durable per-company progress
//!
//! The checkpoint is the trust boundary between runs: whatever it says is
//! `done` is never fetched again on resume. Every transition is written with
//! the same stage + fsync + rename discipline as the review artifacts and is
//! durable before the call returns. A transition whose write fails leaves
//! the in-memory state untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::atomic_file;
use crate::domain::{CompanyId, CompanyTarget, JobStatus};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint write task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub reviews: usize,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointEntry {
    fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            reason: None,
            attempts: 0,
            reviews: 0,
            updated_at: Utc::now(),
        }
    }
}

/// On-disk checkpoint document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub companies: BTreeMap<CompanyId, CheckpointEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: Checkpoint,
    run_id: Uuid,
}

impl CheckpointStore {
    /// Reads the prior run's checkpoint. A missing file is an empty
    /// checkpoint; an unreadable or corrupt one is an error.
    pub async fn load(path: &Path) -> Result<Checkpoint, CheckpointError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Checkpoint::default()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Opens the store at `path`, loading any prior state
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let state = Self::load(&path).await?;
        let run_id = Uuid::new_v4();
        info!(
            path = %path.display(),
            companies = state.companies.len(),
            previous_run = ?state.run_id,
            %run_id,
            "📋 checkpoint opened"
        );
        Ok(Self { path, state, run_id })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub const fn checkpoint(&self) -> &Checkpoint {
        &self.state
    }

    #[must_use]
    pub fn entry(&self, company: &CompanyId) -> Option<&CheckpointEntry> {
        self.state.companies.get(company)
    }

    #[must_use]
    pub fn status(&self, company: &CompanyId) -> Option<JobStatus> {
        self.entry(company).map(|e| e.status)
    }

    /// Ensures every input company has an entry, adding new ones as
    /// `pending`. Entries from earlier inputs are kept.
    pub async fn reconcile(&mut self, targets: &[CompanyTarget]) -> Result<usize, CheckpointError> {
        let mut next = self.state.clone();
        let mut added = 0;
        for target in targets {
            next.companies.entry(target.id.clone()).or_insert_with(|| {
                added += 1;
                CheckpointEntry::pending()
            });
        }
        if added > 0 || !self.path.exists() {
            self.commit(next).await?;
        }
        Ok(added)
    }

    /// Discards prior progress: every input company becomes `pending`
    pub async fn reset(&mut self, targets: &[CompanyTarget]) -> Result<(), CheckpointError> {
        let companies = targets
            .iter()
            .map(|t| (t.id.clone(), CheckpointEntry::pending()))
            .collect();
        let next = Checkpoint {
            run_id: None,
            updated_at: None,
            companies,
        };
        self.commit(next).await?;
        info!(companies = targets.len(), "🔄 checkpoint reset");
        Ok(())
    }

    pub async fn mark_done(&mut self, company: &CompanyId, reviews: usize, attempts: u32) -> Result<(), CheckpointError> {
        self.transition(company, JobStatus::Done, None, reviews, attempts).await
    }

    pub async fn mark_failed(
        &mut self,
        company: &CompanyId,
        reason: impl Into<String>,
        reviews: usize,
        attempts: u32,
    ) -> Result<(), CheckpointError> {
        self.transition(company, JobStatus::Failed, Some(reason.into()), reviews, attempts)
            .await
    }

    /// Puts a company back in the queue, keeping its attempt count
    pub async fn mark_pending(&mut self, company: &CompanyId) -> Result<(), CheckpointError> {
        let attempts = self.entry(company).map_or(0, |e| e.attempts);
        self.transition(company, JobStatus::Pending, None, 0, attempts).await
    }

    /// Counts by status, derived from checkpoint state alone
    #[must_use]
    pub fn summary(&self) -> CheckpointSummary {
        self.state.companies.values().fold(
            CheckpointSummary::default(),
            |mut acc, entry| {
                acc.total += 1;
                match entry.status {
                    JobStatus::Done => acc.done += 1,
                    JobStatus::Failed => acc.failed += 1,
                    JobStatus::Pending | JobStatus::InProgress => acc.pending += 1,
                }
                acc
            },
        )
    }

    async fn transition(
        &mut self,
        company: &CompanyId,
        status: JobStatus,
        reason: Option<String>,
        reviews: usize,
        attempts: u32,
    ) -> Result<(), CheckpointError> {
        let mut next = self.state.clone();
        next.companies.insert(
            company.clone(),
            CheckpointEntry {
                status: status.persisted(),
                reason,
                attempts,
                reviews,
                updated_at: Utc::now(),
            },
        );
        self.commit(next).await?;
        debug!(company = %company, %status, "checkpoint transition persisted");
        Ok(())
    }

    async fn commit(&mut self, mut next: Checkpoint) -> Result<(), CheckpointError> {
        next.run_id = Some(self.run_id);
        next.updated_at = Some(Utc::now());

        let bytes = serde_json::to_vec_pretty(&next).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            atomic_file::write_atomically(&path, &bytes).map_err(|source| CheckpointError::Io { path, source })
        })
        .await
        .map_err(|e| CheckpointError::Aborted(e.to_string()))??;

        self.state = next;
        Ok(())
    }
}
