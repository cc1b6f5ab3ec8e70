//! # Job lifecycle
//!
//! `Pending → InProgress → {Done | Failed}`. `InProgress` only exists in
//! memory; the checkpoint never stores it, so an interrupted company reads
//! back as `Pending`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::company::CompanyTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Status as it may be written to the checkpoint
    #[must_use]
    pub const fn persisted(self) -> Self {
        match self {
            Self::InProgress => Self::Pending,
            other => other,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Unit of work: one company's full review extraction
#[derive(Debug, Clone)]
pub struct Job {
    pub target: CompanyTarget,
    pub status: JobStatus,
    pub attempts: u32,
}

impl Job {
    #[must_use]
    pub const fn new(target: CompanyTarget) -> Self {
        Self {
            target,
            status: JobStatus::Pending,
            attempts: 0,
        }
    }

    /// Restore a job from a prior run's attempt count
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn start(&mut self) {
        self.status = JobStatus::InProgress;
        self.attempts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_is_never_persisted() {
        assert_eq!(JobStatus::InProgress.persisted(), JobStatus::Pending);
        assert_eq!(JobStatus::Done.persisted(), JobStatus::Done);
        assert_eq!(JobStatus::Failed.persisted(), JobStatus::Failed);
    }

    #[test]
    fn start_counts_attempts() {
        let mut job = Job::new(CompanyTarget::from_slug("acme")).with_attempts(2);
        job.start();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.attempts, 3);
        assert!(!job.status.is_terminal());
    }
}
