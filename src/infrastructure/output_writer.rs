//! NDJSON artifact writer
//!
//! One directory per company, one file per company, one review per line.
//! Every write stages the complete artifact and atomically renames it into
//! place, so readers see either the previous artifact or the new one.
//! A resumed company is rewritten from scratch, never appended to.

use std::fmt::Write as _;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::atomic_file;
use crate::domain::{CompanyId, Review};

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize review {review_id} of {company}: {source}")]
    Serialize {
        company: CompanyId,
        review_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Artifact write task aborted: {0}")]
    Aborted(String),
}

/// Where a committed artifact ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub path: PathBuf,
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    root: PathBuf,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn company_dir(&self, company: &CompanyId) -> PathBuf {
        self.root.join(format!("{}_reviews", path_component(company)))
    }

    #[must_use]
    pub fn artifact_path(&self, company: &CompanyId) -> PathBuf {
        self.company_dir(company)
            .join(format!("reviews_{}.ndjson", path_component(company)))
    }

    /// Writes every review to a fresh staging file. Nothing is visible at
    /// the artifact path until [`StagedArtifact::commit`].
    pub fn stage(&self, company: &CompanyId, reviews: &[Review]) -> Result<StagedArtifact, OutputError> {
        let final_path = self.artifact_path(company);
        let io_err = |source| OutputError::Io {
            path: final_path.clone(),
            source,
        };

        let mut temp = atomic_file::stage_for(&final_path).map_err(io_err)?;
        {
            let mut out = BufWriter::new(temp.as_file_mut());
            for review in reviews {
                serde_json::to_writer(&mut out, review).map_err(|source| OutputError::Serialize {
                    company: company.clone(),
                    review_id: review.review_id.clone(),
                    source,
                })?;
                out.write_all(b"\n").map_err(io_err)?;
            }
            out.flush().map_err(io_err)?;
        }

        debug!(company = %company, records = reviews.len(), staging = %temp.path().display(), "staged artifact");
        Ok(StagedArtifact {
            temp,
            final_path,
            records: reviews.len(),
        })
    }

    /// Stages and commits on the blocking pool
    pub async fn write(&self, company: &CompanyId, reviews: Vec<Review>) -> Result<ArtifactSummary, OutputError> {
        let writer = self.clone();
        let company = company.clone();
        tokio::task::spawn_blocking(move || writer.stage(&company, &reviews)?.commit())
            .await
            .map_err(|e| OutputError::Aborted(e.to_string()))?
    }

    /// Removes staging files orphaned by a crash in a previous run
    pub fn cleanup_staging(&self) -> Result<usize, OutputError> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| OutputError::Io { path, source }
        };

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let path = entry.path();
            if path.is_dir() {
                removed += atomic_file::remove_orphans(&path).map_err(io_err(&path))?;
            }
        }
        if removed > 0 {
            warn!(removed, root = %self.root.display(), "🧹 removed orphaned staging files");
        }
        Ok(removed)
    }
}

/// A fully written but not yet visible artifact
#[derive(Debug)]
pub struct StagedArtifact {
    temp: NamedTempFile,
    final_path: PathBuf,
    records: usize,
}

impl StagedArtifact {
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        self.temp.path()
    }

    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Makes the artifact durable and atomically replaces the final path
    pub fn commit(self) -> Result<ArtifactSummary, OutputError> {
        let Self { temp, final_path, records } = self;
        atomic_file::commit(temp, &final_path).map_err(|source| OutputError::Io {
            path: final_path.clone(),
            source,
        })?;
        info!(records, path = %final_path.display(), "💾 artifact committed");
        Ok(ArtifactSummary { path: final_path, records })
    }
}

/// File-system safe form of a company id.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte is
/// written as `%XX`. The mapping is injective, so distinct ids never share
/// an artifact path.
#[must_use]
pub fn path_component(company: &CompanyId) -> String {
    let raw = company.as_str();
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
