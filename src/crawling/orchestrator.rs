//! # Batch Orchestrator
//!
//! Computes the effective job set from the checkpoint, runs a bounded pool of
//! company workers over a shared queue, and persists each company's terminal
//! state as soon as its worker reports. The orchestrator task is the only
//! writer of the checkpoint file.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::company_worker::{CompanyOutcome, CompanyReport, CompanyWorker};
use super::pacing::{DelayGenerator, NoDelay, pause};
use crate::domain::{CompanyTarget, Job, JobStatus};
use crate::infrastructure::checkpoint_store::{CheckpointError, CheckpointStore, CheckpointSummary};
use crate::infrastructure::credentials::{Credential, CredentialError, CredentialProvider};

/// Process exit codes reported by [`RunReport::exit_code`]
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const FATAL: u8 = 1;
    pub const PARTIAL_FAILURE: u8 = 2;
    pub const AUTH_EXPIRED: u8 = 3;
    pub const INTERRUPTED: u8 = 130;
}

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Resume can no longer be trusted, so the run stops
    #[error("Checkpoint write failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Could not acquire credentials: {0}")]
    Credential(#[from] CredentialError),
}

/// How the job set is derived from prior checkpoint state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResumeMode {
    /// Discard prior state and process every input company
    Fresh,
    /// Skip `done` companies; `failed` ones only come back with `retry_failed`
    Resume { retry_failed: bool },
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Companies processed at the same time
    pub max_active_companies: usize,
    /// Split the job set into chunks with a rest between them
    pub batch_size: Option<usize>,
    /// Paid by a pool worker before each company after its first
    pub company_delay: Arc<dyn DelayGenerator>,
    pub batch_delay: Arc<dyn DelayGenerator>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_active_companies: 1,
            batch_size: None,
            company_delay: Arc::new(NoDelay),
            batch_delay: Arc::new(NoDelay),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcomes: Vec<CompanyReport>,
    pub summary: CheckpointSummary,
    /// Companies in the input that this run did not schedule
    pub skipped: usize,
    pub auth_expired: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunReport {
    #[must_use]
    pub fn done(&self) -> usize {
        self.outcomes.iter().filter(|r| r.outcome.is_done()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|r| r.outcome.is_failed()).count()
    }

    #[must_use]
    pub fn reviews_written(&self) -> usize {
        self.outcomes.iter().map(|r| r.reviews_written).sum()
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.auth_expired {
            exit_codes::AUTH_EXPIRED
        } else if self.cancelled {
            exit_codes::INTERRUPTED
        } else if self.failed() > 0 {
            exit_codes::PARTIAL_FAILURE
        } else {
            exit_codes::SUCCESS
        }
    }
}

type Queue = Arc<Mutex<VecDeque<Job>>>;

pub struct BatchOrchestrator {
    worker: Arc<CompanyWorker>,
    checkpoint: CheckpointStore,
    credentials: Arc<dyn CredentialProvider>,
    config: OrchestratorConfig,
}

impl BatchOrchestrator {
    pub fn new(
        worker: CompanyWorker,
        checkpoint: CheckpointStore,
        credentials: Arc<dyn CredentialProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            worker: Arc::new(worker),
            checkpoint,
            credentials,
            config,
        }
    }

    #[must_use]
    pub const fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Runs every scheduled company to a terminal state, or until the run is
    /// cancelled or credentials expire. Companies not finished stay `pending`.
    pub async fn run(
        &mut self,
        targets: &[CompanyTarget],
        mode: ResumeMode,
        cancel: &CancellationToken,
    ) -> Result<RunReport, HarvestError> {
        let started = Instant::now();
        let run_id = self.checkpoint.run_id();

        if let Err(e) = self.worker.writer().cleanup_staging() {
            warn!(error = %e, "⚠️ could not clean staging files");
        }

        let targets = unique_targets(targets);
        let jobs = self.prepare_jobs(&targets, mode).await?;
        let skipped = targets.len() - jobs.len();
        info!(
            %run_id,
            ?mode,
            scheduled = jobs.len(),
            skipped,
            workers = self.config.max_active_companies,
            "🚀 batch run starting"
        );

        let mut report = RunReport {
            run_id,
            outcomes: Vec::with_capacity(jobs.len()),
            summary: self.checkpoint.summary(),
            skipped,
            auth_expired: false,
            cancelled: false,
            elapsed: Duration::ZERO,
        };

        if !jobs.is_empty() {
            let credential = self.credentials.acquire().await?;
            info!(cookies = credential.cookie_count(), "🔑 credentials acquired");

            // Stops dispatch of new companies; in-flight workers keep `cancel`.
            let dispatch = cancel.child_token();
            let chunk_size = self.config.batch_size.filter(|n| *n > 0).unwrap_or(jobs.len());
            let chunks: Vec<Vec<Job>> = jobs.chunks(chunk_size).map(<[Job]>::to_vec).collect();
            let chunk_count = chunks.len();

            for (index, chunk) in chunks.into_iter().enumerate() {
                if index > 0 {
                    let rest = self.config.batch_delay.next_delay();
                    info!(batch = index + 1, of = chunk_count, rest_secs = rest.as_secs(), "😴 resting between batches");
                    if !pause(rest, &dispatch).await {
                        break;
                    }
                }
                if dispatch.is_cancelled() {
                    break;
                }
                info!(batch = index + 1, of = chunk_count, companies = chunk.len(), "📦 batch started");
                self.run_chunk(chunk, &credential, cancel, &dispatch, &mut report).await?;
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.summary = self.checkpoint.summary();
        report.elapsed = started.elapsed();
        info!(
            %run_id,
            done = report.summary.done,
            failed = report.summary.failed,
            pending = report.summary.pending,
            reviews = report.reviews_written(),
            auth_expired = report.auth_expired,
            cancelled = report.cancelled,
            elapsed_secs = report.elapsed.as_secs(),
            "🏁 batch run finished"
        );
        Ok(report)
    }

    async fn prepare_jobs(&mut self, targets: &[CompanyTarget], mode: ResumeMode) -> Result<Vec<Job>, HarvestError> {
        let retry_failed = match mode {
            ResumeMode::Fresh => {
                self.checkpoint.reset(targets).await?;
                false
            }
            ResumeMode::Resume { retry_failed } => {
                let added = self.checkpoint.reconcile(targets).await?;
                if added > 0 {
                    info!(added, "📋 new companies added to checkpoint");
                }
                retry_failed
            }
        };

        let mut jobs = Vec::new();
        for target in targets {
            let (status, attempts) = self
                .checkpoint
                .entry(&target.id)
                .map_or((JobStatus::Pending, 0), |e| (e.status, e.attempts));
            match status {
                JobStatus::Done => continue,
                JobStatus::Failed if !retry_failed => {
                    debug!(company = %target.id, "skipping previously failed company");
                    continue;
                }
                JobStatus::Failed => self.checkpoint.mark_pending(&target.id).await?,
                JobStatus::Pending | JobStatus::InProgress => {}
            }
            jobs.push(Job::new(target.clone()).with_attempts(attempts));
        }
        Ok(jobs)
    }

    async fn run_chunk(
        &mut self,
        chunk: Vec<Job>,
        credential: &Credential,
        cancel: &CancellationToken,
        dispatch: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<(), HarvestError> {
        let queue: Queue = Arc::new(Mutex::new(chunk.into()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(Job, CompanyReport)>();
        let mut pool = JoinSet::new();

        for slot in 0..self.config.max_active_companies.max(1) {
            pool.spawn(pool_worker(
                slot,
                Arc::clone(&queue),
                Arc::clone(&self.worker),
                credential.clone(),
                Arc::clone(&self.config.company_delay),
                cancel.clone(),
                dispatch.clone(),
                tx.clone(),
            ));
        }
        drop(tx);

        while let Some((job, company)) = rx.recv().await {
            if let Err(e) = self.persist(&job, &company).await {
                error!(company = %job.target.id, error = %e, "💥 checkpoint write failed, stopping run");
                dispatch.cancel();
                pool.abort_all();
                return Err(e);
            }
            if matches!(company.outcome, CompanyOutcome::AuthExpired { .. }) {
                report.auth_expired = true;
            }
            report.outcomes.push(company);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "💥 pool worker panicked");
            }
        }
        Ok(())
    }

    async fn persist(&mut self, job: &Job, company: &CompanyReport) -> Result<(), HarvestError> {
        let id = &job.target.id;
        match &company.outcome {
            CompanyOutcome::Done => {
                self.checkpoint
                    .mark_done(id, company.reviews_written, job.attempts)
                    .await?;
                info!(
                    company = %id,
                    status = %JobStatus::Done,
                    attempts = job.attempts,
                    pages = company.pages_fetched,
                    retries = company.retries,
                    reviews = company.reviews_written,
                    "✅ company done"
                );
            }
            CompanyOutcome::Failed { reason, class } => {
                self.checkpoint
                    .mark_failed(id, reason.clone(), company.reviews_written, job.attempts)
                    .await?;
                warn!(
                    company = %id,
                    status = %JobStatus::Failed,
                    attempts = job.attempts,
                    page = ?company.failed_page,
                    class = ?class,
                    reviews = company.reviews_written,
                    reason = %reason,
                    "❌ company failed"
                );
            }
            CompanyOutcome::Cancelled | CompanyOutcome::AuthExpired { .. } => {
                self.checkpoint.mark_pending(id).await?;
                info!(
                    company = %id,
                    status = %JobStatus::Pending,
                    attempts = job.attempts,
                    outcome = ?company.outcome,
                    "⏸️ company left pending"
                );
            }
        }
        Ok(())
    }
}

async fn pool_worker(
    slot: usize,
    queue: Queue,
    worker: Arc<CompanyWorker>,
    credential: Credential,
    company_delay: Arc<dyn DelayGenerator>,
    cancel: CancellationToken,
    dispatch: CancellationToken,
    reports: mpsc::UnboundedSender<(Job, CompanyReport)>,
) {
    let mut first = true;
    loop {
        if dispatch.is_cancelled() {
            break;
        }
        let Some(mut job) = queue.lock().await.pop_front() else {
            break;
        };
        if !first && !pause(company_delay.next_delay(), &dispatch).await {
            break;
        }
        first = false;

        job.start();
        debug!(slot, company = %job.target.id, attempt = job.attempts, "👷 worker picked company");
        let report = worker.run(&job.target, &credential, &cancel).await;
        if matches!(report.outcome, CompanyOutcome::AuthExpired { .. }) {
            dispatch.cancel();
        }
        if reports.send((job, report)).is_err() {
            break;
        }
    }
}

/// Keeps the first target per company id; a repeated id would race two
/// workers on one artifact.
fn unique_targets(targets: &[CompanyTarget]) -> Vec<CompanyTarget> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets
        .iter()
        .filter(|target| {
            let first = seen.insert(target.id.clone());
            if !first {
                warn!(company = %target.id, "duplicate target ignored");
            }
            first
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(outcomes: Vec<CompanyOutcome>) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            outcomes: outcomes
                .into_iter()
                .map(|outcome| CompanyReport {
                    company: "acme".into(),
                    outcome,
                    pages_fetched: 0,
                    retries: 0,
                    reviews_fetched: 0,
                    reviews_written: 0,
                    failed_page: None,
                    artifact: None,
                    elapsed: Duration::ZERO,
                })
                .collect(),
            summary: CheckpointSummary::default(),
            skipped: 0,
            auth_expired: false,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn repeated_targets_keep_first_entry() {
        let targets = vec![
            CompanyTarget::new("acme", "Acme", "https://example.com/acme"),
            CompanyTarget::from_slug("globex"),
            CompanyTarget::new("acme", "Acme Again", "https://example.com/acme-2"),
        ];
        let unique = unique_targets(&targets);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].display_name, "Acme");
        assert_eq!(unique[1].id.as_str(), "globex");
    }

    #[test]
    fn exit_code_precedence() {
        let failed = CompanyOutcome::Failed {
            reason: "x".into(),
            class: None,
        };
        assert_eq!(report_with(vec![CompanyOutcome::Done]).exit_code(), exit_codes::SUCCESS);
        assert_eq!(
            report_with(vec![CompanyOutcome::Done, failed.clone()]).exit_code(),
            exit_codes::PARTIAL_FAILURE
        );

        let mut interrupted = report_with(vec![failed.clone()]);
        interrupted.cancelled = true;
        assert_eq!(interrupted.exit_code(), exit_codes::INTERRUPTED);

        let mut expired = report_with(vec![failed]);
        expired.cancelled = true;
        expired.auth_expired = true;
        assert_eq!(expired.exit_code(), exit_codes::AUTH_EXPIRED);
    }
}
