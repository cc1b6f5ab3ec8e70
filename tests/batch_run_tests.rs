//! End-to-end batch runs against the scripted review source
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use review_harvester::crawling::{
    BatchOrchestrator, CompanyOutcome, CompanyWorker, ConcurrencyGate, FailureClass, FetchFailure, NoDelay,
    OrchestratorConfig, PageFetcher, ResumeMode, RetryPolicy, ReviewSource, WorkerSettings,
};
use review_harvester::domain::{CompanyId, CompanyTarget, JobStatus, PageRequest, Review, ReviewPage};
use review_harvester::infrastructure::{
    CheckpointStore, Credential, OutputWriter, StaticCredentialProvider,
};
use review_harvester::test_utils::{ScriptedReviewSource, review_id};
use tokio_util::sync::CancellationToken;

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        transient_base: Duration::from_millis(2),
        rate_limited_base: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter_ratio: 0.0,
    }
}

async fn orchestrator(source: Arc<dyn ReviewSource>, root: &Path, active: usize) -> BatchOrchestrator {
    let config = OrchestratorConfig {
        max_active_companies: active,
        ..OrchestratorConfig::default()
    };
    orchestrator_with(source, root, config).await
}

async fn orchestrator_with(source: Arc<dyn ReviewSource>, root: &Path, config: OrchestratorConfig) -> BatchOrchestrator {
    let fetcher = PageFetcher::new(source, ConcurrencyGate::new(4), Arc::new(NoDelay), Duration::from_secs(5));
    let settings = WorkerSettings {
        page_size: 2,
        max_pages: 50,
        retry: fast_retries(),
        page_delay: Arc::new(NoDelay),
    };
    let worker = CompanyWorker::new(fetcher, OutputWriter::new(root.join("out")), settings);
    let checkpoint = CheckpointStore::open(root.join("progress.json")).await.unwrap();
    BatchOrchestrator::new(
        worker,
        checkpoint,
        Arc::new(StaticCredentialProvider::new(Credential::new("sid=test"))),
        config,
    )
}

fn artifact_lines(root: &Path, slug: &str) -> usize {
    let path = OutputWriter::new(root.join("out")).artifact_path(&CompanyId::new(slug));
    std::fs::read_to_string(path).unwrap().lines().count()
}

fn artifact_ids(root: &Path, slug: &str) -> Vec<String> {
    let path = OutputWriter::new(root.join("out")).artifact_path(&CompanyId::new(slug));
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Review>(line).unwrap().review_id)
        .collect()
}

fn three_companies() -> ScriptedReviewSource {
    ScriptedReviewSource::new()
        .with_company("alpha", 2, 2)
        .with_company("beta", 2, 2)
        .with_company("gamma", 2, 2)
}

#[tokio::test]
async fn flaky_page_is_retried_and_every_company_completes() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(three_companies().fail_times("beta", 1, 2, FetchFailure::transient("connection reset")));
    let targets = source.targets();

    let mut orch = orchestrator(source.clone(), dir.path(), 2).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.done(), 3);
    assert_eq!(report.exit_code(), 0);
    for slug in ["alpha", "beta", "gamma"] {
        assert_eq!(artifact_lines(dir.path(), slug), 4, "{slug}");
    }

    let beta = report.outcomes.iter().find(|r| r.company.as_str() == "beta").unwrap();
    assert_eq!(beta.retries, 2);
    assert_eq!(source.offsets_requested(&CompanyId::new("beta")), vec![0, 1, 1, 1]);

    let on_disk = CheckpointStore::load(&dir.path().join("progress.json")).await.unwrap();
    assert!(on_disk.companies.values().all(|e| e.status == JobStatus::Done));
    assert_eq!(report.summary.done, 3);
}

#[tokio::test]
async fn permanent_failure_fails_one_company_only() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(three_companies().fail_always("gamma", 1, FetchFailure::permanent("HTTP 404")));
    let targets = source.targets();

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.done(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.exit_code(), 2);
    // Permanent failures are not retried.
    assert_eq!(source.offsets_requested(&CompanyId::new("gamma")), vec![0, 1]);
    assert_eq!(artifact_lines(dir.path(), "gamma"), 2);

    let entry = orch.checkpoint().entry(&CompanyId::new("gamma")).unwrap();
    assert_eq!(entry.status, JobStatus::Failed);
    assert_eq!(entry.reviews, 2);
    assert!(entry.reason.as_deref().unwrap().contains("permanent"));

    let gamma = report.outcomes.iter().find(|r| r.company.as_str() == "gamma").unwrap();
    assert!(matches!(
        gamma.outcome,
        CompanyOutcome::Failed {
            class: Some(FailureClass::Permanent),
            ..
        }
    ));
}

#[tokio::test]
async fn exhausted_retries_abandon_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        ScriptedReviewSource::new()
            .with_company("alpha", 3, 2)
            .fail_always("alpha", 2, FetchFailure::rate_limited("HTTP 429")),
    );
    let targets = source.targets();

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    let alpha = &report.outcomes[0];
    assert!(alpha.outcome.is_failed());
    assert_eq!(alpha.failed_page, Some(3));
    assert_eq!(alpha.retries, 3);
    assert_eq!(source.offsets_requested(&CompanyId::new("alpha")), vec![0, 1, 2, 2, 2, 2]);
    assert_eq!(artifact_lines(dir.path(), "alpha"), 4);
}

#[tokio::test]
async fn resume_skips_companies_already_done() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(three_companies());
    let targets = source.targets();

    // A previous run committed alpha and then crashed.
    {
        let mut store = CheckpointStore::open(dir.path().join("progress.json")).await.unwrap();
        store.reconcile(&targets).await.unwrap();
        store.mark_done(&CompanyId::new("alpha"), 4, 1).await.unwrap();
    }

    let mut orch = orchestrator(source.clone(), dir.path(), 2).await;
    let report = orch
        .run(&targets, ResumeMode::Resume { retry_failed: false }, &CancellationToken::new())
        .await
        .unwrap();

    assert!(source.offsets_requested(&CompanyId::new("alpha")).is_empty());
    assert_eq!(report.skipped, 1);
    assert_eq!(report.done(), 2);
    assert_eq!(report.summary.done, 3);
}

#[tokio::test]
async fn failed_companies_return_only_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(three_companies());
    let targets = source.targets();
    {
        let mut store = CheckpointStore::open(dir.path().join("progress.json")).await.unwrap();
        store.reconcile(&targets).await.unwrap();
        store.mark_done(&CompanyId::new("alpha"), 4, 1).await.unwrap();
        store.mark_done(&CompanyId::new("beta"), 4, 1).await.unwrap();
        store.mark_failed(&CompanyId::new("gamma"), "HTTP 500", 0, 1).await.unwrap();
    }

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch
        .run(&targets, ResumeMode::Resume { retry_failed: false }, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(source.total_requests(), 0);
    assert_eq!(report.summary.failed, 1);

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch
        .run(&targets, ResumeMode::Resume { retry_failed: true }, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.done(), 1);
    assert_eq!(report.summary.done, 3);
    let gamma = orch.checkpoint().entry(&CompanyId::new("gamma")).unwrap();
    assert_eq!(gamma.attempts, 2);
    assert_eq!(gamma.reason, None);
}

#[tokio::test]
async fn fresh_run_discards_prior_progress() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(three_companies());
    let targets = source.targets();
    {
        let mut store = CheckpointStore::open(dir.path().join("progress.json")).await.unwrap();
        store.reconcile(&targets).await.unwrap();
        store.mark_done(&CompanyId::new("alpha"), 4, 1).await.unwrap();
    }

    let mut orch = orchestrator(source.clone(), dir.path(), 2).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.done(), 3);
    assert_eq!(source.offsets_requested(&CompanyId::new("alpha")), vec![0, 1]);
}

#[tokio::test]
async fn expired_credentials_stop_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(three_companies().fail_always("alpha", 0, FetchFailure::auth_expired("HTTP 401")));
    let targets = source.targets();

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    assert!(report.auth_expired);
    assert_eq!(report.exit_code(), 3);
    // auth-expired is never retried locally
    assert_eq!(source.total_requests(), 1);
    assert_eq!(report.summary.pending, 3);
    assert!(
        !OutputWriter::new(dir.path().join("out"))
            .artifact_path(&CompanyId::new("alpha"))
            .exists()
    );
}

/// Cancels the run when `trigger` is first fetched, like an interrupt
/// arriving mid-company.
struct CancelOnFetch {
    inner: ScriptedReviewSource,
    trigger: CompanyId,
    cancel: CancellationToken,
}

#[async_trait]
impl ReviewSource for CancelOnFetch {
    async fn fetch_page(&self, request: &PageRequest, credential: &Credential) -> Result<ReviewPage, FetchFailure> {
        if request.company_id == self.trigger {
            self.cancel.cancel();
        }
        self.inner.fetch_page(request, credential).await
    }
}

#[tokio::test]
async fn cancellation_leaves_unfinished_companies_pending() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let inner = three_companies();
    let targets: Vec<CompanyTarget> = inner.targets();
    let source = Arc::new(CancelOnFetch {
        inner,
        trigger: CompanyId::new("beta"),
        cancel: cancel.clone(),
    });

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.exit_code(), 130);
    let status = |slug: &str| orch.checkpoint().status(&CompanyId::new(slug)).unwrap();
    assert_eq!(status("alpha"), JobStatus::Done);
    assert_eq!(status("beta"), JobStatus::Pending);
    assert_eq!(status("gamma"), JobStatus::Pending);
    // The in-flight request completed, but no further page was issued.
    assert_eq!(source.inner.offsets_requested(&CompanyId::new("beta")), vec![0]);
    assert!(source.inner.offsets_requested(&CompanyId::new("gamma")).is_empty());
}

#[tokio::test]
async fn batches_cover_every_company() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        ScriptedReviewSource::new()
            .with_company("a", 1, 1)
            .with_company("b", 1, 1)
            .with_company("c", 1, 1)
            .with_company("d", 1, 1)
            .with_company("e", 1, 1),
    );
    let targets = source.targets();
    let config = OrchestratorConfig {
        max_active_companies: 2,
        batch_size: Some(2),
        ..OrchestratorConfig::default()
    };

    let mut orch = orchestrator_with(source.clone(), dir.path(), config).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.done(), 5);
    assert_eq!(source.total_requests(), 5);
}

#[tokio::test]
async fn shifted_pages_and_retries_never_duplicate_reviews() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        ScriptedReviewSource::new()
            .with_shifting_company("delta", 3, 2, 1)
            .fail_times("delta", 1, 1, FetchFailure::transient("connection reset")),
    );
    let targets = source.targets();

    let mut orch = orchestrator(source.clone(), dir.path(), 1).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.done(), 1);
    assert_eq!(source.offsets_requested(&CompanyId::new("delta")), vec![0, 1, 1, 2]);
    let expected: Vec<String> = [(0, 0), (0, 1), (1, 1), (2, 1)]
        .iter()
        .map(|&(offset, index)| review_id("delta", offset, index))
        .collect();
    assert_eq!(artifact_ids(dir.path(), "delta"), expected);
}

#[tokio::test]
async fn repeated_target_is_harvested_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedReviewSource::new().with_company("alpha", 2, 2));
    let mut targets = source.targets();
    targets.push(CompanyTarget::from_slug("alpha"));

    let mut orch = orchestrator(source.clone(), dir.path(), 2).await;
    let report = orch.run(&targets, ResumeMode::Fresh, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(source.offsets_requested(&CompanyId::new("alpha")), vec![0, 1]);
    assert_eq!(artifact_lines(dir.path(), "alpha"), 4);
}
