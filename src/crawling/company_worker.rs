//! Company worker - drives one company's page loop to a terminal outcome
//!
//! ```text
//! start -> fetching_page(offset) -> page_success -> fetching_page(offset + 1)
//!                                -> page_failed  -> finalizing (partial, flagged)
//!                     has_more == false / max_pages -> finalizing
//! finalizing -> done | failed
//! ```
//! Every path either advances the offset or spends retry budget, and both are
//! bounded, so the loop always terminates.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::failure::{FailureClass, FetchFailure};
use super::pacing::{DelayGenerator, pause};
use super::page_fetcher::{FetchAttempt, PageFetcher};
use super::retry_policy::{RetryDecision, RetryPolicy};
use crate::domain::{CompanyId, CompanyTarget, PageRequest, Review, ReviewPage, dedupe_reviews};
use crate::infrastructure::config::defaults;
use crate::infrastructure::credentials::Credential;
use crate::infrastructure::output_writer::OutputWriter;

/// Per-company loop knobs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub page_size: u32,
    /// Offsets at or beyond this are never requested
    pub max_pages: u32,
    pub retry: RetryPolicy,
    pub page_delay: Arc<dyn DelayGenerator>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            max_pages: defaults::MAX_PAGES,
            retry: RetryPolicy::default(),
            page_delay: Arc::new(super::pacing::RandomDelay::from_millis(
                defaults::PAGE_DELAY_MIN_MS,
                defaults::PAGE_DELAY_MAX_MS,
            )),
        }
    }
}

/// Terminal state of one worker run
#[derive(Debug, Clone, PartialEq)]
pub enum CompanyOutcome {
    Done,
    /// `class` is `None` when the artifact write itself failed
    Failed {
        reason: String,
        class: Option<FailureClass>,
    },
    /// Stopped before a request because the run was cancelled; nothing written
    Cancelled,
    /// Credentials rejected; nothing written
    AuthExpired { message: String },
}

impl CompanyOutcome {
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CompanyReport {
    pub company: CompanyId,
    pub outcome: CompanyOutcome,
    pub pages_fetched: u32,
    pub retries: u32,
    pub reviews_fetched: usize,
    pub reviews_written: usize,
    /// 1-based page number that was abandoned, if any
    pub failed_page: Option<u32>,
    pub artifact: Option<PathBuf>,
    pub elapsed: Duration,
}

impl CompanyReport {
    fn new(company: CompanyId) -> Self {
        Self {
            company,
            outcome: CompanyOutcome::Cancelled,
            pages_fetched: 0,
            retries: 0,
            reviews_fetched: 0,
            reviews_written: 0,
            failed_page: None,
            artifact: None,
            elapsed: Duration::ZERO,
        }
    }
}

enum PageResult {
    Page(ReviewPage),
    Abandoned { failure: FetchFailure, attempt: u32 },
    Cancelled,
}

pub struct CompanyWorker {
    fetcher: PageFetcher,
    writer: OutputWriter,
    settings: WorkerSettings,
}

impl CompanyWorker {
    #[must_use]
    pub const fn new(fetcher: PageFetcher, writer: OutputWriter, settings: WorkerSettings) -> Self {
        Self {
            fetcher,
            writer,
            settings,
        }
    }

    #[must_use]
    pub const fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    #[must_use]
    pub const fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    /// Fetches every page of `target` in offset order and writes the result.
    /// A company is always refetched from offset 0 and its artifact replaced.
    pub async fn run(&self, target: &CompanyTarget, credential: &Credential, cancel: &CancellationToken) -> CompanyReport {
        let started = Instant::now();
        let company = target.id.clone();
        let mut report = CompanyReport::new(company.clone());
        let mut collected: Vec<Review> = Vec::new();
        let mut abandoned: Option<FetchFailure> = None;

        info!(company = %company, name = %target.display_name, "🏢 company started");

        let mut offset = 0;
        while offset < self.settings.max_pages {
            if cancel.is_cancelled() {
                return self.stop(report, started, CompanyOutcome::Cancelled);
            }

            let request = PageRequest::new(company.clone(), offset, self.settings.page_size);
            match self.fetch_with_retry(&request, credential, cancel, &mut report).await {
                PageResult::Page(page) => {
                    report.pages_fetched += 1;
                    let count = page.reviews.len();
                    debug!(company = %company, page = request.page_number(), reviews = count, has_more = page.has_more, "📄 page fetched");
                    collected.extend(page.reviews);
                    if !page.has_more || count == 0 {
                        break;
                    }
                }
                PageResult::Abandoned { failure, attempt } => {
                    if failure.class == FailureClass::AuthExpired {
                        warn!(company = %company, page = request.page_number(), attempt, "🔒 credentials rejected");
                        let message = failure.message;
                        return self.stop(report, started, CompanyOutcome::AuthExpired { message });
                    }
                    report.failed_page = Some(request.page_number());
                    abandoned = Some(failure);
                    break;
                }
                PageResult::Cancelled => return self.stop(report, started, CompanyOutcome::Cancelled),
            }

            offset += 1;
            if offset < self.settings.max_pages && !pause(self.settings.page_delay.next_delay(), cancel).await {
                return self.stop(report, started, CompanyOutcome::Cancelled);
            }
        }

        self.finalize(report, collected, abandoned, started).await
    }

    async fn fetch_with_retry(
        &self,
        request: &PageRequest,
        credential: &Credential,
        cancel: &CancellationToken,
        report: &mut CompanyReport,
    ) -> PageResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.fetcher.fetch(request, credential, cancel).await {
                FetchAttempt::Page(page) => return PageResult::Page(page),
                FetchAttempt::Cancelled => return PageResult::Cancelled,
                FetchAttempt::Failed(failure) => failure,
            };

            match self
                .settings
                .retry
                .decide_with_hint(attempt, failure.class, failure.retry_after)
            {
                RetryDecision::RetryAfter(delay) => {
                    report.retries += 1;
                    warn!(
                        company = %request.company_id,
                        page = request.page_number(),
                        class = %failure.class,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %failure.message,
                        "🔄 retrying page"
                    );
                    if !pause(delay, cancel).await {
                        return PageResult::Cancelled;
                    }
                }
                RetryDecision::Abandon => {
                    warn!(
                        company = %request.company_id,
                        page = request.page_number(),
                        class = %failure.class,
                        attempt,
                        error = %failure.message,
                        "🛑 page abandoned"
                    );
                    return PageResult::Abandoned { failure, attempt };
                }
            }
        }
    }

    async fn finalize(
        &self,
        mut report: CompanyReport,
        collected: Vec<Review>,
        abandoned: Option<FetchFailure>,
        started: Instant,
    ) -> CompanyReport {
        let reviews = dedupe_reviews(collected);
        report.reviews_fetched = reviews.len();

        // An abandoned first page leaves nothing worth replacing a prior artifact with.
        if reviews.is_empty() && abandoned.is_some() {
            let outcome = failed_outcome(abandoned, report.failed_page);
            return self.stop(report, started, outcome);
        }

        let outcome = match self.writer.write(&report.company, reviews).await {
            Ok(summary) => {
                report.reviews_written = summary.records;
                report.artifact = Some(summary.path);
                if abandoned.is_some() {
                    failed_outcome(abandoned, report.failed_page)
                } else {
                    CompanyOutcome::Done
                }
            }
            Err(e) => CompanyOutcome::Failed {
                reason: format!("io-failure: {e}"),
                class: None,
            },
        };
        self.stop(report, started, outcome)
    }

    fn stop(&self, mut report: CompanyReport, started: Instant, outcome: CompanyOutcome) -> CompanyReport {
        report.outcome = outcome;
        report.elapsed = started.elapsed();
        debug!(
            company = %report.company,
            outcome = ?report.outcome,
            pages = report.pages_fetched,
            retries = report.retries,
            reviews = report.reviews_written,
            max_pages = self.settings.max_pages,
            "worker finished"
        );
        report
    }
}

fn failed_outcome(abandoned: Option<FetchFailure>, page: Option<u32>) -> CompanyOutcome {
    match abandoned {
        Some(failure) => CompanyOutcome::Failed {
            reason: format!("page {} abandoned: {failure}", page.unwrap_or_default()),
            class: Some(failure.class),
        },
        None => CompanyOutcome::Failed {
            reason: "page abandoned".to_string(),
            class: None,
        },
    }
}
