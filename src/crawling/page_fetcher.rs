//! Page fetcher - one paced, gated, time-limited call to the review source

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::concurrency_gate::ConcurrencyGate;
use super::failure::FetchFailure;
use super::pacing::{DelayGenerator, pause};
use crate::domain::{PageRequest, ReviewPage};
use crate::infrastructure::credentials::Credential;

/// Site-specific transport for review pages
#[async_trait]
pub trait ReviewSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest, credential: &Credential) -> Result<ReviewPage, FetchFailure>;
}

#[derive(Debug)]
pub enum FetchAttempt {
    Page(ReviewPage),
    Failed(FetchFailure),
    /// Cancellation fired before the request was issued
    Cancelled,
}

#[derive(Clone)]
pub struct PageFetcher {
    source: Arc<dyn ReviewSource>,
    gate: ConcurrencyGate,
    request_delay: Arc<dyn DelayGenerator>,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(
        source: Arc<dyn ReviewSource>,
        gate: ConcurrencyGate,
        request_delay: Arc<dyn DelayGenerator>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            gate,
            request_delay,
            timeout,
        }
    }

    #[must_use]
    pub const fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Pays the inter-request delay, then performs the call while holding
    /// one gate permit. The delay is spent outside the gate so a pacing task
    /// never blocks another company's request.
    pub async fn fetch(
        &self,
        request: &PageRequest,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> FetchAttempt {
        if !pause(self.request_delay.next_delay(), cancel).await {
            return FetchAttempt::Cancelled;
        }

        let _permit = self.gate.acquire().await;
        debug!(company = %request.company_id, page = request.page_number(), "🌐 fetching review page");

        match tokio::time::timeout(self.timeout, self.source.fetch_page(request, credential)).await {
            Ok(Ok(page)) => FetchAttempt::Page(page),
            Ok(Err(failure)) => FetchAttempt::Failed(failure),
            Err(_) => FetchAttempt::Failed(FetchFailure::transient(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::failure::FailureClass;
    use crate::crawling::pacing::NoDelay;
    use crate::domain::CompanyId;

    struct SlowSource;

    #[async_trait]
    impl ReviewSource for SlowSource {
        async fn fetch_page(&self, _: &PageRequest, _: &Credential) -> Result<ReviewPage, FetchFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ReviewPage::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_classified_transient() {
        let fetcher = PageFetcher::new(
            Arc::new(SlowSource),
            ConcurrencyGate::new(1),
            Arc::new(NoDelay),
            Duration::from_secs(30),
        );
        let request = PageRequest::new(CompanyId::new("acme"), 0, 20);
        let attempt = fetcher
            .fetch(&request, &Credential::new("sid=1"), &CancellationToken::new())
            .await;

        match attempt {
            FetchAttempt::Failed(failure) => assert_eq!(failure.class, FailureClass::TransientNetwork),
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(fetcher.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_issue() {
        let fetcher = PageFetcher::new(
            Arc::new(SlowSource),
            ConcurrencyGate::new(1),
            Arc::new(NoDelay),
            Duration::from_secs(30),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = PageRequest::new(CompanyId::new("acme"), 0, 20);
        let attempt = fetcher.fetch(&request, &Credential::new("sid=1"), &cancel).await;
        assert!(matches!(attempt, FetchAttempt::Cancelled));
    }
}
