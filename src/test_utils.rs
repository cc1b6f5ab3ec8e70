//! Test utilities shared by unit and integration tests
//!
//! `ScriptedReviewSource` is an in-memory [`ReviewSource`] with a fixed page
//! layout per company and scripted failures per `(company, offset)`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::crawling::{FetchFailure, ReviewSource};
use crate::domain::{CompanyId, CompanyTarget, PageRequest, Review, ReviewPage};
use crate::infrastructure::credentials::Credential;

#[derive(Debug, Clone, Copy)]
struct Layout {
    pages: u32,
    per_page: usize,
    /// Leading reviews of each page after the first that repeat the tail
    /// of the previous page
    overlap: usize,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    failure: FetchFailure,
    /// `None` fails forever
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ScriptedReviewSource {
    layouts: HashMap<CompanyId, Layout>,
    failures: Mutex<HashMap<(CompanyId, u32), ScriptedFailure>>,
    requests: Mutex<Vec<(CompanyId, u32)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedReviewSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `pages` pages of `per_page` reviews each
    #[must_use]
    pub fn with_company(mut self, slug: &str, pages: u32, per_page: usize) -> Self {
        self.layouts.insert(CompanyId::new(slug), Layout { pages, per_page, overlap: 0 });
        self
    }

    /// Like [`Self::with_company`], but every page after the first opens
    /// with the last `overlap` reviews of the page before it, the way the
    /// site's listing shifts when new reviews arrive mid-crawl.
    #[must_use]
    pub fn with_shifting_company(mut self, slug: &str, pages: u32, per_page: usize, overlap: usize) -> Self {
        let overlap = overlap.min(per_page);
        self.layouts.insert(CompanyId::new(slug), Layout { pages, per_page, overlap });
        self
    }

    /// Simulated network time per call, spent while the gate permit is held
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails the first `times` requests for `offset`, then serves normally
    #[must_use]
    pub fn fail_times(self, slug: &str, offset: u32, times: u32, failure: FetchFailure) -> Self {
        self.script(slug, offset, failure, Some(times))
    }

    #[must_use]
    pub fn fail_always(self, slug: &str, offset: u32, failure: FetchFailure) -> Self {
        self.script(slug, offset, failure, None)
    }

    fn script(self, slug: &str, offset: u32, failure: FetchFailure, remaining: Option<u32>) -> Self {
        lock(&self.failures).insert((CompanyId::new(slug), offset), ScriptedFailure { failure, remaining });
        self
    }

    #[must_use]
    pub fn targets(&self) -> Vec<CompanyTarget> {
        let mut ids: Vec<_> = self.layouts.keys().cloned().collect();
        ids.sort();
        ids.iter().map(|id| CompanyTarget::from_slug(id.as_str())).collect()
    }

    /// Offsets requested for `company`, in call order, retries included
    #[must_use]
    pub fn offsets_requested(&self, company: &CompanyId) -> Vec<u32> {
        lock(&self.requests)
            .iter()
            .filter(|(id, _)| id == company)
            .map(|(_, offset)| *offset)
            .collect()
    }

    #[must_use]
    pub fn total_requests(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Highest number of simultaneous `fetch_page` calls observed
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_failure(&self, company: &CompanyId, offset: u32) -> Option<FetchFailure> {
        let mut failures = lock(&self.failures);
        let key = (company.clone(), offset);
        let scripted = failures.get_mut(&key)?;
        match scripted.remaining {
            None => Some(scripted.failure.clone()),
            Some(0) => None,
            Some(ref mut n) => {
                *n -= 1;
                Some(scripted.failure.clone())
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Review id as served by [`ScriptedReviewSource`]
#[must_use]
pub fn review_id(company: &str, offset: u32, index: usize) -> String {
    format!("{company}-{offset}-{index}")
}

#[async_trait]
impl ReviewSource for ScriptedReviewSource {
    async fn fetch_page(&self, request: &PageRequest, _credential: &Credential) -> Result<ReviewPage, FetchFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        lock(&self.requests).push((request.company_id.clone(), request.offset));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = match self.next_failure(&request.company_id, request.offset) {
            Some(failure) => Err(failure),
            None => Ok(self.page(request)),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl ScriptedReviewSource {
    fn page(&self, request: &PageRequest) -> ReviewPage {
        let Some(layout) = self.layouts.get(&request.company_id) else {
            return ReviewPage::default();
        };
        if request.offset >= layout.pages {
            return ReviewPage::default();
        }
        let reviews = (0..layout.per_page)
            .map(|i| {
                let (offset, index) = if request.offset > 0 && i < layout.overlap {
                    (request.offset - 1, layout.per_page - layout.overlap + i)
                } else {
                    (request.offset, i)
                };
                let mut review = Review::new(
                    request.company_id.clone(),
                    review_id(request.company_id.as_str(), offset, index),
                );
                review.rating = Some(4.0);
                review.title = Some(format!("Review {i} on page {}", request.page_number()));
                review
            })
            .collect();
        ReviewPage {
            reviews,
            has_more: request.offset + 1 < layout.pages,
        }
    }
}
