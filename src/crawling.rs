//! # Crawling engine
//!
//! The batch orchestration core:
//! - `concurrency_gate`: shared permit counter for in-flight requests
//! - `retry_policy`: backoff decisions per failure class
//! - `pacing`: injectable human-like delays
//! - `page_fetcher`: one paced, gated, time-limited page call
//! - `company_worker`: per-company page loop and finalization
//! - `orchestrator`: job set, worker pool and incremental checkpointing

pub mod company_worker;
pub mod concurrency_gate;
pub mod failure;
pub mod orchestrator;
pub mod pacing;
pub mod page_fetcher;
pub mod retry_policy;

pub use company_worker::{CompanyOutcome, CompanyReport, CompanyWorker, WorkerSettings};
pub use concurrency_gate::{ConcurrencyGate, GatePermit};
pub use failure::{FailureClass, FetchFailure};
pub use orchestrator::{BatchOrchestrator, OrchestratorConfig, ResumeMode, RunReport};
pub use pacing::{DelayGenerator, FixedDelay, NoDelay, RandomDelay};
pub use page_fetcher::{FetchAttempt, PageFetcher, ReviewSource};
pub use retry_policy::{RetryDecision, RetryPolicy};
