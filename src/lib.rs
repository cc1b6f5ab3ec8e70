//! Review Harvester - resumable batch extraction of company reviews
//!
//! Fetches paginated reviews for a list of companies with bounded request
//! concurrency, classified retries, crash-safe per-company output and a
//! checkpoint that lets an interrupted batch pick up where it stopped.

// Module declarations
pub mod crawling;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

pub use crawling::{BatchOrchestrator, OrchestratorConfig, ResumeMode, RunReport};
pub use domain::{CompanyId, CompanyTarget, Review};
