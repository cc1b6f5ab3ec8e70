//! Domain module - companies, jobs, pages and review records
//!
//! Each concept lives in its own file under `domain/`; the commonly used
//! types are re-exported here for convenience.

pub mod company;
pub mod job;
pub mod review;

pub use company::{CompanyId, CompanyTarget};
pub use job::{Job, JobStatus};
pub use review::{PageRequest, Review, ReviewPage, dedupe_reviews};
