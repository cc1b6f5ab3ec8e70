//! Infrastructure layer: filesystem, HTTP, credentials, configuration and logging
//!
//! Everything that touches the outside world lives here. The crawling core
//! only sees the traits and value types re-exported below.

pub mod atomic_file;
pub mod checkpoint_store;
pub mod config;
pub mod credentials;
pub mod http_review_source;
pub mod input_loader;
pub mod logging;
pub mod output_writer;

// Re-export commonly used items
pub use checkpoint_store::{Checkpoint, CheckpointEntry, CheckpointError, CheckpointStore, CheckpointSummary};
pub use config::{AppConfig, ConfigError, DelayRange};
pub use credentials::{
    CookieFileProvider, Credential, CredentialError, CredentialProvider, EnvCredentialProvider,
    StaticCredentialProvider,
};
pub use http_review_source::HttpReviewSource;
pub use input_loader::{InputError, load_targets};
pub use logging::init_logging;
pub use output_writer::{ArtifactSummary, OutputError, OutputWriter, StagedArtifact};
