//! Configuration infrastructure
//!
//! Settings are layered, later layers winning:
//! 1. Built-in defaults (`defaults` module)
//! 2. Optional config file (JSON or TOML, `--config` or the user config dir)
//! 3. Environment variables `HARVEST__<SECTION>__<KEY>`
//! 4. Command-line flags, applied by the binary

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid delay range '{0}', expected MIN-MAX")]
    InvalidRange(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawling: CrawlingConfig,
    pub retry: RetryConfig,
    pub pacing: PacingConfig,
    pub http: HttpConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// Batch and page-loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlingConfig {
    /// Maximum in-flight requests across all companies
    pub max_concurrent_requests: usize,

    /// Companies processed side by side
    pub max_active_companies: usize,

    /// Reviews requested per page (the site accepts 20, 50 or 100)
    pub page_size: u32,

    /// Hard stop for a single company's page loop
    pub max_pages: u32,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Split the job list into chunks of this many companies
    pub batch_size: Option<usize>,

    /// Retry companies recorded as failed when resuming
    pub retry_failed_on_resume: bool,
}

/// Backoff settings for a single page request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub transient_base_delay_ms: u64,
    pub rate_limited_base_delay_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ratio: f64,
}

/// Inclusive millisecond range for randomized delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    #[must_use]
    pub const fn millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    #[must_use]
    pub const fn secs(min: u64, max: u64) -> Self {
        Self::millis(min * 1000, max * 1000)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self::millis(0, 0)
    }

    #[must_use]
    pub const fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    #[must_use]
    pub const fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Parses `MIN-MAX` (or a single value) in seconds, fractions allowed
    pub fn parse_secs(raw: &str) -> Result<Self, ConfigError> {
        Self::parse_scaled(raw, 1000.0)
    }

    /// Parses `MIN-MAX` (or a single value) in milliseconds
    pub fn parse_millis(raw: &str) -> Result<Self, ConfigError> {
        Self::parse_scaled(raw, 1.0)
    }

    fn parse_scaled(raw: &str, to_ms: f64) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRange(raw.to_string());
        let parse = |part: &str| -> Result<u64, ConfigError> {
            let value: f64 = part.trim().parse().map_err(|_| invalid())?;
            if !value.is_finite() || value < 0.0 {
                return Err(invalid());
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ms = (value * to_ms).round() as u64;
            Ok(ms)
        };

        let (min, max) = match raw.split_once('-') {
            Some((lo, hi)) => (parse(lo)?, parse(hi)?),
            None => {
                let v = parse(raw)?;
                (v, v)
            }
        };
        if min > max {
            return Err(invalid());
        }
        Ok(Self::millis(min, max))
    }
}

/// Human-like pacing between requests, pages, companies and batches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Paid before every request
    pub request_delay: DelayRange,
    /// Paid between consecutive pages of one company
    pub page_delay: DelayRange,
    /// Paid by a worker between two companies
    pub company_delay: DelayRange,
    /// Rest between batches when `batch_size` is set
    pub batch_delay: DelayRange,
}

/// Review-service endpoint and header settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
    pub user_agent: String,
    pub app_id: String,
    pub system_id: String,
    pub accept_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
    pub checkpoint_file: PathBuf,
    /// Defaults to `<output_dir>/../logs` when unset
    pub log_dir: Option<PathBuf>,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted console logs
    pub json_format: bool,

    /// Also write logs to a daily rolling file
    pub file_output: bool,

    /// File name prefix for the rolling log
    pub file_prefix: String,
}

impl Default for CrawlingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: defaults::MAX_CONCURRENT_REQUESTS,
            max_active_companies: defaults::MAX_ACTIVE_COMPANIES,
            page_size: defaults::PAGE_SIZE,
            max_pages: defaults::MAX_PAGES,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            batch_size: None,
            retry_failed_on_resume: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            transient_base_delay_ms: defaults::TRANSIENT_BASE_DELAY_MS,
            rate_limited_base_delay_ms: defaults::RATE_LIMITED_BASE_DELAY_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter_ratio: defaults::JITTER_RATIO,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_delay: DelayRange::millis(defaults::REQUEST_DELAY_MIN_MS, defaults::REQUEST_DELAY_MAX_MS),
            page_delay: DelayRange::millis(defaults::PAGE_DELAY_MIN_MS, defaults::PAGE_DELAY_MAX_MS),
            company_delay: DelayRange::secs(defaults::COMPANY_DELAY_MIN_SECS, defaults::COMPANY_DELAY_MAX_SECS),
            batch_delay: DelayRange::secs(defaults::BATCH_DELAY_MIN_SECS, defaults::BATCH_DELAY_MAX_SECS),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            user_agent: defaults::USER_AGENT.to_string(),
            app_id: defaults::APP_ID.to_string(),
            system_id: defaults::SYSTEM_ID.to_string(),
            accept_language: defaults::ACCEPT_LANGUAGE.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            checkpoint_file: PathBuf::from(defaults::CHECKPOINT_FILE),
            log_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            file_output: true,
            file_prefix: defaults::LOG_FILE_PREFIX.to_string(),
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            self.output_dir
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("logs"), |p| p.join("logs"))
        })
    }
}

impl AppConfig {
    /// Default location of the user config file
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("review-harvester").join("config.json"))
    }

    /// Loads defaults, then `path` (or the user config file when it exists),
    /// then `HARVEST__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::default_config_path().filter(|p| p.exists()) {
                    info!(path = %default_path.display(), "📁 using user config file");
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("HARVEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.crawling.max_concurrent_requests == 0 {
            return fail("crawling.max_concurrent_requests must be at least 1");
        }
        if self.crawling.max_active_companies == 0 {
            return fail("crawling.max_active_companies must be at least 1");
        }
        if self.crawling.page_size == 0 {
            return fail("crawling.page_size must be at least 1");
        }
        if self.crawling.max_pages == 0 {
            return fail("crawling.max_pages must be at least 1");
        }
        if self.crawling.request_timeout_seconds == 0 {
            return fail("crawling.request_timeout_seconds must be at least 1");
        }
        if self.crawling.batch_size == Some(0) {
            return fail("crawling.batch_size must be at least 1 when set");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return fail("retry.backoff_multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return fail("retry.jitter_ratio must be within 0.0..=1.0");
        }
        let p = &self.pacing;
        for (name, range) in [
            ("request_delay", p.request_delay),
            ("page_delay", p.page_delay),
            ("company_delay", p.company_delay),
            ("batch_delay", p.batch_delay),
        ] {
            if range.min_ms > range.max_ms {
                return Err(ConfigError::Validation {
                    message: format!("pacing.{name} has min > max"),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawling.request_timeout_seconds)
    }
}

/// Default values, tuned for the review site's tolerance
pub mod defaults {
    pub const MAX_CONCURRENT_REQUESTS: usize = 5;
    pub const MAX_ACTIVE_COMPANIES: usize = 2;
    pub const PAGE_SIZE: u32 = 20;
    pub const MAX_PAGES: u32 = 10_000;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const MAX_ATTEMPTS: u32 = 5;
    pub const TRANSIENT_BASE_DELAY_MS: u64 = 2_000;
    pub const RATE_LIMITED_BASE_DELAY_MS: u64 = 10_000;
    pub const MAX_BACKOFF_MS: u64 = 120_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const JITTER_RATIO: f64 = 0.25;

    pub const REQUEST_DELAY_MIN_MS: u64 = 500;
    pub const REQUEST_DELAY_MAX_MS: u64 = 1_500;
    pub const PAGE_DELAY_MIN_MS: u64 = 50;
    pub const PAGE_DELAY_MAX_MS: u64 = 150;
    pub const COMPANY_DELAY_MIN_SECS: u64 = 5;
    pub const COMPANY_DELAY_MAX_SECS: u64 = 10;
    pub const BATCH_DELAY_MIN_SECS: u64 = 30;
    pub const BATCH_DELAY_MAX_SECS: u64 = 60;

    pub const BASE_URL: &str = "https://www.ambitionbox.com";
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const APP_ID: &str = "931";
    pub const SYSTEM_ID: &str = "ambitionbox-review-services";
    pub const ACCEPT_LANGUAGE: &str = "en-GB,en-US;q=0.9,en;q=0.8";

    pub const OUTPUT_DIR: &str = "reviews_data";
    pub const CHECKPOINT_FILE: &str = "batch_progress.json";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_PREFIX: &str = "review-harvester.log";
}
