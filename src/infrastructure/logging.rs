//! Logging system configuration and initialization
//!
//! - Console output, plain or JSON
//! - Optional daily rolling log file written through a non-blocking appender
//! - `RUST_LOG` overrides the configured level entirely
//!
//! Unless the level is `trace`, chatty HTTP internals are held at `warn`:
//! ```bash
//! # Show connection-level details while debugging a blocked session
//! RUST_LOG="debug,reqwest=debug,hyper=debug" review-harvester --input companies.csv
//! ```

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::infrastructure::config::LoggingConfig;

const QUIET_TARGETS: &[&str] = &["reqwest", "hyper", "hyper_util", "h2", "rustls", "tokio"];

/// Local wall-clock timestamps with milliseconds
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{level}'"))?;
    if !level.to_lowercase().contains("trace") {
        for target in QUIET_TARGETS {
            filter = filter.add_directive(format!("{target}=warn").parse()?);
        }
    }
    Ok(filter)
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// whole run, dropping it flushes the file writer.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level)?;

    let console_layer = if config.json_format {
        fmt::layer()
            .json()
            .with_timer(LocalTimeFormatter)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_timer(LocalTimeFormatter)
            .with_target(false)
            .boxed()
    };

    let mut guard = None;
    let file_layer = if config.file_output {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let (writer, file_guard) = non_blocking(rolling::daily(log_dir, &config.file_prefix));
        guard = Some(file_guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_timer(LocalTimeFormatter)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        )
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    tracing::info!(level = %config.level, log_dir = %log_dir.display(), file = config.file_output, "📝 logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_level() {
        // RUST_LOG replaces the configured filter entirely
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(build_filter("info,=[").is_err());
        }
    }

    #[test]
    fn quiets_http_internals_below_trace() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = build_filter("debug").unwrap().to_string();
            assert!(filter.contains("reqwest=warn"));
            let trace = build_filter("trace").unwrap().to_string();
            assert!(!trace.contains("reqwest=warn"));
        }
    }
}
