//! Failure taxonomy for page fetches

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a failed request should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// DNS, connect, timeout, 5xx. Retried with backoff.
    TransientNetwork,
    /// 429 / 503. Retried with a longer backoff.
    RateLimited,
    /// Session cookies no longer accepted. Run-wide, never retried locally.
    AuthExpired,
    /// Malformed request, missing company, unexpected schema.
    Permanent,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TransientNetwork => "transient-network",
            Self::RateLimited => "rate-limited",
            Self::AuthExpired => "auth-expired",
            Self::Permanent => "permanent",
        };
        f.write_str(label)
    }
}

/// A classified page-fetch failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class}: {message}")]
pub struct FetchFailure {
    pub class: FailureClass,
    pub message: String,
    /// Server supplied `Retry-After`, if any
    pub retry_after: Option<Duration>,
}

impl FetchFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::TransientNetwork, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureClass::RateLimited, message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(FailureClass::AuthExpired, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Permanent, message)
    }

    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}
