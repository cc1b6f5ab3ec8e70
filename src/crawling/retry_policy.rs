//! Retry policy - exponential backoff per failure class
//!
//! `delay = min(base(class) * multiplier^(attempt - 1), max_delay)` plus a
//! uniform jitter of up to `jitter_ratio * delay`. Rate-limited failures start
//! from a longer base than transient network errors; expired credentials and
//! permanent failures are never retried here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::failure::FailureClass;
use crate::infrastructure::config::{RetryConfig, defaults};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Abandon,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed per page request, first try included
    pub max_attempts: u32,
    pub transient_base: Duration,
    pub rate_limited_base: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            transient_base: Duration::from_millis(defaults::TRANSIENT_BASE_DELAY_MS),
            rate_limited_base: Duration::from_millis(defaults::RATE_LIMITED_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::MAX_BACKOFF_MS),
            multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter_ratio: defaults::JITTER_RATIO,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            transient_base: Duration::from_millis(config.transient_base_delay_ms),
            rate_limited_base: Duration::from_millis(config.rate_limited_base_delay_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, handy where delays must be predictable
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ratio = 0.0;
        self
    }

    /// Decide what to do after `attempt` (1-based) failed with `class`
    #[must_use]
    pub fn decide(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        self.decide_with_hint(attempt, class, None)
    }

    /// Like [`decide`](Self::decide), honouring a server `Retry-After` hint for
    /// rate-limited responses. The hint never pushes past `max_delay`.
    #[must_use]
    pub fn decide_with_hint(
        &self,
        attempt: u32,
        class: FailureClass,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Abandon;
        }

        match class {
            FailureClass::AuthExpired | FailureClass::Permanent => RetryDecision::Abandon,
            FailureClass::TransientNetwork => RetryDecision::RetryAfter(self.jittered(self.backoff(attempt, class))),
            FailureClass::RateLimited => {
                let mut delay = self.backoff(attempt, class);
                if let Some(hint) = retry_after {
                    delay = delay.max(hint.min(self.max_delay));
                }
                RetryDecision::RetryAfter(self.jittered(delay))
            }
        }
    }

    /// Deterministic part of the delay for `attempt`, before jitter
    #[must_use]
    pub fn backoff(&self, attempt: u32, class: FailureClass) -> Duration {
        let base = match class {
            FailureClass::RateLimited => self.rate_limited_base,
            _ => self.transient_base,
        };
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        delay + delay.mul_f64(self.jitter_ratio * fastrand::f64())
    }
}
