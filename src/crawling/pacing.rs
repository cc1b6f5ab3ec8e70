//! Pacing delays that keep request timing human-like.
//!
//! Pacing is a policy knob, not a correctness mechanism: production uses
//! `RandomDelay`, tests inject `NoDelay` or `FixedDelay`.

use std::fmt::Debug;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub trait DelayGenerator: Send + Sync + Debug {
    fn next_delay(&self) -> Duration;
}

/// Uniformly random delay in `[min, max]`
#[derive(Debug, Clone, Copy)]
pub struct RandomDelay {
    min: Duration,
    max: Duration,
}

impl RandomDelay {
    /// Bounds are swapped if given inverted
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max { Self { min, max } } else { Self { min: max, max: min } }
    }

    #[must_use]
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }
}

impl DelayGenerator for RandomDelay {
    fn next_delay(&self) -> Duration {
        let span = (self.max - self.min).as_millis();
        let span = u64::try_from(span).unwrap_or(u64::MAX);
        self.min + Duration::from_millis(fastrand::u64(0..=span))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl DelayGenerator for FixedDelay {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayGenerator for NoDelay {
    fn next_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Sleeps for `delay` unless `cancel` fires first. Returns `false` when
/// the sleep was cut short by cancellation.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
