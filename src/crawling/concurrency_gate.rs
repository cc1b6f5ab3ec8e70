//! Counting-permit gate bounding in-flight network calls across every
//! company worker.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// A held slot. Dropping it releases the permit.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Explicit release, equivalent to dropping the permit
    pub fn release(self) {}
}

impl ConcurrencyGate {
    /// Gate allowing `limit` concurrent holders. A zero limit is raised to 1
    /// so acquisition can never deadlock.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Waits until a permit is free. Only suspends the calling task.
    pub async fn acquire(&self) -> GatePermit {
        // The semaphore is owned by the gate and never closed.
        let permit = loop {
            if let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await {
                break permit;
            }
        };
        debug!(in_flight = self.in_flight(), limit = self.limit, "🎫 gate permit acquired");
        GatePermit { _permit: permit }
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(10)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_limit(#[case] limit: usize) {
        let gate = ConcurrencyGate::new(limit);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let gate = gate.clone();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let permit = gate.acquire().await;
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    permit.release();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= limit);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn zero_limit_still_admits_one() {
        let gate = ConcurrencyGate::new(0);
        let permit = gate.acquire().await;
        assert_eq!(gate.limit(), 1);
        assert_eq!(gate.in_flight(), 1);
        drop(permit);
        assert_eq!(gate.in_flight(), 0);
    }
}
