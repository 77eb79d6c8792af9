//! Concurrency gate for batch fan-out
//!
//! Limits how many executions of one batch run at the same time. Permits are
//! released on drop, so a timed-out or failed execution frees its slot.
//! Closing the gate turns every queued waiter away.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Semaphore-backed bulkhead
#[derive(Clone)]
pub struct Bulkhead {
    name: String,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

/// Slot held while one execution runs
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    name: String,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!(bulkhead = %self.name, "Bulkhead permit released");
    }
}

impl Bulkhead {
    /// A gate admitting at least one and at most `max_concurrent` holders
    pub fn new(name: &str, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name: name.to_string(),
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        debug!(bulkhead = %self.name, "Bulkhead permit acquired");
        BulkheadPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
            name: self.name.clone(),
        }
    }

    /// Wait for a slot; `None` once the gate is closed
    pub async fn acquire(&self) -> Option<BulkheadPermit> {
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(self.permit(permit)),
            Err(_) => {
                debug!(bulkhead = %self.name, "Bulkhead closed, permit refused");
                None
            }
        }
    }

    /// Stop admitting new holders; pending waiters get `None`
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bulkhead_limits_concurrency() {
        let bulkhead = Bulkhead::new("test", 2);

        let first = bulkhead.acquire().await;
        let second = bulkhead.acquire().await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(bulkhead.in_flight(), 2);

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
        assert_eq!(bulkhead.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let bulkhead = Bulkhead::new("test", 0);
        assert_eq!(bulkhead.max_concurrent(), 1);
        assert!(bulkhead.acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_close_turns_away_queued_waiters() {
        let bulkhead = Bulkhead::new("test", 1);
        let held = bulkhead.acquire().await;
        assert!(held.is_some());

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        bulkhead.close();
        assert!(waiter.await.unwrap());
        assert!(bulkhead.acquire().await.is_none());

        // Holders keep their slot until they drop it
        assert_eq!(bulkhead.in_flight(), 1);
        drop(held);
        assert_eq!(bulkhead.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_holders_never_exceed_limit() {
        let bulkhead = Bulkhead::new("test", 3);
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let bulkhead = bulkhead.clone();
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                if let Some(_permit) = bulkhead.acquire().await {
                    peak.fetch_max(bulkhead.in_flight(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(bulkhead.in_flight(), 0);
    }
}
