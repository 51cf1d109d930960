use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;

/// Counting limiter with a fixed number of transcode slots.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct LimiterSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<LimiterSlot, LimiterClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;
        Ok(LimiterSlot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Fail every pending and future `acquire`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                let current = current.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _slot = limiter.acquire().await.unwrap();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 1);

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(slot);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let limiter = ConcurrencyLimiter::new(1);
        let _slot = limiter.acquire().await.unwrap();
        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        limiter.close();
        assert!(waiter.await.unwrap().is_err());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
