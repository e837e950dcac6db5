//
// project/mutex.rs
//
// Single-slot mutex with a bounded waiting queue
//

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ProjectError;

/// A mutex that admits one holder and at most `max_queue` waiters.
///
/// Requests that arrive while the holder is running and the queue is full are
/// rejected with [`ProjectError::QueueFull`] instead of stacking up. Callers
/// treat the rejection as "the pending run will cover this" and return.
#[derive(Debug)]
pub struct QueueMutex {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    max_queue: usize,
}

/// Held while the protected work runs. Dropping it releases the slot.
#[derive(Debug)]
pub struct QueueGuard {
    _permit: OwnedSemaphorePermit,
    _reservation: Reservation,
}

/// Counts one running-or-waiting request; released on drop so a waiter that
/// is cancelled mid-`await` does not leak its slot.
#[derive(Debug)]
struct Reservation {
    pending: Arc<AtomicUsize>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl QueueMutex {
    pub fn new(name: &'static str, max_queue: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(1)),
            pending: Arc::new(AtomicUsize::new(0)),
            max_queue,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of requests currently running or waiting.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.pending() > 0
    }

    /// Wait for the slot, or fail immediately when the queue is full.
    pub async fn acquire(&self) -> Result<QueueGuard, ProjectError> {
        let previous = self.pending.fetch_add(1, Ordering::SeqCst);
        let reservation = Reservation {
            pending: self.pending.clone(),
        };
        if previous > self.max_queue {
            log::trace!(
                "{} rejected a request ({} already running or queued)",
                self.name,
                previous
            );
            return Err(ProjectError::QueueFull {
                name: self.name,
                pending: previous,
            });
        }

        // The semaphore is never closed, so acquisition only fails if that
        // invariant is broken; report it as a full queue rather than panic.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProjectError::QueueFull {
                name: self.name,
                pending: previous,
            })?;

        Ok(QueueGuard {
            _permit: permit,
            _reservation: reservation,
        })
    }
}

/// One [`QueueMutex`] per key, created on first use.
///
/// Used for per-file work where requests for *different* files must not
/// block each other but duplicate requests for the same file collapse.
#[derive(Debug)]
pub struct KeyedQueueMutex<K: Eq + Hash> {
    name: &'static str,
    max_queue: usize,
    slots: DashMap<K, Arc<QueueMutex>>,
}

impl<K: Eq + Hash + Clone> KeyedQueueMutex<K> {
    pub fn new(name: &'static str, max_queue: usize) -> Self {
        Self {
            name,
            max_queue,
            slots: DashMap::new(),
        }
    }

    pub async fn acquire(&self, key: &K) -> Result<QueueGuard, ProjectError> {
        // Clone the Arc out so no DashMap shard lock is held across the await.
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(QueueMutex::new(self.name, self.max_queue)))
            .clone();
        slot.acquire().await
    }

    /// Drop idle slots. Slots with running or waiting requests are kept.
    pub fn prune(&self) {
        self.slots.retain(|_, slot| slot.is_busy());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uncontended_acquire() {
        let mutex = QueueMutex::new("test", 1);
        let guard = mutex.acquire().await.unwrap();
        assert_eq!(mutex.pending(), 1);
        drop(guard);
        assert_eq!(mutex.pending(), 0);
        assert!(!mutex.is_busy());
    }

    #[tokio::test]
    async fn test_zero_queue_rejects_while_held() {
        let mutex = QueueMutex::new("root", 0);
        let _guard = mutex.acquire().await.unwrap();
        let err = mutex.acquire().await.unwrap_err();
        assert_eq!(
            err,
            ProjectError::QueueFull {
                name: "root",
                pending: 1
            }
        );
        // The rejected request must not leave a reservation behind
        assert_eq!(mutex.pending(), 1);
    }

    #[tokio::test]
    async fn test_one_waiter_then_reject() {
        let mutex = Arc::new(QueueMutex::new("fls", 1));
        let guard = mutex.acquire().await.unwrap();

        let waiter = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                let _g = mutex.acquire().await.unwrap();
            })
        };

        // Let the waiter register itself
        while mutex.pending() < 2 {
            tokio::task::yield_now().await;
        }

        assert!(mutex.acquire().await.is_err());
        drop(guard);
        waiter.await.unwrap();
        assert_eq!(mutex.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_slot() {
        let mutex = Arc::new(QueueMutex::new("completion", 1));
        let guard = mutex.acquire().await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(10), mutex.acquire()).await;
        assert!(result.is_err(), "waiter should time out while the slot is held");
        assert_eq!(mutex.pending(), 1);

        drop(guard);
        assert!(mutex.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_keyed_mutex_isolates_keys() {
        let keyed: KeyedQueueMutex<String> = KeyedQueueMutex::new("content", 0);
        let _a = keyed.acquire(&"a.tex".to_string()).await.unwrap();
        // A different key is independent
        let _b = keyed.acquire(&"b.tex".to_string()).await.unwrap();
        // The same key is busy
        assert!(keyed.acquire(&"a.tex".to_string()).await.is_err());
        assert_eq!(keyed.len(), 2);
    }

    #[tokio::test]
    async fn test_keyed_mutex_prune_keeps_busy_slots() {
        let keyed: KeyedQueueMutex<u32> = KeyedQueueMutex::new("content", 1);
        let held = keyed.acquire(&1).await.unwrap();
        drop(keyed.acquire(&2).await.unwrap());
        keyed.prune();
        assert_eq!(keyed.len(), 1);
        drop(held);
        keyed.prune();
        assert!(keyed.is_empty());
    }
}
