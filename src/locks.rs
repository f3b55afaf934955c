//! Per-dataset-name serialization.
//!
//! Two ingestions of the same name would otherwise both observe "no existing
//! dataset" and race on the unique index. Ingestions of different names never
//! wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Debug, Clone, Default)]
pub struct NameLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Held for the duration of one ingestion's transaction. The registry entry
/// is dropped with the last guard or waiter for its name, including waiters
/// that were cancelled.
#[derive(Debug)]
pub struct NameGuard {
    name: String,
    registry: NameLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, name: &str) -> NameGuard {
        let lock = Arc::clone(self.map().entry(name.to_string()).or_default());

        let mut waiter = Waiter {
            registry: self,
            name,
            lock: Some(Arc::clone(&lock)),
        };
        let guard = lock.lock_owned().await;
        waiter.lock = None;

        NameGuard {
            name: name.to_string(),
            registry: self.clone(),
            guard: Some(guard),
        }
    }

    /// Number of names currently locked or waited on.
    pub fn active(&self) -> usize {
        self.map().len()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        // The map is only mutated through `entry`/`remove`, so a poisoned lock
        // still holds a consistent map.
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if_idle(map: &mut LockMap, name: &str) {
        if map
            .get(name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(name);
        }
    }
}

/// Registration of an `acquire` call still waiting for its lock. Dropped
/// while armed, the wait was cancelled and the entry is released.
struct Waiter<'a> {
    registry: &'a NameLocks,
    name: &'a str,
    lock: Option<Arc<AsyncMutex<()>>>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let mut map = self.registry.map();
            drop(lock);
            NameLocks::remove_if_idle(&mut map, self.name);
        }
    }
}

impl NameGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        let mut map = self.registry.map();
        drop(self.guard.take());
        NameLocks::remove_if_idle(&mut map, &self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_is_serialized() {
        let locks = NameLocks::new();
        let first = locks.acquire("a.csv").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("a.csv").await.name().to_string() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert_eq!(waiter.await.unwrap(), "a.csv");
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = NameLocks::new();
        let _a = locks.acquire("a.csv").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b.csv")).await;

        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_entry_after_holder() {
        // Given: A held name and a second acquire parked behind it
        let locks = NameLocks::new();
        let first = locks.acquire("a.csv").await;
        let mut waiter = Box::pin(locks.acquire("a.csv"));
        assert!(futures::poll!(&mut waiter).is_pending());

        // When: The holder releases and the waiter is dropped before it runs again
        drop(first);
        drop(waiter);

        // Then: No entry is left behind
        assert_eq!(locks.active(), 0);
        drop(locks.acquire("a.csv").await);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_keeps_entry_of_holder() {
        let locks = NameLocks::new();
        let first = locks.acquire("a.csv").await;
        let mut waiter = Box::pin(locks.acquire("a.csv"));
        assert!(futures::poll!(&mut waiter).is_pending());

        drop(waiter);
        assert_eq!(locks.active(), 1);

        drop(first);
        assert_eq!(locks.active(), 0);
    }
}
