//! Per-ticket mutation locks

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutex per ticket id. Read-modify-write sequences on one ticket hold
/// its lock so concurrent mutations of the same ticket serialize.
#[derive(Debug, Default)]
pub struct TicketLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TicketLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock of `id`
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock of a ticket that no longer exists, normally while still
    /// holding its guard. An entry other tasks are waiting on stays, so the
    /// next holder is still serialized against the current one; the last
    /// waiter to find the ticket gone drops it.
    pub fn release(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Drop every lock nobody is holding or waiting on
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_serializes() {
        let locks = Arc::new(TicketLocks::new());
        let guard = locks.acquire("TGT-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("TGT-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let _other = locks.acquire("TGT-2").await;
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_keeps_contended_locks() {
        let locks = Arc::new(TicketLocks::new());
        let guard = locks.acquire("TGT-1").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.acquire("TGT-1").await;
                locks.release("TGT-1");
                drop(guard);
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release("TGT-1");
        assert_eq!(locks.len(), 1);

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());

        drop(locks.acquire("ST-1").await);
        locks.release("ST-1");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = TicketLocks::new();
        let _held = locks.acquire("ST-1").await;
        drop(locks.acquire("ST-2").await);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
    }
}
