//! Byte stores behind the distributed registry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::error::StoreError;

/// Key/value store holding encoded tickets, typically shared by every node
/// of a cluster
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Store `value` under `key`; with a `ttl` the entry disappears on its own
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Whether an entry was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn values(&self) -> Result<Vec<Vec<u8>>, StoreError>;

    async fn len(&self) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T: TicketStore + ?Sized> TicketStore for Arc<T> {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        (**self).put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        (**self).values().await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        (**self).len().await
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local [`TicketStore`]
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose lifetime is over, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let purged = before - self.entries.len();
        if purged > 0 {
            trace!("Purged {} expired store entries", purged);
        }
        purged
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries.insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, entry)| entry.is_live(now)))
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .collect())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        Ok(self.entries.iter().filter(|entry| entry.is_live(now)).count() as u64)
    }
}
