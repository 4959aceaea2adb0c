//! Bounded pool of serializers
//!
//! Borrowers wait on a semaphore while every serializer is out. The guard
//! hands its serializer back on drop, so early returns and `?` never leak a
//! slot.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use super::serializer::TicketSerializer;
use super::table::TypeTable;
use crate::error::CodecError;

pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// Fixed-capacity pool of [`TicketSerializer`]s sharing one table
pub struct SerializerPool {
    table: Arc<TypeTable>,
    idle: Mutex<Vec<TicketSerializer>>,
    permits: Semaphore,
    capacity: usize,
    borrow_timeout: Option<Duration>,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    created: AtomicUsize,
}

impl SerializerPool {
    pub fn new(table: TypeTable, capacity: usize) -> Self {
        Self::with_timeout(table, capacity, None)
    }

    /// Pool whose [`borrow`](Self::borrow) gives up after `borrow_timeout`
    pub fn with_timeout(table: TypeTable, capacity: usize, borrow_timeout: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        debug!(
            "Creating serializer pool, capacity {}, table {}",
            capacity,
            table.fingerprint_hex()
        );
        Self {
            table: Arc::new(table),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            permits: Semaphore::new(capacity),
            capacity,
            borrow_timeout,
            in_use: AtomicUsize::new(0),
            peak_in_use: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
        }
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serializers currently borrowed
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Highest number of serializers ever borrowed at once
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use.load(Ordering::Acquire)
    }

    /// Serializers created so far, never more than the capacity
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a serializer, bounded by the pool's borrow timeout if it has one
    pub async fn borrow(&self) -> Result<PooledSerializer<'_>, CodecError> {
        match self.borrow_timeout {
            Some(timeout) => self.borrow_timeout(timeout).await,
            None => {
                let permit = self.permits.acquire().await.map_err(|_| CodecError::PoolClosed)?;
                Ok(self.checkout(permit))
            }
        }
    }

    pub async fn borrow_timeout(&self, timeout: Duration) -> Result<PooledSerializer<'_>, CodecError> {
        match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(self.checkout(permit)),
            Ok(Err(_)) => Err(CodecError::PoolClosed),
            Err(_) => {
                warn!(
                    "No serializer became available within {:?}, {} of {} in use",
                    timeout,
                    self.in_use(),
                    self.capacity
                );
                Err(CodecError::PoolExhausted(timeout))
            }
        }
    }

    /// Borrow without waiting
    pub fn try_borrow(&self) -> Option<PooledSerializer<'_>> {
        self.permits.try_acquire().ok().map(|permit| self.checkout(permit))
    }

    fn checkout<'a>(&'a self, permit: SemaphorePermit<'a>) -> PooledSerializer<'a> {
        let serializer = self.idle.lock().pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::AcqRel);
            TicketSerializer::new(Arc::clone(&self.table))
        });

        let in_use = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_use.fetch_max(in_use, Ordering::AcqRel);

        PooledSerializer {
            pool: self,
            serializer: Some(serializer),
            _permit: permit,
        }
    }

    fn release(&self, serializer: TicketSerializer) {
        self.idle.lock().push(serializer);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for SerializerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerPool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .field("peak_in_use", &self.peak_in_use())
            .field("created", &self.created())
            .finish()
    }
}

impl Default for SerializerPool {
    fn default() -> Self {
        SerializerPool::new(TypeTable::default(), DEFAULT_POOL_CAPACITY)
    }
}

/// Borrowed serializer, returned to its pool on drop
pub struct PooledSerializer<'a> {
    pool: &'a SerializerPool,
    serializer: Option<TicketSerializer>,
    // Dropped after `drop` has put the serializer back
    _permit: SemaphorePermit<'a>,
}

impl Deref for PooledSerializer<'_> {
    type Target = TicketSerializer;

    fn deref(&self) -> &Self::Target {
        match &self.serializer {
            Some(serializer) => serializer,
            None => unreachable!("serializer is only taken on drop"),
        }
    }
}

impl DerefMut for PooledSerializer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.serializer {
            Some(serializer) => serializer,
            None => unreachable!("serializer is only taken on drop"),
        }
    }
}

impl Drop for PooledSerializer<'_> {
    fn drop(&mut self) {
        if let Some(serializer) = self.serializer.take() {
            self.pool.release(serializer);
        }
    }
}

impl fmt::Debug for PooledSerializer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSerializer").finish_non_exhaustive()
    }
}
