//! Registry backed by an external byte store
//!
//! Every read decodes a fresh copy from the store, so tickets are never
//! shared between callers or nodes. With a cipher configured, frames are
//! encrypted before they are written and decrypted before they are decoded. Failures of the store or of the codec
//! are logged and reported as a missing ticket or a no-op; they never reach
//! the caller as errors.

use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha512};
use tracing::{debug, error, warn};

use super::store::TicketStore;
use super::{TicketLocks, TicketRegistry};
use crate::codec::{SerializerPool, TicketCipher};
use crate::ticket::Ticket;

/// [`TicketRegistry`] storing framed tickets in a [`TicketStore`]
pub struct DistributedTicketRegistry<S: TicketStore> {
    store: S,
    pool: SerializerPool,
    hash_ticket_ids: bool,
    cipher: Option<TicketCipher>,
    locks: TicketLocks,
}

impl<S: TicketStore> DistributedTicketRegistry<S> {
    pub fn new(store: S, pool: SerializerPool) -> Self {
        Self {
            store,
            pool,
            hash_ticket_ids: false,
            cipher: None,
            locks: TicketLocks::new(),
        }
    }

    /// Key store entries by the SHA-512 digest of the ticket id instead of the id
    pub fn with_hashed_ids(mut self, hash_ticket_ids: bool) -> Self {
        self.hash_ticket_ids = hash_ticket_ids;
        self
    }

    /// Encrypt stored frames. Every node sharing the store needs the same key.
    pub fn with_cipher(mut self, cipher: Option<TicketCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pool(&self) -> &SerializerPool {
        &self.pool
    }

    /// Key a ticket id is stored under
    pub fn store_key(&self, id: &str) -> String {
        if self.hash_ticket_ids {
            hex::encode(Sha512::digest(id.as_bytes()))
        } else {
            id.to_string()
        }
    }

    async fn encode(&self, ticket: &Ticket) -> Option<Vec<u8>> {
        let mut serializer = match self.pool.borrow().await {
            Ok(serializer) => serializer,
            Err(e) => {
                error!("No serializer available to encode [{}]: {}", ticket.id(), e);
                return None;
            }
        };
        let sealed = serializer.encode_ticket(ticket).and_then(|frame| match &self.cipher {
            Some(cipher) => cipher.encrypt(&frame),
            None => Ok(frame),
        });
        match sealed {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Failed to encode ticket [{}]: {}", ticket.id(), e);
                None
            }
        }
    }

    async fn decode_all(&self, frames: Vec<Vec<u8>>) -> Vec<Ticket> {
        let serializer = match self.pool.borrow().await {
            Ok(serializer) => serializer,
            Err(e) => {
                error!("No serializer available to decode tickets: {}", e);
                return Vec::new();
            }
        };
        frames
            .iter()
            .filter_map(|value| {
                let decoded = match &self.cipher {
                    Some(cipher) => cipher.decrypt(value).and_then(|frame| serializer.decode_ticket(&frame)),
                    None => serializer.decode_ticket(value),
                };
                match decoded {
                    Ok(ticket) => Some(ticket),
                    Err(e) => {
                        warn!("Skipping undecodable store entry: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    async fn write(&self, ticket: Ticket) {
        let Some(bytes) = self.encode(&ticket).await else {
            return;
        };
        let ttl = ticket.expiration_policy().time_to_live();
        if let Err(e) = self.store.put(&self.store_key(ticket.id()), bytes, ttl).await {
            error!("Failed to write ticket [{}] to the store: {}", ticket.id(), e);
        }
    }
}

impl<S: TicketStore> fmt::Debug for DistributedTicketRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedTicketRegistry")
            .field("pool", &self.pool)
            .field("hash_ticket_ids", &self.hash_ticket_ids)
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: TicketStore> TicketRegistry for DistributedTicketRegistry<S> {
    async fn add_ticket(&self, ticket: Ticket) {
        debug!("Adding ticket [{}] to the store", ticket.id());
        self.write(ticket).await;
    }

    async fn get_ticket(&self, id: &str) -> Option<Ticket> {
        if id.trim().is_empty() {
            return None;
        }

        let frame = match self.store.get(&self.store_key(id)).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!("Unable to read ticket [{}] from the store: {}", id, e);
                return None;
            }
        };

        let ticket = self.decode_all(vec![frame]).await.into_iter().next()?;
        if ticket.id() != id {
            warn!("Store entry for [{}] holds ticket [{}]", id, ticket.id());
            return None;
        }
        Some(ticket)
    }

    async fn update_ticket(&self, ticket: Ticket) {
        debug!("Updating ticket [{}] in the store", ticket.id());
        self.write(ticket).await;
    }

    async fn delete_single_ticket(&self, id: &str) -> bool {
        match self.store.delete(&self.store_key(id)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!("Failed to delete ticket [{}] from the store: {}", id, e);
                false
            }
        }
    }

    async fn get_tickets(&self) -> Vec<Ticket> {
        match self.store.values().await {
            Ok(frames) => self.decode_all(frames).await,
            Err(e) => {
                warn!("Unable to list tickets in the store: {}", e);
                Vec::new()
            }
        }
    }

    fn ticket_locks(&self) -> &TicketLocks {
        &self.locks
    }

    /// Entries in the store, decodable here or not. Entries written by a node
    /// with another type table or key are still live tickets somewhere, so
    /// they count even though `get_tickets` skips them.
    async fn size(&self) -> u64 {
        match self.store.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!("Unable to count tickets in the store: {}", e);
                0
            }
        }
    }
}
