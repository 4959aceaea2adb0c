//! # CAS Ticket Core
//!
//! Ticket lifecycle and ticket registry for a CAS single sign-on server.
//!
//! This crate provides:
//! - The ticket model: ticket-granting, proxy-granting, service and proxy
//!   tickets plus OAuth authorization codes
//! - Expiration policies evaluated against a ticket's usage
//! - The `TicketRegistry` contract with cascading deletes and write-through
//!   mutations, an in-memory registry and a store-backed distributed registry
//! - Framed bincode encoding through a bounded serializer pool, and a compact
//!   string encoding for OAuth codes, with optional AES-GCM encryption of
//!   the frames a distributed registry stores
//! - A cleaner that sweeps expired tickets on a schedule
//!
//! ## Architecture
//!
//! Tickets refer to each other by id. The registry is the arena: walking a
//! chain means looking ids up in the registry, or in a snapshot taken from it.
//! Tickets read from a registry are copies and only change the registry when
//! written back, which every mutating registry operation does before it returns.

pub mod cleaner;
pub mod codec;
pub mod config;
pub mod error;
pub mod expiration;
pub mod logging;
pub mod registry;
pub mod ticket;

use std::sync::Arc;

use tokio::task::JoinHandle;

pub use cleaner::{LogoutManager, RegistryCleaner};
pub use codec::{OAuthCodeCompactor, SerializerPool, TicketCipher, TicketCompactor, TypeTable};
pub use config::TicketsConfig;
pub use error::{Error, Result};
pub use expiration::{ExpirationPolicy, TicketUsage};
pub use registry::{DefaultTicketRegistry, DistributedTicketRegistry, TicketRegistry, TicketStore};
pub use ticket::{
    Authentication, DefaultUniqueTicketIdGenerator, OAuthCode, Service, ServiceTicket, Ticket,
    TicketGrantingTicket, TicketKind, UniqueTicketIdGenerator,
};

/// Build a store-backed registry and its cleaner from configuration, and
/// schedule the cleaner unless the configuration disables it. Must be called
/// from within a tokio runtime.
pub fn init_distributed<S: TicketStore + 'static>(
    config: &TicketsConfig,
    store: S,
) -> Result<(Arc<DistributedTicketRegistry<S>>, Arc<RegistryCleaner>, Option<JoinHandle<()>>)> {
    config.validate()?;
    logging::log_startup(config);

    let registry = Arc::new(
        DistributedTicketRegistry::new(store, config.pool.build())
            .with_hashed_ids(config.registry.hash_ticket_ids)
            .with_cipher(config.registry.cipher()?),
    );
    let cleaner = Arc::new(RegistryCleaner::new(registry.clone()));
    let cleaner_handle = cleaner.clone().start(&config.cleaner);

    Ok((registry, cleaner, cleaner_handle))
}
