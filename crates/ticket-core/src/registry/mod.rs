//! Ticket registries
//!
//! A registry is the arena every ticket lives in. Implementations only supply
//! single-ticket storage primitives; cascading deletes, typed lookups, counts
//! and the write-through mutations are provided on top of them so every
//! backend behaves the same.
//!
//! Tickets handed out by a registry are copies. Changing one has no effect
//! until it is written back with [`TicketRegistry::update_ticket`], which is
//! what the mutating operations here do before they return.

pub mod default;
pub mod distributed;
pub mod locks;
pub mod store;

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;
use crate::ticket::{
    Authentication, Service, ServiceTicket, Ticket, TicketGrantingTicket, TicketKind, TicketSnapshot,
    MAX_CHAIN_DEPTH,
};

pub use default::DefaultTicketRegistry;
pub use distributed::DistributedTicketRegistry;
pub use locks::TicketLocks;
pub use store::{InMemoryTicketStore, TicketStore};

/// Storage of tickets keyed by id
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Store a ticket, replacing any ticket with the same id
    async fn add_ticket(&self, ticket: Ticket);

    /// Ticket by id. `None` when missing, when `id` is empty, or when the
    /// backend could not produce it.
    async fn get_ticket(&self, id: &str) -> Option<Ticket>;

    /// Write back a changed ticket
    async fn update_ticket(&self, ticket: Ticket);

    /// Remove one ticket without touching the tickets chained to it
    async fn delete_single_ticket(&self, id: &str) -> bool;

    /// Point-in-time copy of every ticket
    async fn get_tickets(&self) -> Vec<Ticket>;

    fn ticket_locks(&self) -> &TicketLocks;

    /// Ticket by id, failing when the stored ticket cannot stand in for
    /// `expected`. The registry is left untouched either way.
    async fn get_ticket_of_kind(&self, id: &str, expected: TicketKind) -> Result<Option<Ticket>, TicketError> {
        match self.get_ticket(id).await {
            Some(ticket) => {
                ticket.ensure_kind(expected)?;
                Ok(Some(ticket))
            }
            None => Ok(None),
        }
    }

    /// Remove a ticket and, for granting tickets, everything granted from it.
    /// Returns how many tickets were removed.
    async fn delete_ticket(&self, id: &str) -> u64 {
        self.remove_ticket_tree(id).await.len() as u64
    }

    /// Remove a ticket and its descendants, returning the removed ids.
    ///
    /// The ticket's lock is held for the whole removal, and so is the lock of
    /// every granting ticket below it, taken before its children are read.
    /// A grant that is already running on one of them finishes first and its
    /// new ticket is part of the tree. Descendants go before the ticket
    /// itself.
    async fn remove_ticket_tree(&self, id: &str) -> Vec<String> {
        if id.trim().is_empty() {
            return Vec::new();
        }
        let mut guards = vec![self.ticket_locks().acquire(id).await];
        let Some(root) = self.get_ticket(id).await else {
            trace!("Ticket [{}] is not in the registry, nothing to delete", id);
            self.ticket_locks().release(id);
            return Vec::new();
        };

        let mut seen = HashSet::new();
        seen.insert(root.id().to_string());
        let mut tree = Vec::new();
        let mut pending = VecDeque::from([root]);

        while let Some(ticket) = pending.pop_front() {
            if ticket.kind().is_granting() {
                for child_id in ticket.child_ids() {
                    if !seen.insert(child_id.clone()) {
                        continue;
                    }
                    let child = match self.get_ticket(&child_id).await {
                        Some(child) if child.kind().is_granting() => {
                            guards.push(self.ticket_locks().acquire(&child_id).await);
                            self.get_ticket(&child_id).await
                        }
                        other => other,
                    };
                    match child {
                        Some(child) => pending.push_back(child),
                        None => tree.push(child_id),
                    }
                }
            }
            tree.push(ticket.id().to_string());
        }

        let mut removed = Vec::with_capacity(tree.len());
        for ticket_id in tree.iter().rev() {
            if self.delete_single_ticket(ticket_id).await {
                trace!("Removed ticket [{}]", ticket_id);
                self.ticket_locks().release(ticket_id);
                removed.push(ticket_id.clone());
            }
        }
        drop(guards);

        debug!("Deleted [{}] and {} chained tickets", id, removed.len().saturating_sub(1));
        removed
    }

    /// Entries held by the backing storage. Distributed registries count
    /// store entries, including ones this node cannot decode, so the result
    /// can exceed `get_tickets().len()`.
    async fn size(&self) -> u64 {
        self.get_tickets().await.len() as u64
    }

    /// Ticket-granting and proxy-granting tickets currently held
    async fn session_count(&self) -> u64 {
        self.get_tickets()
            .await
            .iter()
            .filter(|ticket| ticket.kind().is_granting())
            .count() as u64
    }

    /// Service and proxy tickets currently held
    async fn service_ticket_count(&self) -> u64 {
        self.get_tickets()
            .await
            .iter()
            .filter(|ticket| ticket.kind().is_assignable_to(TicketKind::ServiceTicket))
            .count() as u64
    }

    /// Chain of tickets `ticket` descends from, loaded one parent at a time.
    /// Stops at the first missing parent, which then reads as expired when the
    /// chain is checked.
    async fn load_ancestors(&self, ticket: &Ticket) -> TicketSnapshot {
        let mut chain = TicketSnapshot::new();
        let mut next = ticket.parent_id().map(str::to_string);

        while let Some(parent_id) = next.take() {
            if chain.len() >= MAX_CHAIN_DEPTH || parent_id == ticket.id() || chain.contains(&parent_id) {
                warn!("Ticket chain of [{}] loops or is too deep", ticket.id());
                break;
            }
            match self.get_ticket(&parent_id).await {
                Some(parent) => {
                    next = parent.parent_id().map(str::to_string);
                    chain.insert(parent);
                }
                None => break,
            }
        }
        chain
    }

    /// Expiry of `ticket` including its ancestors. A parent that can no longer
    /// be found, evicted by the store or already removed, expires the ticket.
    async fn is_ticket_expired(&self, ticket: &Ticket) -> bool {
        let ancestors = self.load_ancestors(ticket).await;
        ticket.is_expired(&ancestors)
    }

    /// Issue a service ticket from the granting ticket `granting_ticket_id`
    /// and persist both the new ticket and the changed granting ticket.
    async fn grant_service_ticket(
        &self,
        granting_ticket_id: &str,
        service_ticket_id: &str,
        service: Service,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        only_track_most_recent_session: bool,
    ) -> Result<ServiceTicket, TicketError> {
        let _guard = self.ticket_locks().acquire(granting_ticket_id).await;

        let ticket = self
            .get_ticket_of_kind(granting_ticket_id, TicketKind::TicketGrantingTicket)
            .await?
            .ok_or_else(|| not_found(self.ticket_locks(), granting_ticket_id))?;
        if self.is_ticket_expired(&ticket).await {
            return Err(TicketError::Expired(granting_ticket_id.to_string()));
        }

        let mut granting_ticket = TicketGrantingTicket::try_from(ticket)?;
        let service_ticket = granting_ticket.grant_service_ticket(
            service_ticket_id,
            service,
            expiration_policy,
            credentials_provided,
            only_track_most_recent_session,
        )?;

        self.add_ticket(Ticket::from(service_ticket.clone())).await;
        self.update_ticket(Ticket::from(granting_ticket)).await;
        Ok(service_ticket)
    }

    /// Issue the proxy-granting ticket of a validated service ticket, then
    /// persist the service ticket, the new proxy-granting ticket and the
    /// session it is tracked on.
    async fn grant_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        proxy_granting_ticket_id: &str,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
    ) -> Result<TicketGrantingTicket, TicketError> {
        let _guard = self.ticket_locks().acquire(service_ticket_id).await;

        let ticket = self
            .get_ticket_of_kind(service_ticket_id, TicketKind::ServiceTicket)
            .await?
            .ok_or_else(|| not_found(self.ticket_locks(), service_ticket_id))?;
        if self.is_ticket_expired(&ticket).await {
            return Err(TicketError::Expired(service_ticket_id.to_string()));
        }
        let mut service_ticket = ServiceTicket::try_from(ticket)?;

        let parent_id = service_ticket.ticket_granting_ticket_id().to_string();
        let _parent_guard = self.ticket_locks().acquire(&parent_id).await;
        let mut parent = self
            .get_ticket_of_kind(&parent_id, TicketKind::TicketGrantingTicket)
            .await?
            .map(TicketGrantingTicket::try_from)
            .transpose()?
            .ok_or_else(|| not_found(self.ticket_locks(), &parent_id))?;

        let proxy_granting_ticket = service_ticket.grant_proxy_granting_ticket(
            proxy_granting_ticket_id,
            authentication,
            expiration_policy,
        )?;
        parent.register_proxy_granting_ticket(proxy_granting_ticket.id(), service_ticket.service().clone());

        self.update_ticket(Ticket::from(service_ticket)).await;
        self.add_ticket(Ticket::from(proxy_granting_ticket.clone())).await;
        self.update_ticket(Ticket::from(parent)).await;
        Ok(proxy_granting_ticket)
    }

    /// Flag a ticket as expired and persist the flag. Descendants are not
    /// written; they observe the expiry through their chain.
    async fn mark_ticket_expired(&self, id: &str) -> Result<(), TicketError> {
        let _guard = self.ticket_locks().acquire(id).await;
        let mut ticket = self
            .get_ticket(id)
            .await
            .ok_or_else(|| not_found(self.ticket_locks(), id))?;
        ticket.mark_ticket_expired();
        self.update_ticket(ticket).await;
        info!("Marked ticket [{}] as expired", id);
        Ok(())
    }

    /// Validate a service or proxy ticket for `service`.
    ///
    /// The use is recorded whether or not the service matches. A ticket that
    /// is expired, or has used up its policy with this attempt, is removed;
    /// otherwise the recorded use is written back.
    async fn validate_service_ticket(&self, id: &str, service: &Service) -> Result<ServiceTicket, TicketError> {
        let _guard = self.ticket_locks().acquire(id).await;

        let ticket = self
            .get_ticket_of_kind(id, TicketKind::ServiceTicket)
            .await?
            .ok_or_else(|| not_found(self.ticket_locks(), id))?;
        if self.is_ticket_expired(&ticket).await {
            info!("Service ticket [{}] has expired", id);
            self.delete_single_ticket(id).await;
            self.ticket_locks().release(id);
            return Err(TicketError::Expired(id.to_string()));
        }

        let mut service_ticket = ServiceTicket::try_from(ticket)?;
        let validation = service_ticket.validate_for(service);

        if service_ticket.is_expired_locally() {
            debug!("Service ticket [{}] has no uses left, removing it", id);
            self.delete_single_ticket(id).await;
            self.ticket_locks().release(id);
        } else {
            self.update_ticket(Ticket::from(service_ticket.clone())).await;
        }

        match validation {
            Ok(()) => Ok(service_ticket),
            Err(e) => {
                warn!("Service ticket [{}] presented for the wrong service: {}", id, e);
                Err(e)
            }
        }
    }
}

/// Not-found error for a ticket whose lock the caller holds. The lock entry
/// goes with it so lookups of unknown ids leave nothing behind.
fn not_found(locks: &TicketLocks, id: &str) -> TicketError {
    locks.release(id);
    TicketError::NotFound(id.to_string())
}
