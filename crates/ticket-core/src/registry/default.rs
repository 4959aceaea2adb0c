//! In-memory registry for a single node

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{TicketLocks, TicketRegistry};
use crate::ticket::Ticket;

/// Registry keeping tickets in a concurrent map
#[derive(Debug, Default)]
pub struct DefaultTicketRegistry {
    tickets: DashMap<String, Ticket>,
    locks: TicketLocks,
}

impl DefaultTicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tickets: DashMap::with_capacity(capacity),
            locks: TicketLocks::new(),
        }
    }
}

#[async_trait]
impl TicketRegistry for DefaultTicketRegistry {
    async fn add_ticket(&self, ticket: Ticket) {
        debug!("Added ticket [{}] to registry", ticket.id());
        self.tickets.insert(ticket.id().to_string(), ticket);
    }

    async fn get_ticket(&self, id: &str) -> Option<Ticket> {
        if id.trim().is_empty() {
            return None;
        }
        self.tickets.get(id).map(|entry| entry.value().clone())
    }

    async fn update_ticket(&self, ticket: Ticket) {
        self.tickets.insert(ticket.id().to_string(), ticket);
    }

    async fn delete_single_ticket(&self, id: &str) -> bool {
        self.tickets.remove(id).is_some()
    }

    async fn get_tickets(&self) -> Vec<Ticket> {
        self.tickets.iter().map(|entry| entry.value().clone()).collect()
    }

    fn ticket_locks(&self) -> &TicketLocks {
        &self.locks
    }

    async fn size(&self) -> u64 {
        self.tickets.len() as u64
    }
}
