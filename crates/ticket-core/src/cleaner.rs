//! Removal of expired tickets
//!
//! A sweep takes one snapshot of the registry, decides expiry for every
//! ticket against that snapshot, and removes each expired ticket together
//! with everything chained below it. Sweeps never overlap: a sweep that
//! starts while another is running returns immediately with nothing removed.
//! Each sweep ends by dropping ticket locks nobody holds.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CleanerConfig;
use crate::registry::TicketRegistry;
use crate::ticket::{Ticket, TicketGrantingTicket, TicketSnapshot};

/// Notified of every expired ticket-granting ticket before it is removed
#[async_trait]
pub trait LogoutManager: Send + Sync {
    async fn perform_logout(&self, ticket: &TicketGrantingTicket);
}

/// Sweeps expired tickets out of a registry
pub struct RegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    logout_manager: Option<Arc<dyn LogoutManager>>,
    running: Mutex<()>,
}

impl RegistryCleaner {
    pub fn new(registry: Arc<dyn TicketRegistry>) -> Self {
        Self {
            registry,
            logout_manager: None,
            running: Mutex::new(()),
        }
    }

    pub fn with_logout_manager(mut self, logout_manager: Arc<dyn LogoutManager>) -> Self {
        self.logout_manager = Some(logout_manager);
        self
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    /// Remove every expired ticket and return the tickets removed, including
    /// the ones removed because an ancestor expired
    pub async fn clean(&self) -> Vec<Ticket> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Ticket registry cleaner is already running, skipping this run");
            return Vec::new();
        };

        let snapshot: TicketSnapshot = self.registry.get_tickets().await.into_iter().collect();
        let mut expired: Vec<&Ticket> = snapshot
            .tickets()
            .filter(|ticket| ticket.is_expired(&snapshot))
            .collect();
        // Granting tickets first so their logout runs before a cascade reaches them
        expired.sort_by_key(|ticket| !ticket.kind().is_granting());

        debug!("{} of {} tickets are expired", expired.len(), snapshot.len());

        let mut removed_ids = HashSet::new();
        for ticket in expired {
            if removed_ids.contains(ticket.id()) {
                continue;
            }
            if let (Some(logout_manager), Ticket::TicketGranting(granting_ticket)) = (&self.logout_manager, ticket) {
                logout_manager.perform_logout(granting_ticket).await;
            }
            let removed = self.registry.remove_ticket_tree(ticket.id()).await;
            if removed.is_empty() {
                warn!("Expired ticket [{}] could not be removed", ticket.id());
            }
            removed_ids.extend(removed);
        }

        let removed: Vec<Ticket> = removed_ids
            .iter()
            .filter_map(|id| snapshot.get(id).cloned())
            .collect();
        if !removed.is_empty() {
            info!("Removed {} expired tickets from the registry", removed.len());
        }

        let pruned = self.registry.ticket_locks().prune();
        if pruned > 0 {
            debug!("Pruned {} idle ticket locks", pruned);
        }
        removed
    }

    /// Run [`clean`](Self::clean) on the configured schedule until the
    /// returned handle is aborted. `None` when the cleaner is disabled.
    pub fn start(self: Arc<Self>, config: &CleanerConfig) -> Option<JoinHandle<()>> {
        if !config.enabled {
            info!("Ticket registry cleaner is disabled");
            return None;
        }

        let start_delay = config.start_delay();
        let repeat_interval = config.repeat_interval();
        info!(
            "Scheduling ticket registry cleaner, first run in {:?}, then every {:?}",
            start_delay, repeat_interval
        );

        Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + start_delay, repeat_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                self.clean().await;
            }
        }))
    }
}

impl std::fmt::Debug for RegistryCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCleaner")
            .field("logout_manager", &self.logout_manager.is_some())
            .finish_non_exhaustive()
    }
}
