//! Ticket-granting tickets and their proxy-granting variant

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{is_chain_expired_at, resolve_ancestors, Authentication, Service, ServiceTicket, TicketCatalog, TicketState};
use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;

/// Ticket representing an established single sign-on session.
///
/// A ticket-granting ticket with a parent is a proxy-granting ticket: it was
/// issued to `proxied_by` from a validated service ticket and chains back to
/// the session it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    state: TicketState,
    authentication: Authentication,
    parent_id: Option<String>,
    proxied_by: Option<Service>,
    /// Granted ticket id to normalized service
    services: BTreeMap<String, Service>,
    /// Proxy-granting ticket id to the service it was issued to
    proxy_granting_tickets: BTreeMap<String, Service>,
}

impl TicketGrantingTicket {
    /// Create a root ticket-granting ticket
    pub fn new(
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
    ) -> Result<Self, TicketError> {
        Ok(Self {
            state: TicketState::new(id, expiration_policy)?,
            authentication,
            parent_id: None,
            proxied_by: None,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
        })
    }

    pub(crate) fn new_proxy(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        proxied_by: Service,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
    ) -> Result<Self, TicketError> {
        let parent_id = parent_id.into();
        if parent_id.trim().is_empty() {
            return Err(TicketError::TicketCreation(
                "proxy-granting ticket requires a parent ticket".to_string(),
            ));
        }

        Ok(Self {
            state: TicketState::new(id, expiration_policy)?,
            authentication,
            parent_id: Some(parent_id),
            proxied_by: Some(proxied_by),
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
        })
    }

    pub fn state(&self) -> &TicketState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TicketState {
        &mut self.state
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn proxied_by(&self) -> Option<&Service> {
        self.proxied_by.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this is a proxy-granting ticket
    pub fn is_proxy(&self) -> bool {
        self.proxied_by.is_some()
    }

    pub fn services(&self) -> &BTreeMap<String, Service> {
        &self.services
    }

    pub fn proxy_granting_tickets(&self) -> &BTreeMap<String, Service> {
        &self.proxy_granting_tickets
    }

    pub fn remove_all_services(&mut self) {
        self.services.clear();
    }

    pub fn mark_ticket_expired(&mut self) {
        self.state.mark_expired();
    }

    /// Own flag or own policy
    pub fn is_expired_locally(&self) -> bool {
        self.state
            .is_expired_at(self.authentication.is_remember_me(), Utc::now())
    }

    /// Own flag, own policy, any expired ancestor or a missing parent
    pub fn is_expired(&self, catalog: &dyn TicketCatalog) -> bool {
        self.is_expired_locally() || is_chain_expired_at(self.id(), self.parent_id(), catalog, Utc::now())
    }

    /// Issue a service ticket for `service`.
    ///
    /// `from_new_login` on the new ticket is set when this is the first
    /// ticket granted by this session. With `only_track_most_recent_session`
    /// a previous entry for the same service is replaced instead of kept.
    ///
    /// Only this ticket's own expiry is checked. A proxy-granting ticket
    /// cannot see its chain from here; callers holding one go through
    /// [`TicketRegistry::grant_service_ticket`](crate::registry::TicketRegistry::grant_service_ticket),
    /// which refuses when any ancestor is expired or gone.
    pub fn grant_service_ticket(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        only_track_most_recent_session: bool,
    ) -> Result<ServiceTicket, TicketError> {
        if self.is_expired_locally() {
            return Err(TicketError::Expired(self.id().to_string()));
        }

        let from_new_login = self.services.is_empty();
        let ticket = ServiceTicket::new(
            id,
            self.id(),
            service.clone(),
            from_new_login,
            credentials_provided,
            expiration_policy,
            self.is_proxy(),
        )?;

        if only_track_most_recent_session {
            let before = self.services.len();
            self.services.retain(|_, existing| !existing.matches(&service));
            if self.services.len() != before {
                trace!("Replaced previous session of [{}] in [{}]", service, self.id());
            }
        }

        self.services.insert(ticket.id().to_string(), service.normalized());
        self.state.update();

        debug!(
            "Granted [{}] for service [{}] from [{}], new login: {}",
            ticket.id(),
            service,
            self.id(),
            from_new_login
        );
        Ok(ticket)
    }

    /// Track a proxy-granting ticket issued from one of this session's service tickets
    pub(crate) fn register_proxy_granting_ticket(&mut self, id: impl Into<String>, service: Service) {
        self.proxy_granting_tickets.insert(id.into(), service.normalized());
    }

    /// Authentications of the whole chain, root first and this ticket last
    pub fn chained_authentications(&self, catalog: &dyn TicketCatalog) -> Vec<Authentication> {
        let mut chain = vec![self.authentication.clone()];
        chain.extend(
            resolve_ancestors(self.id(), self.parent_id(), catalog)
                .into_iter()
                .filter_map(|ancestor| ancestor.as_ticket_granting_ticket())
                .map(|ancestor| ancestor.authentication.clone()),
        );
        chain.reverse();
        chain
    }

    /// Root of the chain this ticket belongs to
    pub fn root<'a>(&'a self, catalog: &'a dyn TicketCatalog) -> Option<&'a TicketGrantingTicket> {
        match resolve_ancestors(self.id(), self.parent_id(), catalog).into_iter().last() {
            Some(ancestor) => ancestor
                .as_ticket_granting_ticket()
                .filter(|candidate| candidate.is_root()),
            None if self.is_root() => Some(self),
            None => None,
        }
    }
}
