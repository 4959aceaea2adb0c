//! Ticket model
//!
//! Tickets reference each other by id, never by pointer. Walking a proxy
//! chain means resolving parent ids through a [`TicketCatalog`], which is
//! either a registry snapshot or a chain loaded from a registry.

pub mod authentication;
pub mod granting;
pub mod id;
pub mod oauth;
pub mod service;
pub mod service_ticket;

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TicketError;
use crate::expiration::{ExpirationPolicy, TicketUsage};

pub use authentication::{Authentication, AuthenticationBuilder, Principal};
pub use granting::TicketGrantingTicket;
pub use id::{DefaultUniqueTicketIdGenerator, UniqueTicketIdGenerator};
pub use oauth::{OAuthCode, OAuthCodeBuilder, OAuthGrantType, OAuthResponseType, Scopes};
pub use service::Service;
pub use service_ticket::ServiceTicket;

/// Upper bound on proxy chain depth when walking parents
pub(crate) const MAX_CHAIN_DEPTH: usize = 64;

/// Discriminant of the closed set of ticket variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    TicketGrantingTicket,
    ProxyGrantingTicket,
    ServiceTicket,
    ProxyTicket,
    OAuthCode,
}

impl TicketKind {
    pub const ALL: [TicketKind; 5] = [
        TicketKind::TicketGrantingTicket,
        TicketKind::ProxyGrantingTicket,
        TicketKind::ServiceTicket,
        TicketKind::ProxyTicket,
        TicketKind::OAuthCode,
    ];

    /// Id prefix for tickets of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            TicketKind::TicketGrantingTicket => "TGT",
            TicketKind::ProxyGrantingTicket => "PGT",
            TicketKind::ServiceTicket => "ST",
            TicketKind::ProxyTicket => "PT",
            TicketKind::OAuthCode => "OC",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TicketKind::TicketGrantingTicket => "TicketGrantingTicket",
            TicketKind::ProxyGrantingTicket => "ProxyGrantingTicket",
            TicketKind::ServiceTicket => "ServiceTicket",
            TicketKind::ProxyTicket => "ProxyTicket",
            TicketKind::OAuthCode => "OAuthCode",
        }
    }

    pub fn from_type_name(name: &str) -> Option<TicketKind> {
        TicketKind::ALL.into_iter().find(|kind| kind.type_name() == name)
    }

    /// Whether a ticket of this kind can be handed out where `expected` is asked for.
    /// A proxy-granting ticket is a ticket-granting ticket, a proxy ticket is a
    /// service ticket.
    pub fn is_assignable_to(&self, expected: TicketKind) -> bool {
        *self == expected
            || matches!(
                (self, expected),
                (TicketKind::ProxyGrantingTicket, TicketKind::TicketGrantingTicket)
                    | (TicketKind::ProxyTicket, TicketKind::ServiceTicket)
            )
    }

    pub fn is_granting(&self) -> bool {
        matches!(self, TicketKind::TicketGrantingTicket | TicketKind::ProxyGrantingTicket)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// State shared by every ticket kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketState {
    id: String,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    previous_time_used: Option<DateTime<Utc>>,
    count_of_uses: u64,
    expiration_policy: ExpirationPolicy,
    expired: bool,
}

impl TicketState {
    pub(crate) fn new(id: impl Into<String>, expiration_policy: ExpirationPolicy) -> Result<Self, TicketError> {
        Self::created_at(id, expiration_policy, Utc::now())
    }

    pub(crate) fn created_at(
        id: impl Into<String>,
        expiration_policy: ExpirationPolicy,
        creation_time: DateTime<Utc>,
    ) -> Result<Self, TicketError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TicketError::TicketCreation("ticket id cannot be empty".to_string()));
        }

        Ok(Self {
            id,
            creation_time,
            last_time_used: creation_time,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            expired: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    pub fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    pub fn count_of_uses(&self) -> u64 {
        self.count_of_uses
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Whether the administrative expired flag is set
    pub fn is_marked_expired(&self) -> bool {
        self.expired
    }

    /// Record a use of the ticket
    pub(crate) fn update(&mut self) {
        let now = Utc::now();
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now.max(self.last_time_used);
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    pub(crate) fn mark_expired(&mut self) {
        self.expired = true;
    }

    pub fn usage(&self, remember_me: bool) -> TicketUsage {
        TicketUsage {
            creation_time: self.creation_time,
            last_time_used: self.last_time_used,
            previous_time_used: self.previous_time_used,
            count_of_uses: self.count_of_uses,
            remember_me,
        }
    }

    pub(crate) fn is_expired_at(&self, remember_me: bool, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired_at(&self.usage(remember_me), now)
    }
}

/// Any ticket held by a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ticket {
    TicketGranting(TicketGrantingTicket),
    ProxyGranting(TicketGrantingTicket),
    Service(ServiceTicket),
    Proxy(ServiceTicket),
    OAuthCode(OAuthCode),
}

impl Ticket {
    pub fn kind(&self) -> TicketKind {
        match self {
            Ticket::TicketGranting(_) => TicketKind::TicketGrantingTicket,
            Ticket::ProxyGranting(_) => TicketKind::ProxyGrantingTicket,
            Ticket::Service(_) => TicketKind::ServiceTicket,
            Ticket::Proxy(_) => TicketKind::ProxyTicket,
            Ticket::OAuthCode(_) => TicketKind::OAuthCode,
        }
    }

    pub fn state(&self) -> &TicketState {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => t.state(),
            Ticket::Service(t) | Ticket::Proxy(t) => t.state(),
            Ticket::OAuthCode(t) => t.state(),
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut TicketState {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => t.state_mut(),
            Ticket::Service(t) | Ticket::Proxy(t) => t.state_mut(),
            Ticket::OAuthCode(t) => t.state_mut(),
        }
    }

    pub fn id(&self) -> &str {
        self.state().id()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.state().creation_time()
    }

    pub fn count_of_uses(&self) -> u64 {
        self.state().count_of_uses()
    }

    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        self.state().expiration_policy()
    }

    /// Id of the ticket-granting ticket this ticket descends from
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => t.parent_id(),
            Ticket::Service(t) | Ticket::Proxy(t) => Some(t.ticket_granting_ticket_id()),
            Ticket::OAuthCode(t) => t.ticket_granting_ticket_id(),
        }
    }

    fn remember_me(&self) -> bool {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => t.authentication().is_remember_me(),
            _ => false,
        }
    }

    /// Own flag or own policy, ignoring ancestors
    pub fn is_expired_locally(&self) -> bool {
        self.is_expired_locally_at(Utc::now())
    }

    pub fn is_expired_locally_at(&self, now: DateTime<Utc>) -> bool {
        self.state().is_expired_at(self.remember_me(), now)
    }

    /// Own flag, own policy, any expired ancestor, or a parent missing from
    /// the catalog
    pub fn is_expired(&self, catalog: &dyn TicketCatalog) -> bool {
        self.is_expired_at(catalog, Utc::now())
    }

    pub fn is_expired_at(&self, catalog: &dyn TicketCatalog, now: DateTime<Utc>) -> bool {
        self.is_expired_locally_at(now) || is_chain_expired_at(self.id(), self.parent_id(), catalog, now)
    }

    /// Ancestors resolvable through the catalog, nearest first
    pub fn ancestors<'a>(&self, catalog: &'a dyn TicketCatalog) -> Vec<&'a Ticket> {
        resolve_ancestors(self.id(), self.parent_id(), catalog)
    }

    pub fn mark_ticket_expired(&mut self) {
        self.state_mut().mark_expired();
    }

    /// Tickets directly chained below this one
    pub fn child_ids(&self) -> Vec<String> {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => t
                .services()
                .keys()
                .chain(t.proxy_granting_tickets().keys())
                .cloned()
                .collect(),
            Ticket::Service(t) | Ticket::Proxy(t) => {
                t.proxy_granting_ticket_id().map(str::to_string).into_iter().collect()
            }
            Ticket::OAuthCode(_) => Vec::new(),
        }
    }

    pub fn as_ticket_granting_ticket(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_ticket_granting_ticket_mut(&mut self) -> Option<&mut TicketGrantingTicket> {
        match self {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_service_ticket(&self) -> Option<&ServiceTicket> {
        match self {
            Ticket::Service(t) | Ticket::Proxy(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_service_ticket_mut(&mut self) -> Option<&mut ServiceTicket> {
        match self {
            Ticket::Service(t) | Ticket::Proxy(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_oauth_code(&self) -> Option<&OAuthCode> {
        match self {
            Ticket::OAuthCode(t) => Some(t),
            _ => None,
        }
    }

    /// Fail with a type mismatch unless this ticket can stand in for `expected`
    pub fn ensure_kind(&self, expected: TicketKind) -> Result<(), TicketError> {
        if self.kind().is_assignable_to(expected) {
            Ok(())
        } else {
            Err(self.mismatch(expected))
        }
    }

    fn mismatch(&self, expected: TicketKind) -> TicketError {
        TicketError::TypeMismatch {
            id: self.id().to_string(),
            actual: self.kind(),
            expected,
        }
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(ticket: TicketGrantingTicket) -> Self {
        if ticket.is_proxy() {
            Ticket::ProxyGranting(ticket)
        } else {
            Ticket::TicketGranting(ticket)
        }
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(ticket: ServiceTicket) -> Self {
        if ticket.is_proxy() {
            Ticket::Proxy(ticket)
        } else {
            Ticket::Service(ticket)
        }
    }
}

impl From<OAuthCode> for Ticket {
    fn from(code: OAuthCode) -> Self {
        Ticket::OAuthCode(code)
    }
}

impl TryFrom<Ticket> for TicketGrantingTicket {
    type Error = TicketError;

    fn try_from(ticket: Ticket) -> Result<Self, Self::Error> {
        match ticket {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => Ok(t),
            other => Err(other.mismatch(TicketKind::TicketGrantingTicket)),
        }
    }
}

impl TryFrom<Ticket> for ServiceTicket {
    type Error = TicketError;

    fn try_from(ticket: Ticket) -> Result<Self, Self::Error> {
        match ticket {
            Ticket::Service(t) | Ticket::Proxy(t) => Ok(t),
            other => Err(other.mismatch(TicketKind::ServiceTicket)),
        }
    }
}

impl TryFrom<Ticket> for OAuthCode {
    type Error = TicketError;

    fn try_from(ticket: Ticket) -> Result<Self, Self::Error> {
        match ticket {
            Ticket::OAuthCode(code) => Ok(code),
            other => Err(other.mismatch(TicketKind::OAuthCode)),
        }
    }
}

/// Ancestors of a ticket as far as a catalog can resolve them
pub(crate) struct Ancestry<'a> {
    /// Nearest first
    pub(crate) tickets: Vec<&'a Ticket>,
    /// First parent id the catalog does not hold
    pub(crate) missing_parent: Option<String>,
}

/// Walk parent ids through the catalog, nearest ancestor first. Stops at the
/// first id the catalog cannot resolve, on loops, and past `MAX_CHAIN_DEPTH`.
pub(crate) fn walk_ancestors<'a>(
    id: &str,
    parent_id: Option<&str>,
    catalog: &'a dyn TicketCatalog,
) -> Ancestry<'a> {
    let mut tickets = Vec::new();
    let mut seen = HashSet::new();
    seen.insert(id.to_string());

    let mut next = parent_id.map(str::to_string);
    while let Some(parent_id) = next.take() {
        if tickets.len() >= MAX_CHAIN_DEPTH || !seen.insert(parent_id.clone()) {
            tracing::warn!("Ticket chain of [{}] loops or is too deep, stopping at [{}]", id, parent_id);
            break;
        }
        match catalog.find_ticket(&parent_id) {
            Some(parent) => {
                next = parent.parent_id().map(str::to_string);
                tickets.push(parent);
            }
            None => {
                return Ancestry {
                    tickets,
                    missing_parent: Some(parent_id),
                }
            }
        }
    }

    Ancestry {
        tickets,
        missing_parent: None,
    }
}

pub(crate) fn resolve_ancestors<'a>(
    id: &str,
    parent_id: Option<&str>,
    catalog: &'a dyn TicketCatalog,
) -> Vec<&'a Ticket> {
    walk_ancestors(id, parent_id, catalog).tickets
}

/// Whether the chain above `id` ends the ticket's validity: an ancestor is
/// expired, or a parent is gone from the catalog. A granting ticket that was
/// evicted or logged out takes its descendants with it.
pub(crate) fn is_chain_expired_at(
    id: &str,
    parent_id: Option<&str>,
    catalog: &dyn TicketCatalog,
    now: DateTime<Utc>,
) -> bool {
    let ancestry = walk_ancestors(id, parent_id, catalog);
    if let Some(missing) = &ancestry.missing_parent {
        tracing::debug!("Parent [{}] of ticket [{}] is gone, treating it as expired", missing, id);
        return true;
    }
    ancestry.tickets.iter().any(|ancestor| ancestor.is_expired_locally_at(now))
}

/// Lookup of tickets by id, used to resolve chains
pub trait TicketCatalog {
    fn find_ticket(&self, id: &str) -> Option<&Ticket>;
}

impl TicketCatalog for HashMap<String, Ticket> {
    fn find_ticket(&self, id: &str) -> Option<&Ticket> {
        self.get(id)
    }
}

/// Owned set of tickets indexed by id
#[derive(Debug, Clone, Default)]
pub struct TicketSnapshot {
    tickets: HashMap<String, Ticket>,
}

impl TicketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticket: Ticket) {
        self.tickets.insert(ticket.id().to_string(), ticket);
    }

    pub fn get(&self, id: &str) -> Option<&Ticket> {
        self.tickets.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tickets.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn into_tickets(self) -> Vec<Ticket> {
        self.tickets.into_values().collect()
    }
}

impl FromIterator<Ticket> for TicketSnapshot {
    fn from_iter<I: IntoIterator<Item = Ticket>>(iter: I) -> Self {
        let mut snapshot = TicketSnapshot::new();
        for ticket in iter {
            snapshot.insert(ticket);
        }
        snapshot
    }
}

impl TicketCatalog for TicketSnapshot {
    fn find_ticket(&self, id: &str) -> Option<&Ticket> {
        self.tickets.get(id)
    }
}
