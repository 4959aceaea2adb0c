//! OAuth authorization codes
//!
//! A code is a short-lived ticket that can be rebuilt without a live
//! ticket-granting ticket: it carries a summary of the authentication it was
//! issued for.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Authentication, Service, TicketKind, TicketState};
use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;

/// Response types a code can be issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuthResponseType {
    Code,
    Token,
    IdToken,
    IdTokenToken,
    Device,
    None,
}

impl OAuthResponseType {
    const ORDERED: [OAuthResponseType; 6] = [
        OAuthResponseType::Code,
        OAuthResponseType::Token,
        OAuthResponseType::IdToken,
        OAuthResponseType::IdTokenToken,
        OAuthResponseType::Device,
        OAuthResponseType::None,
    ];

    pub fn ordinal(&self) -> usize {
        Self::ORDERED.iter().position(|t| t == self).unwrap_or_default()
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ORDERED.get(ordinal).copied()
    }
}

/// Grant types a code can be redeemed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuthGrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
    RefreshToken,
    Device,
    UmaTicket,
    TokenExchange,
}

impl OAuthGrantType {
    const ORDERED: [OAuthGrantType; 7] = [
        OAuthGrantType::AuthorizationCode,
        OAuthGrantType::Password,
        OAuthGrantType::ClientCredentials,
        OAuthGrantType::RefreshToken,
        OAuthGrantType::Device,
        OAuthGrantType::UmaTicket,
        OAuthGrantType::TokenExchange,
    ];

    pub fn ordinal(&self) -> usize {
        Self::ORDERED.iter().position(|t| t == self).unwrap_or_default()
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ORDERED.get(ordinal).copied()
    }
}

/// Requested scopes. Equality ignores order, iteration keeps insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scopes(Vec<String>);

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        let scope = scope.into();
        if scope.is_empty() || self.0.contains(&scope) {
            return false;
        }
        self.0.push(scope);
        true
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Scopes {
    fn eq(&self, other: &Self) -> bool {
        self.0.iter().collect::<BTreeSet<_>>() == other.0.iter().collect::<BTreeSet<_>>()
    }
}

impl Eq for Scopes {}

impl<S: Into<String>> FromIterator<S> for Scopes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut scopes = Scopes::new();
        for scope in iter {
            scopes.insert(scope);
        }
        scopes
    }
}

/// OAuth authorization code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCode {
    state: TicketState,
    service: Service,
    client_id: String,
    scopes: Scopes,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    response_type: OAuthResponseType,
    grant_type: OAuthGrantType,
    claims: BTreeMap<String, Vec<String>>,
    authentication: Authentication,
    ticket_granting_ticket_id: Option<String>,
}

impl OAuthCode {
    pub fn builder(
        id: impl Into<String>,
        service: Service,
        client_id: impl Into<String>,
        authentication: Authentication,
    ) -> OAuthCodeBuilder {
        OAuthCodeBuilder {
            id: id.into(),
            service,
            client_id: client_id.into(),
            authentication,
            scopes: Scopes::new(),
            code_challenge: None,
            code_challenge_method: None,
            response_type: OAuthResponseType::Code,
            grant_type: OAuthGrantType::AuthorizationCode,
            claims: BTreeMap::new(),
            ticket_granting_ticket_id: None,
            expiration_policy: ExpirationPolicy::multi_time_use_or_timeout(1, 30),
            creation_time: None,
        }
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

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn code_challenge(&self) -> Option<&str> {
        self.code_challenge.as_deref()
    }

    pub fn code_challenge_method(&self) -> Option<&str> {
        self.code_challenge_method.as_deref()
    }

    pub fn response_type(&self) -> OAuthResponseType {
        self.response_type
    }

    pub fn grant_type(&self) -> OAuthGrantType {
        self.grant_type
    }

    pub fn claims(&self) -> &BTreeMap<String, Vec<String>> {
        &self.claims
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn ticket_granting_ticket_id(&self) -> Option<&str> {
        self.ticket_granting_ticket_id.as_deref()
    }

    pub fn mark_ticket_expired(&mut self) {
        self.state.mark_expired();
    }

    pub fn is_expired_locally(&self) -> bool {
        self.state.is_expired_at(false, Utc::now())
    }
}

/// Builder for [`OAuthCode`]
#[derive(Debug, Clone)]
pub struct OAuthCodeBuilder {
    id: String,
    service: Service,
    client_id: String,
    authentication: Authentication,
    scopes: Scopes,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    response_type: OAuthResponseType,
    grant_type: OAuthGrantType,
    claims: BTreeMap<String, Vec<String>>,
    ticket_granting_ticket_id: Option<String>,
    expiration_policy: ExpirationPolicy,
    creation_time: Option<DateTime<Utc>>,
}

impl OAuthCodeBuilder {
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope);
        self
    }

    pub fn scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        for scope in scopes {
            self.scopes.insert(scope);
        }
        self
    }

    pub fn code_challenge(mut self, challenge: impl Into<String>, method: impl Into<String>) -> Self {
        self.code_challenge = Some(challenge.into()).filter(|c: &String| !c.is_empty());
        self.code_challenge_method = Some(method.into()).filter(|m: &String| !m.is_empty());
        self
    }

    pub fn response_type(mut self, response_type: OAuthResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn grant_type(mut self, grant_type: OAuthGrantType) -> Self {
        self.grant_type = grant_type;
        self
    }

    pub fn claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn ticket_granting_ticket(mut self, id: impl Into<String>) -> Self {
        self.ticket_granting_ticket_id = Some(id.into());
        self
    }

    pub fn expiration_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.expiration_policy = policy;
        self
    }

    pub(crate) fn creation_time(mut self, creation_time: DateTime<Utc>) -> Self {
        self.creation_time = Some(creation_time);
        self
    }

    pub fn build(self) -> Result<OAuthCode, TicketError> {
        if self.client_id.trim().is_empty() {
            return Err(TicketError::TicketCreation(format!(
                "{} requires a client id",
                TicketKind::OAuthCode
            )));
        }

        let state = match self.creation_time {
            Some(at) => TicketState::created_at(self.id, self.expiration_policy, at)?,
            None => TicketState::new(self.id, self.expiration_policy)?,
        };

        Ok(OAuthCode {
            state,
            service: self.service,
            client_id: self.client_id,
            scopes: self.scopes,
            code_challenge: self.code_challenge,
            code_challenge_method: self.code_challenge_method,
            response_type: self.response_type,
            grant_type: self.grant_type,
            claims: self.claims,
            authentication: self.authentication,
            ticket_granting_ticket_id: self.ticket_granting_ticket_id,
        })
    }
}
