//! Service tickets and proxy tickets

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{is_chain_expired_at, Authentication, Service, TicketCatalog, TicketGrantingTicket, TicketState};
use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;

/// Ticket issued to one service from a ticket-granting ticket.
/// When issued from a proxy-granting ticket it is a proxy ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicket {
    state: TicketState,
    ticket_granting_ticket_id: String,
    service: Service,
    from_new_login: bool,
    credentials_provided: bool,
    proxy: bool,
    proxy_granting_ticket_id: Option<String>,
}

impl ServiceTicket {
    pub(crate) fn new(
        id: impl Into<String>,
        ticket_granting_ticket_id: impl Into<String>,
        service: Service,
        from_new_login: bool,
        credentials_provided: bool,
        expiration_policy: ExpirationPolicy,
        proxy: bool,
    ) -> Result<Self, TicketError> {
        let ticket_granting_ticket_id = ticket_granting_ticket_id.into();
        if ticket_granting_ticket_id.trim().is_empty() {
            return Err(TicketError::TicketCreation(
                "service ticket requires a granting ticket".to_string(),
            ));
        }

        Ok(Self {
            state: TicketState::new(id, expiration_policy)?,
            ticket_granting_ticket_id,
            service,
            from_new_login,
            credentials_provided,
            proxy,
            proxy_granting_ticket_id: None,
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

    pub fn ticket_granting_ticket_id(&self) -> &str {
        &self.ticket_granting_ticket_id
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Whether this ticket was the first one issued by its session
    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Whether primary credentials were presented when this ticket was issued
    pub fn is_credentials_provided(&self) -> bool {
        self.credentials_provided
    }

    /// Whether this is a proxy ticket
    pub fn is_proxy(&self) -> bool {
        self.proxy
    }

    pub fn proxy_granting_ticket_id(&self) -> Option<&str> {
        self.proxy_granting_ticket_id.as_deref()
    }

    pub fn mark_ticket_expired(&mut self) {
        self.state.mark_expired();
    }

    pub fn is_expired_locally(&self) -> bool {
        self.state.is_expired_at(false, Utc::now())
    }

    /// Own flag, own policy, or an expired or missing granting ticket
    /// anywhere up the chain
    pub fn is_expired(&self, catalog: &dyn TicketCatalog) -> bool {
        self.is_expired_locally()
            || is_chain_expired_at(self.id(), Some(&self.ticket_granting_ticket_id), catalog, Utc::now())
    }

    /// Record a validation attempt for `service`.
    ///
    /// The use is counted whether or not the service matches.
    pub fn validate_for(&mut self, service: &Service) -> Result<(), TicketError> {
        self.state.update();
        if self.service.matches(service) {
            Ok(())
        } else {
            debug!(
                "Ticket [{}] was issued for [{}], not [{}]",
                self.id(),
                self.service,
                service
            );
            Err(TicketError::unrecognizable_service(service.id()))
        }
    }

    /// Issue the proxy-granting ticket of this service ticket. Only one may
    /// ever be issued; the caller records it on the parent session.
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
    ) -> Result<TicketGrantingTicket, TicketError> {
        if self.proxy_granting_ticket_id.is_some() {
            return Err(TicketError::ProxyGrantingTicketAlreadyGranted(self.id().to_string()));
        }

        let proxy_granting_ticket = TicketGrantingTicket::new_proxy(
            id,
            self.ticket_granting_ticket_id.clone(),
            self.service.clone(),
            authentication,
            expiration_policy,
        )?;
        self.proxy_granting_ticket_id = Some(proxy_granting_ticket.id().to_string());

        debug!(
            "Granted proxy-granting ticket [{}] from [{}] to [{}]",
            proxy_granting_ticket.id(),
            self.id(),
            self.service
        );
        Ok(proxy_granting_ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{Ticket, TicketSnapshot};

    fn authentication(principal: &str) -> Authentication {
        Authentication::builder(principal).build().unwrap()
    }

    fn service(id: &str) -> Service {
        Service::new(id).unwrap()
    }

    fn granted() -> (TicketGrantingTicket, ServiceTicket) {
        let mut tgt =
            TicketGrantingTicket::new("TGT-1", authentication("casuser"), ExpirationPolicy::NeverExpires).unwrap();
        let st = tgt
            .grant_service_ticket(
                "ST-1",
                service("https://app.example.org"),
                ExpirationPolicy::multi_time_use_or_timeout(1, 5),
                false,
                true,
            )
            .unwrap();
        (tgt, st)
    }

    #[test]
    fn test_missing_granting_ticket_fails() {
        let result = ServiceTicket::new(
            "ST-1",
            "",
            service("https://app.example.org"),
            true,
            false,
            ExpirationPolicy::NeverExpires,
            false,
        );
        assert!(matches!(result, Err(TicketError::TicketCreation(_))));
    }

    #[test]
    fn test_second_proxy_granting_ticket_fails() {
        let (_, mut st) = granted();
        let pgt = st
            .grant_proxy_granting_ticket("PGT-1", authentication("proxy"), ExpirationPolicy::NeverExpires)
            .unwrap();
        assert_eq!(pgt.parent_id(), Some("TGT-1"));
        assert!(pgt.is_proxy());
        assert_eq!(st.proxy_granting_ticket_id(), Some("PGT-1"));

        let second = st.grant_proxy_granting_ticket("PGT-2", authentication("proxy"), ExpirationPolicy::NeverExpires);
        assert_eq!(
            second.unwrap_err(),
            TicketError::ProxyGrantingTicketAlreadyGranted("ST-1".to_string())
        );
        assert_eq!(st.proxy_granting_ticket_id(), Some("PGT-1"));
    }

    #[test]
    fn test_expiry_cascades_from_granting_ticket() {
        let (mut tgt, st) = granted();

        let catalog: TicketSnapshot = vec![Ticket::from(tgt.clone())].into_iter().collect();
        assert!(!st.is_expired(&catalog));

        tgt.mark_ticket_expired();
        let catalog: TicketSnapshot = vec![Ticket::from(tgt)].into_iter().collect();
        assert!(st.is_expired(&catalog));
        assert!(!st.is_expired_locally());
    }

    #[test]
    fn test_missing_granting_ticket_expires() {
        let (_, st) = granted();
        assert!(st.is_expired(&TicketSnapshot::new()));

        let unrelated: TicketSnapshot = vec![Ticket::from(
            TicketGrantingTicket::new("TGT-2", authentication("casuser"), ExpirationPolicy::NeverExpires).unwrap(),
        )]
        .into_iter()
        .collect();
        assert!(st.is_expired(&unrelated));
        assert!(!st.is_expired_locally());
    }

    #[test]
    fn test_validate_for_counts_uses() {
        let (_, mut st) = granted();
        st.validate_for(&service("https://app.example.org?ticket=ST-1")).unwrap();
        assert_eq!(st.state().count_of_uses(), 1);
        assert!(st.is_expired_locally());

        let err = st.validate_for(&service("https://other.example.org")).unwrap_err();
        assert!(matches!(err, TicketError::UnrecognizableService { .. }));
        assert_eq!(st.state().count_of_uses(), 2);
    }

    #[test]
    fn test_proxy_ticket_from_proxy_granting_ticket() {
        let (_, mut st) = granted();
        let mut pgt = st
            .grant_proxy_granting_ticket("PGT-1", authentication("proxy"), ExpirationPolicy::NeverExpires)
            .unwrap();
        let pt = pgt
            .grant_service_ticket("PT-1", service("https://backend.example.org"), ExpirationPolicy::NeverExpires, false, true)
            .unwrap();
        assert!(pt.is_proxy());
        assert_eq!(pt.ticket_granting_ticket_id(), "PGT-1");
        assert!(matches!(Ticket::from(pt), Ticket::Proxy(_)));
    }
}
