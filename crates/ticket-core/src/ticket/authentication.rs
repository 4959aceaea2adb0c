//! Authentication summary carried by tickets
//!
//! The ticket core treats an authentication as opaque: it is stored with the
//! ticket and compared for equality, nothing more. The only field read here is
//! the remember-me attribute, which drives [`ExpirationPolicy::RememberMeDelegating`].
//!
//! [`ExpirationPolicy::RememberMeDelegating`]: crate::expiration::ExpirationPolicy::RememberMeDelegating

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TicketError;

/// Authentication attribute holding the remember-me choice
pub const REMEMBER_ME_ATTRIBUTE: &str = "rememberMe";

/// Authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Result of a successful primary authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    principal: Principal,
    attributes: BTreeMap<String, Vec<String>>,
    successful_handlers: Vec<String>,
    credential_types: Vec<String>,
    authentication_date: DateTime<Utc>,
}

impl Authentication {
    pub fn builder(principal_id: impl Into<String>) -> AuthenticationBuilder {
        AuthenticationBuilder::new(principal_id)
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_id(&self) -> &str {
        &self.principal.id
    }

    pub fn attributes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.attributes
    }

    /// Names of the handlers that accepted the credentials
    pub fn successful_handlers(&self) -> &[String] {
        &self.successful_handlers
    }

    /// Types of the credentials that were presented
    pub fn credential_types(&self) -> &[String] {
        &self.credential_types
    }

    pub fn authentication_date(&self) -> DateTime<Utc> {
        self.authentication_date
    }

    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(REMEMBER_ME_ATTRIBUTE)
            .map(|values| values.iter().any(|v| v.eq_ignore_ascii_case("true")))
            .unwrap_or(false)
    }
}

/// Builder for [`Authentication`]
#[derive(Debug, Clone)]
pub struct AuthenticationBuilder {
    principal: Principal,
    attributes: BTreeMap<String, Vec<String>>,
    successful_handlers: Vec<String>,
    credential_types: Vec<String>,
    authentication_date: Option<DateTime<Utc>>,
}

impl AuthenticationBuilder {
    fn new(principal_id: impl Into<String>) -> Self {
        Self {
            principal: Principal {
                id: principal_id.into(),
                attributes: BTreeMap::new(),
            },
            attributes: BTreeMap::new(),
            successful_handlers: Vec::new(),
            credential_types: Vec::new(),
            authentication_date: None,
        }
    }

    pub fn principal_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.principal
            .attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn success(mut self, handler: impl Into<String>) -> Self {
        let handler = handler.into();
        if !self.successful_handlers.contains(&handler) {
            self.successful_handlers.push(handler);
        }
        self
    }

    pub fn credential(mut self, credential_type: impl Into<String>) -> Self {
        let credential_type = credential_type.into();
        if !self.credential_types.contains(&credential_type) {
            self.credential_types.push(credential_type);
        }
        self
    }

    pub fn remember_me(self, remember_me: bool) -> Self {
        if remember_me {
            self.attribute(REMEMBER_ME_ATTRIBUTE, "true")
        } else {
            self
        }
    }

    pub fn authentication_date(mut self, date: DateTime<Utc>) -> Self {
        self.authentication_date = Some(date);
        self
    }

    pub fn build(self) -> Result<Authentication, TicketError> {
        if self.principal.id.trim().is_empty() {
            return Err(TicketError::TicketCreation(
                "authentication requires a principal".to_string(),
            ));
        }

        Ok(Authentication {
            principal: self.principal,
            attributes: self.attributes,
            successful_handlers: self.successful_handlers,
            credential_types: self.credential_types,
            authentication_date: self.authentication_date.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_deduplicates_handlers() {
        let auth = Authentication::builder("casuser")
            .success("AcceptUsersAuthenticationHandler")
            .success("AcceptUsersAuthenticationHandler")
            .credential("UsernamePasswordCredential")
            .build()
            .unwrap();

        assert_eq!(auth.principal_id(), "casuser");
        assert_eq!(auth.successful_handlers(), ["AcceptUsersAuthenticationHandler"]);
        assert_eq!(auth.credential_types(), ["UsernamePasswordCredential"]);
        assert!(!auth.is_remember_me());
    }

    #[test]
    fn test_missing_principal_fails() {
        assert!(matches!(
            Authentication::builder("  ").build(),
            Err(TicketError::TicketCreation(_))
        ));
    }

    #[test]
    fn test_remember_me_attribute() {
        let auth = Authentication::builder("casuser").remember_me(true).build().unwrap();
        assert!(auth.is_remember_me());
    }
}
