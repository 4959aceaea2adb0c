//! Service descriptors
//!
//! Two services are the same service when their normalized urls match. The
//! normalized form drops a `;jsessionid=` path parameter, the query string and
//! the fragment, so transport artifacts do not create distinct sessions, while
//! different hosts or paths stay distinct.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TicketError;

const SESSION_ID_PARAMETER: &str = ";jsessionid=";

/// A service a ticket can be issued to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Result<Self, TicketError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TicketError::TicketCreation(
                "service id cannot be empty".to_string(),
            ));
        }
        Ok(Self { id })
    }

    /// The service id as presented by the caller
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn normalized_id(&self) -> String {
        normalize_service_id(&self.id)
    }

    /// Descriptor stored in a ticket-granting ticket's services map
    pub fn normalized(&self) -> Service {
        Service {
            id: self.normalized_id(),
        }
    }

    pub fn matches(&self, other: &Service) -> bool {
        self.normalized_id() == other.normalized_id()
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for Service {}

impl Hash for Service {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_id().hash(state);
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Normalize a service url for equality
pub fn normalize_service_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_session = strip_session_id(trimmed);
    let end = without_session
        .find(|c| c == '?' || c == '#')
        .unwrap_or(without_session.len());
    let base = &without_session[..end];

    match Url::parse(base) {
        Ok(url) => url.to_string(),
        Err(_) => base.to_string(),
    }
}

fn strip_session_id(raw: &str) -> String {
    let lowered = raw.to_ascii_lowercase();
    match lowered.find(SESSION_ID_PARAMETER) {
        Some(start) => {
            let value_start = start + SESSION_ID_PARAMETER.len();
            let end = lowered[value_start..]
                .find(|c| c == '?' || c == '#' || c == ';')
                .map(|offset| value_start + offset)
                .unwrap_or(raw.len());
            format!("{}{}", &raw[..start], &raw[end..])
        }
        None => raw.to_string(),
    }
}
