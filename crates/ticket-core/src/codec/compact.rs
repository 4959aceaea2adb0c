//! Compact single-string encoding of short-lived tickets
//!
//! The compacted form is self contained: a node that has never seen the
//! ticket can rebuild it from the string alone. Layout of an OAuth code:
//!
//! ```text
//! OC,<created>,<uses>,<ttl>,<service>,<client>,<scope|scope>,<challenge>,<method>,<response>,<grant>,<principal:h1#h2:c1#c2>
//! ```

use chrono::DateTime;
use tracing::{debug, warn};

use crate::error::CompactError;
use crate::expiration::ExpirationPolicy;
use crate::ticket::{
    Authentication, OAuthCode, OAuthGrantType, OAuthResponseType, Service, Ticket, TicketKind,
};

pub const DEFAULT_MAX_LENGTH: usize = 384;

const DELIMITER: char = ',';
const SCOPE_DELIMITER: char = '|';
const AUTHENTICATION_DELIMITER: char = ':';
const LIST_DELIMITER: char = '#';
const FIELD_COUNT: usize = 12;

/// Codec turning one ticket kind into a bounded string and back
pub trait TicketCompactor: Send + Sync {
    fn ticket_kind(&self) -> TicketKind;

    fn max_length(&self) -> usize;

    fn compact(&self, ticket: &Ticket) -> Result<String, CompactError>;

    fn expand(&self, token: &str) -> Result<Ticket, CompactError>;
}

/// Compactor for [`OAuthCode`]s
#[derive(Debug, Clone)]
pub struct OAuthCodeCompactor {
    max_length: usize,
}

impl OAuthCodeCompactor {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    fn check_length(&self, token: &str) -> Result<(), CompactError> {
        let length = token.chars().count();
        if length > self.max_length {
            return Err(CompactError::TooLong {
                length,
                max: self.max_length,
            });
        }
        Ok(())
    }
}

impl Default for OAuthCodeCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl TicketCompactor for OAuthCodeCompactor {
    fn ticket_kind(&self) -> TicketKind {
        TicketKind::OAuthCode
    }

    fn max_length(&self) -> usize {
        self.max_length
    }

    fn compact(&self, ticket: &Ticket) -> Result<String, CompactError> {
        let code = ticket
            .as_oauth_code()
            .ok_or_else(|| CompactError::UnsupportedTicket(ticket.kind()))?;

        let (uses, ttl) = policy_fields(code.state().expiration_policy())?;
        let service = code.service().normalized_id();
        let authentication = code.authentication();

        let scopes = code.scopes().iter().collect::<Vec<_>>();
        for scope in &scopes {
            plain("scope", scope, &[DELIMITER, SCOPE_DELIMITER])?;
        }
        for handler in authentication.successful_handlers() {
            plain("handler", handler, &[DELIMITER, AUTHENTICATION_DELIMITER, LIST_DELIMITER])?;
        }
        for credential in authentication.credential_types() {
            plain("credential", credential, &[DELIMITER, AUTHENTICATION_DELIMITER, LIST_DELIMITER])?;
        }

        let fields = [
            TicketKind::OAuthCode.prefix().to_string(),
            code.state().creation_time().timestamp().to_string(),
            uses,
            ttl,
            plain("service", &service, &[DELIMITER])?.to_string(),
            plain("client_id", code.client_id(), &[DELIMITER])?.to_string(),
            scopes.join(SCOPE_DELIMITER.to_string().as_str()),
            plain("code_challenge", code.code_challenge().unwrap_or_default(), &[DELIMITER])?.to_string(),
            plain(
                "code_challenge_method",
                code.code_challenge_method().unwrap_or_default(),
                &[DELIMITER],
            )?
            .to_string(),
            code.response_type().ordinal().to_string(),
            code.grant_type().ordinal().to_string(),
            format!(
                "{}{}{}{}{}",
                plain(
                    "principal",
                    authentication.principal_id(),
                    &[DELIMITER, AUTHENTICATION_DELIMITER]
                )?,
                AUTHENTICATION_DELIMITER,
                authentication.successful_handlers().join(LIST_DELIMITER.to_string().as_str()),
                AUTHENTICATION_DELIMITER,
                authentication.credential_types().join(LIST_DELIMITER.to_string().as_str()),
            ),
        ];

        let token = fields.join(DELIMITER.to_string().as_str());
        if let Err(e) = self.check_length(&token) {
            warn!("Unable to compact [{}]: {}", code.id(), e);
            return Err(e);
        }

        debug!("Compacted [{}] into {} characters", code.id(), token.len());
        Ok(token)
    }

    fn expand(&self, token: &str) -> Result<Ticket, CompactError> {
        self.check_length(token)?;

        let fields: Vec<&str> = token.split(DELIMITER).collect();
        if fields.len() != FIELD_COUNT {
            return Err(CompactError::Malformed(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        }
        if fields[0] != TicketKind::OAuthCode.prefix() {
            return Err(CompactError::Malformed(format!("unexpected prefix {}", fields[0])));
        }

        let created = fields[1]
            .parse::<i64>()
            .ok()
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .ok_or_else(|| CompactError::Malformed(format!("creation time {}", fields[1])))?;
        let policy = policy_from_fields(fields[2], fields[3])?;
        let service = Service::new(fields[4]).map_err(|e| CompactError::Malformed(e.to_string()))?;
        let client_id = fields[5];
        let scopes = fields[6].split(SCOPE_DELIMITER).filter(|s| !s.is_empty());
        let response_type = fields[9]
            .parse::<usize>()
            .ok()
            .and_then(OAuthResponseType::from_ordinal)
            .ok_or_else(|| CompactError::Malformed(format!("response type {}", fields[9])))?;
        let grant_type = fields[10]
            .parse::<usize>()
            .ok()
            .and_then(OAuthGrantType::from_ordinal)
            .ok_or_else(|| CompactError::Malformed(format!("grant type {}", fields[10])))?;

        let mut parts = fields[11].splitn(3, AUTHENTICATION_DELIMITER);
        let principal = parts.next().unwrap_or_default();
        let handlers = parts.next().unwrap_or_default();
        let credentials = parts.next().unwrap_or_default();

        let mut authentication = Authentication::builder(principal).authentication_date(created);
        for handler in handlers.split(LIST_DELIMITER).filter(|h| !h.is_empty()) {
            authentication = authentication.success(handler);
        }
        for credential in credentials.split(LIST_DELIMITER).filter(|c| !c.is_empty()) {
            authentication = authentication.credential(credential);
        }
        let authentication = authentication
            .build()
            .map_err(|e| CompactError::Malformed(e.to_string()))?;

        let code = OAuthCode::builder(token, service, client_id, authentication)
            .scopes(scopes)
            .code_challenge(fields[7], fields[8])
            .response_type(response_type)
            .grant_type(grant_type)
            .expiration_policy(policy)
            .creation_time(created)
            .build()
            .map_err(|e| CompactError::Malformed(e.to_string()))?;

        Ok(Ticket::from(code))
    }
}

/// `value` unchanged, or an error naming `field` if it holds a reserved character
fn plain<'a>(field: &'static str, value: &'a str, reserved: &[char]) -> Result<&'a str, CompactError> {
    if value.contains(|c: char| reserved.contains(&c) || c.is_control()) {
        return Err(CompactError::ReservedCharacter { field });
    }
    Ok(value)
}

fn policy_fields(policy: &ExpirationPolicy) -> Result<(String, String), CompactError> {
    match policy {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses,
            time_to_kill_seconds,
        } => Ok((number_of_uses.to_string(), time_to_kill_seconds.to_string())),
        ExpirationPolicy::HardTimeout { time_to_kill_seconds } => {
            Ok((String::new(), time_to_kill_seconds.to_string()))
        }
        ExpirationPolicy::NeverExpires => Ok((String::new(), String::new())),
        other => Err(CompactError::UnsupportedPolicy(other.name())),
    }
}

fn policy_from_fields(uses: &str, ttl: &str) -> Result<ExpirationPolicy, CompactError> {
    let number = |value: &str, what: &str| {
        value
            .parse::<u64>()
            .map_err(|_| CompactError::Malformed(format!("{} {}", what, value)))
    };

    match (uses.is_empty(), ttl.is_empty()) {
        (true, true) => Ok(ExpirationPolicy::NeverExpires),
        (true, false) => Ok(ExpirationPolicy::hard_timeout(number(ttl, "time to live")?)),
        (false, false) => Ok(ExpirationPolicy::multi_time_use_or_timeout(
            number(uses, "number of uses")?,
            number(ttl, "time to live")?,
        )),
        (false, true) => Err(CompactError::Malformed("number of uses without time to live".to_string())),
    }
}
