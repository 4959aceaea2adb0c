//! Error types for ticket, registry and codec operations

use thiserror::Error;

use crate::ticket::TicketKind;

/// Stable error code reported when a service ticket is presented for a
/// service other than the one it was issued to.
pub const INVALID_SERVICE_CODE: &str = "INVALID_SERVICE";

/// Errors raised by the ticket model and the registry's mutating operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketError {
    #[error("Unable to create ticket: {0}")]
    TicketCreation(String),

    #[error("Ticket {0} has already granted a proxy-granting ticket")]
    ProxyGrantingTicketAlreadyGranted(String),

    #[error("Ticket {0} is expired")]
    Expired(String),

    #[error("Ticket {0} not found")]
    NotFound(String),

    #[error("Ticket {id} is of type {actual} when {expected} was expected")]
    TypeMismatch {
        id: String,
        actual: TicketKind,
        expected: TicketKind,
    },

    #[error("Service {service} is not recognized for this ticket [{code}]")]
    UnrecognizableService { service: String, code: &'static str },
}

impl TicketError {
    pub fn unrecognizable_service(service: impl Into<String>) -> Self {
        TicketError::UnrecognizableService {
            service: service.into(),
            code: INVALID_SERVICE_CODE,
        }
    }

    /// Whether the caller can map this error to a failure response and carry on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TicketError::UnrecognizableService { .. }
                | TicketError::Expired(_)
                | TicketError::NotFound(_)
        )
    }
}

/// Errors raised while framing tickets for a backing store
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Type {0} is not registered with the serializer table")]
    UnregisteredType(String),

    #[error("Unknown type id {0}")]
    UnknownTypeId(u16),

    #[error("Frame was written by a node with type table {found}, local table is {expected}")]
    TableMismatch { expected: String, found: String },

    #[error("Frame holds {found} when {expected} was expected")]
    UnexpectedType { expected: String, found: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Serializer pool exhausted after waiting {0:?}")]
    PoolExhausted(std::time::Duration),

    #[error("Serializer pool is closed")]
    PoolClosed,

    #[error("Invalid ticket encryption key: {0}")]
    InvalidKey(String),

    #[error("Ticket payload could not be decrypted")]
    Decryption,

    #[error("Ticket payload could not be encrypted")]
    Encryption,

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Errors raised by the compact ticket codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactError {
    #[error("Compacted ticket is {length} characters, maximum is {max}")]
    TooLong { length: usize, max: usize },

    #[error("Field {field} contains a reserved character")]
    ReservedCharacter { field: &'static str },

    #[error("Malformed compact ticket: {0}")]
    Malformed(String),

    #[error("Ticket kind {0} cannot be compacted by this codec")]
    UnsupportedTicket(TicketKind),

    #[error("Expiration policy {0} cannot be compacted")]
    UnsupportedPolicy(&'static str),
}

/// Errors raised by an external ticket store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Ticket store unavailable: {0}")]
    Unavailable(String),

    #[error("Ticket store operation failed: {0}")]
    Operation(String),
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Crate level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compact(#[from] CompactError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
