//! Registration table and frame format
//!
//! Every node must build the same table, so names are kept in sorted order
//! and ids are assigned from that order rather than from registration order.
//! The table fingerprint travels in each frame; a node reading a frame written
//! against a different table refuses it instead of decoding garbage.
//!
//! Frame layout:
//!
//! ```text
//! +-------+--------------+---------+----------------------+----------------+
//! | magic | fingerprint  | type id | [name len | name]    | bincode body   |
//! | u8    | 8 bytes      | u16 BE  | only when id is 0    |                |
//! +-------+--------------+---------+----------------------+----------------+
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::CodecError;
use crate::expiration::ExpirationPolicy;
use crate::ticket::{Authentication, OAuthCode, Service, ServiceTicket, TicketGrantingTicket, TicketKind};

/// First byte of every frame
pub const FRAME_MAGIC: u8 = 0xCA;

/// Type id marking a frame whose type name is written inline
pub const UNREGISTERED_TYPE_ID: u16 = 0;

/// Ids below this are reserved
const FIRST_TYPE_ID: u16 = 16;

const FINGERPRINT_LEN: usize = 8;
const HEADER_LEN: usize = 1 + FINGERPRINT_LEN + 2;

/// Type that can be written to a frame under a stable name
pub trait RegisteredType: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

impl RegisteredType for TicketGrantingTicket {
    const TYPE_NAME: &'static str = "TicketGrantingTicket";
}

impl RegisteredType for ServiceTicket {
    const TYPE_NAME: &'static str = "ServiceTicket";
}

impl RegisteredType for OAuthCode {
    const TYPE_NAME: &'static str = "OAuthCode";
}

impl RegisteredType for Authentication {
    const TYPE_NAME: &'static str = "Authentication";
}

impl RegisteredType for Service {
    const TYPE_NAME: &'static str = "Service";
}

impl RegisteredType for ExpirationPolicy {
    const TYPE_NAME: &'static str = "ExpirationPolicy";
}

/// Deterministic name to id table
#[derive(Clone)]
pub struct TypeTable {
    names: Vec<String>,
    ids: HashMap<String, u16>,
    fingerprint: [u8; FINGERPRINT_LEN],
    registration_required: bool,
}

impl TypeTable {
    pub fn builder() -> TypeTableBuilder {
        TypeTableBuilder::default()
    }

    /// Table holding every ticket kind plus the values tickets embed
    pub fn with_ticket_types() -> TypeTableBuilder {
        let mut builder = TypeTable::builder();
        for kind in TicketKind::ALL {
            builder = builder.register_name(kind.type_name());
        }
        builder
            .register::<Authentication>()
            .register::<Service>()
            .register::<ExpirationPolicy>()
    }

    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    pub fn name_of(&self, id: u16) -> Option<&str> {
        let index = id.checked_sub(FIRST_TYPE_ID)?;
        self.names.get(usize::from(index)).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_registration_required(&self) -> bool {
        self.registration_required
    }

    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        self.fingerprint
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Write the frame header for `name` into `buffer`
    pub(crate) fn write_header(&self, name: &str, buffer: &mut Vec<u8>) -> Result<(), CodecError> {
        buffer.push(FRAME_MAGIC);
        buffer.extend_from_slice(&self.fingerprint);

        match self.id_of(name) {
            Some(id) => buffer.extend_from_slice(&id.to_be_bytes()),
            None if self.registration_required => {
                return Err(CodecError::UnregisteredType(name.to_string()));
            }
            None => {
                warn!("Type [{}] is not registered, writing its name inline", name);
                let length = u16::try_from(name.len())
                    .map_err(|_| CodecError::MalformedFrame(format!("type name {} is too long", name)))?;
                buffer.extend_from_slice(&UNREGISTERED_TYPE_ID.to_be_bytes());
                buffer.extend_from_slice(&length.to_be_bytes());
                buffer.extend_from_slice(name.as_bytes());
            }
        }
        Ok(())
    }

    /// Split a frame into its type name and body
    pub(crate) fn read_header<'a>(&'a self, frame: &'a [u8]) -> Result<(&'a str, &'a [u8]), CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::MalformedFrame(format!(
                "frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }
        if frame[0] != FRAME_MAGIC {
            return Err(CodecError::MalformedFrame(format!("bad magic byte {:#04x}", frame[0])));
        }

        let fingerprint = &frame[1..1 + FINGERPRINT_LEN];
        if fingerprint != self.fingerprint {
            return Err(CodecError::TableMismatch {
                expected: self.fingerprint_hex(),
                found: hex::encode(fingerprint),
            });
        }

        let id = u16::from_be_bytes([frame[1 + FINGERPRINT_LEN], frame[2 + FINGERPRINT_LEN]]);
        let rest = &frame[HEADER_LEN..];
        if id != UNREGISTERED_TYPE_ID {
            let name = self.name_of(id).ok_or(CodecError::UnknownTypeId(id))?;
            return Ok((name, rest));
        }

        if rest.len() < 2 {
            return Err(CodecError::MalformedFrame("missing inline type name".to_string()));
        }
        let length = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
        let name_bytes = rest
            .get(2..2 + length)
            .ok_or_else(|| CodecError::MalformedFrame("truncated inline type name".to_string()))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|e| CodecError::MalformedFrame(format!("inline type name: {}", e)))?;
        if self.registration_required {
            return Err(CodecError::UnregisteredType(name.to_string()));
        }
        Ok((name, &rest[2 + length..]))
    }
}

impl fmt::Debug for TypeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTable")
            .field("names", &self.names)
            .field("fingerprint", &self.fingerprint_hex())
            .field("registration_required", &self.registration_required)
            .finish()
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        TypeTable::with_ticket_types().build()
    }
}

/// Collects names before ids are assigned
#[derive(Debug, Default, Clone)]
pub struct TypeTableBuilder {
    names: BTreeSet<String>,
    registration_required: bool,
}

impl TypeTableBuilder {
    pub fn register<T: RegisteredType>(self) -> Self {
        self.register_name(T::TYPE_NAME)
    }

    pub fn register_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    /// Refuse to write or read types missing from the table
    pub fn registration_required(mut self, required: bool) -> Self {
        self.registration_required = required;
        self
    }

    pub fn build(self) -> TypeTable {
        let names: Vec<String> = self.names.into_iter().collect();

        let mut hasher = Sha256::new();
        for name in &names {
            hasher.update(name.as_bytes());
            hasher.update([b'\n']);
        }
        let digest = hasher.finalize();
        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        fingerprint.copy_from_slice(&digest[..FINGERPRINT_LEN]);

        let ids = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), FIRST_TYPE_ID + index as u16))
            .collect();

        debug!(
            "Built type table with {} entries, fingerprint {}",
            names.len(),
            hex::encode(fingerprint)
        );

        TypeTable {
            names,
            ids,
            fingerprint,
            registration_required: self.registration_required,
        }
    }
}
