//! Framed bincode serializer
//!
//! A serializer owns a scratch buffer that is reused between calls, which is
//! why instances are pooled instead of shared.

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use super::table::{RegisteredType, TypeTable};
use crate::error::CodecError;
use crate::ticket::{OAuthCode, ServiceTicket, Ticket, TicketGrantingTicket, TicketKind};

/// Reusable encoding context bound to one [`TypeTable`]
#[derive(Debug)]
pub struct TicketSerializer {
    table: Arc<TypeTable>,
    buffer: Vec<u8>,
}

impl TicketSerializer {
    pub fn new(table: Arc<TypeTable>) -> Self {
        Self {
            table,
            buffer: Vec::with_capacity(512),
        }
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }

    /// Frame a single value under its registered name
    pub fn encode<T: RegisteredType>(&mut self, value: &T) -> Result<Vec<u8>, CodecError> {
        self.write_frame(T::TYPE_NAME, value)
    }

    /// Read a frame expected to hold a `T`
    pub fn decode<T: RegisteredType>(&self, frame: &[u8]) -> Result<T, CodecError> {
        let (name, body) = self.table.read_header(frame)?;
        if name != T::TYPE_NAME {
            return Err(CodecError::UnexpectedType {
                expected: T::TYPE_NAME.to_string(),
                found: name.to_string(),
            });
        }
        Ok(bincode::deserialize(body)?)
    }

    /// Frame a ticket under the name of its kind
    pub fn encode_ticket(&mut self, ticket: &Ticket) -> Result<Vec<u8>, CodecError> {
        let name = ticket.kind().type_name();
        match ticket {
            Ticket::TicketGranting(t) | Ticket::ProxyGranting(t) => self.write_frame(name, t),
            Ticket::Service(t) | Ticket::Proxy(t) => self.write_frame(name, t),
            Ticket::OAuthCode(t) => self.write_frame(name, t),
        }
    }

    pub fn decode_ticket(&self, frame: &[u8]) -> Result<Ticket, CodecError> {
        let (name, body) = self.table.read_header(frame)?;
        let kind = TicketKind::from_type_name(name).ok_or_else(|| CodecError::UnexpectedType {
            expected: "ticket".to_string(),
            found: name.to_string(),
        })?;

        let ticket = match kind {
            TicketKind::TicketGrantingTicket | TicketKind::ProxyGrantingTicket => {
                Ticket::from(bincode::deserialize::<TicketGrantingTicket>(body)?)
            }
            TicketKind::ServiceTicket | TicketKind::ProxyTicket => {
                Ticket::from(bincode::deserialize::<ServiceTicket>(body)?)
            }
            TicketKind::OAuthCode => Ticket::from(bincode::deserialize::<OAuthCode>(body)?),
        };

        if ticket.kind() != kind {
            return Err(CodecError::UnexpectedType {
                expected: kind.type_name().to_string(),
                found: ticket.kind().type_name().to_string(),
            });
        }
        Ok(ticket)
    }

    fn write_frame<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<Vec<u8>, CodecError> {
        self.buffer.clear();
        self.table.write_header(name, &mut self.buffer)?;
        bincode::serialize_into(&mut self.buffer, value)?;
        trace!("Framed [{}] in {} bytes", name, self.buffer.len());
        Ok(self.buffer.clone())
    }
}
