//! Ticket encodings
//!
//! - [`table`]: deterministic type registration and the frame header
//! - [`serializer`]: framed bincode encoding of tickets and embedded values
//! - [`pool`]: bounded, borrow-and-return pool of serializers
//! - [`compact`]: self-contained string form of short-lived tickets
//! - [`cipher`]: optional encryption of frames at rest

pub mod cipher;
pub mod compact;
pub mod pool;
pub mod serializer;
pub mod table;

pub use cipher::TicketCipher;
pub use compact::{OAuthCodeCompactor, TicketCompactor};
pub use pool::{PooledSerializer, SerializerPool, DEFAULT_POOL_CAPACITY};
pub use serializer::TicketSerializer;
pub use table::{RegisteredType, TypeTable, TypeTableBuilder};
