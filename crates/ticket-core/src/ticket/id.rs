//! Ticket id generation

use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

use super::TicketKind;

/// Source of globally unique ticket ids
pub trait UniqueTicketIdGenerator: Send + Sync {
    /// New id of the form `<PREFIX>-<sequence>-<random>[-<suffix>]`
    fn new_ticket_id(&self, prefix: &str) -> String;

    fn new_id_for(&self, kind: TicketKind) -> String {
        self.new_ticket_id(kind.prefix())
    }
}

/// Sequence plus random alphanumeric id generator, with an optional node
/// suffix so ids from different cluster members never collide
#[derive(Debug)]
pub struct DefaultUniqueTicketIdGenerator {
    sequence: AtomicU64,
    random_length: usize,
    suffix: Option<String>,
}

impl DefaultUniqueTicketIdGenerator {
    pub const DEFAULT_RANDOM_LENGTH: usize = 32;

    pub fn new() -> Self {
        Self::with_settings(Self::DEFAULT_RANDOM_LENGTH, None)
    }

    pub fn with_settings(random_length: usize, suffix: Option<String>) -> Self {
        Self {
            sequence: AtomicU64::new(1),
            random_length: random_length.max(1),
            suffix: suffix.filter(|s| !s.trim().is_empty()),
        }
    }
}

impl Default for DefaultUniqueTicketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UniqueTicketIdGenerator for DefaultUniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.random_length)
            .map(char::from)
            .collect();

        match &self.suffix {
            Some(suffix) => format!("{}-{}-{}-{}", prefix, sequence, random, suffix),
            None => format!("{}-{}-{}", prefix, sequence, random),
        }
    }
}
