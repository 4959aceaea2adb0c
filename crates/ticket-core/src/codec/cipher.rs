//! Encryption of stored ticket frames
//!
//! Frames are sealed with AES-256-GCM. The stored value is the random
//! 12-byte nonce followed by the ciphertext and its tag, so a node holding
//! a different key, or a tampered value, fails authentication instead of
//! decoding garbage.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::CodecError;

/// Nonce length of AES-GCM
pub const NONCE_LEN: usize = 12;

/// Key length of AES-256
pub const KEY_LEN: usize = 32;

/// Symmetric cipher applied to frames before they reach a store
#[derive(Clone)]
pub struct TicketCipher {
    cipher: Aes256Gcm,
}

impl TicketCipher {
    /// Create a cipher from a raw 32-byte key
    pub fn new(key: &[u8]) -> Result<Self, CodecError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CodecError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, key.len())))?;
        Ok(Self { cipher })
    }

    /// Create a cipher from a hex-encoded 32-byte key
    pub fn from_hex_key(key: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(key.trim()).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        Self::new(&bytes)
    }

    /// Seal `plaintext` under a fresh nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CodecError::Encryption)?;

        let mut value = Vec::with_capacity(NONCE_LEN + sealed.len());
        value.extend_from_slice(&nonce);
        value.extend_from_slice(&sealed);
        Ok(value)
    }

    /// Open a value produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, value: &[u8]) -> Result<Vec<u8>, CodecError> {
        if value.len() < NONCE_LEN {
            return Err(CodecError::MalformedFrame(format!(
                "encrypted value of {} bytes is shorter than its nonce",
                value.len()
            )));
        }
        let (nonce, sealed) = value.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CodecError::Decryption)
    }
}

impl fmt::Debug for TicketCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TicketCipher(AES-256-GCM)")
    }
}
