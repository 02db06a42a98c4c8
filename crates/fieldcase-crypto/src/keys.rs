//! Master and entity key types, and entity-key wrapping.
//!
//! Each record (or file) gets a random 256-bit entity key. The entity key is
//! wrapped under the session's master key with the same sealing primitive as
//! content, so a wrapped key is a 72-byte blob: [nonce:24][key:32][tag:16].

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::{open, seal};
use crate::error::CryptoError;
use crate::types::KEY_LENGTH;

/// Password-derived key held by the authenticated session. Never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LENGTH]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Per-record content key. Only its wrapped form may leave memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EntityKey([u8; KEY_LENGTH]);

impl EntityKey {
    /// Generate a random 256-bit entity key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LENGTH];
        getrandom::getrandom(&mut key).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH,
            got: bytes.len(),
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for EntityKey {}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntityKey(<redacted>)")
    }
}

/// Seal an entity key under the master key.
pub fn wrap_entity_key(
    entity_key: &EntityKey,
    master_key: &MasterKey,
) -> Result<Vec<u8>, CryptoError> {
    seal(master_key.as_bytes(), entity_key.as_bytes())
}

/// Open a wrapped entity key with the master key.
pub fn unwrap_entity_key(wrapped: &[u8], master_key: &MasterKey) -> Result<EntityKey, CryptoError> {
    let raw = open(master_key.as_bytes(), wrapped)?;
    EntityKey::from_slice(&raw)
}
