//! Argon2id master key derivation.
//!
//! The salt is a deployment-wide constant rather than per-user: the same
//! password always derives the same master key, which the verification token
//! flow depends on. Changing [`DEPLOYMENT_SALT`] or the default parameters
//! makes all existing encrypted data unreadable.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::codec::escape;
use crate::error::CryptoError;
use crate::keys::MasterKey;
use crate::types::{KEY_LENGTH, SALT_LENGTH};

/// Fixed 16-byte salt shared by every client of a deployment.
pub const DEPLOYMENT_SALT: [u8; SALT_LENGTH] = *b"fieldcase:kdf:v1";

/// Argon2id cost parameters. Must match between client and any verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Iteration count (Argon2 `t_cost`).
    pub ops_limit: u32,
    /// Memory cost in MiB; converted to KiB for Argon2.
    pub memory_mb: u32,
    /// Lanes (Argon2 `p_cost`).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            ops_limit: 3,
            memory_mb: 64,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params, CryptoError> {
        let m_cost = self.memory_mb.checked_mul(1024).ok_or_else(|| {
            CryptoError::KeyDerivation(format!("memory cost {} MiB overflows", self.memory_mb))
        })?;
        Params::new(m_cost, self.ops_limit, self.parallelism, Some(KEY_LENGTH))
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid parameters: {e}")))
    }
}

/// Derive the 32-byte master key from a password.
///
/// The password is escaped with the content codec first so the derived bytes
/// depend only on the password's code points.
pub fn derive_master_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<MasterKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::KeyDerivation("password is empty".into()));
    }
    if salt.len() != SALT_LENGTH {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be {SALT_LENGTH} bytes, got {}",
            salt.len()
        )));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let escaped = Zeroizing::new(escape(password));
    let mut output = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(escaped.as_bytes(), salt, &mut output[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(MasterKey::from_bytes(*output))
}
