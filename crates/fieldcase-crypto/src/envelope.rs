//! Envelope encryption for textual record payloads.
//!
//! Push: codec::encode → seal(entity key) → base64, entity key → seal(master key) → base64
//! Pull: unwrap entity key → open → codec::decode

use zeroize::Zeroizing;

use crate::aead::{open, seal};
use crate::base64::{base64_decode, base64_encode};
use crate::codec;
use crate::error::CryptoError;
use crate::keys::{unwrap_entity_key, wrap_entity_key, EntityKey, MasterKey};
use crate::types::{EncryptedPayload, VERIFICATION_PASSPHRASE};

/// Plaintext recovered from a payload together with its entity key, so an
/// edited record can be re-encrypted under the same key.
#[derive(Debug)]
pub struct DecryptedContent {
    pub plaintext: String,
    pub entity_key: EntityKey,
}

/// Encrypt a textual payload.
///
/// A fresh entity key is generated when `entity_key` is `None`.
pub fn encrypt(
    plaintext: &str,
    entity_key: Option<&EntityKey>,
    master_key: &MasterKey,
) -> Result<EncryptedPayload, CryptoError> {
    let entity_key = match entity_key {
        Some(key) => key.clone(),
        None => EntityKey::generate()?,
    };

    let encoded = Zeroizing::new(codec::encode(plaintext));
    let content = seal(entity_key.as_bytes(), encoded.as_bytes())?;
    let wrapped = wrap_entity_key(&entity_key, master_key)?;

    Ok(EncryptedPayload {
        encrypted_content: base64_encode(&content),
        encrypted_entity_key: base64_encode(&wrapped),
    })
}

/// Decrypt a payload produced by [`encrypt`].
pub fn decrypt(
    encrypted_content: &str,
    encrypted_entity_key: &str,
    master_key: &MasterKey,
) -> Result<DecryptedContent, CryptoError> {
    let wrapped = base64_decode(encrypted_entity_key)?;
    let entity_key = unwrap_entity_key(&wrapped, master_key)?;

    let blob = base64_decode(encrypted_content)?;
    let encoded = open(entity_key.as_bytes(), &blob)?;
    let encoded = std::str::from_utf8(&encoded)
        .map_err(|e| CryptoError::Encoding(format!("decrypted content is not text: {e}")))?;
    let plaintext = codec::decode(encoded)?;

    Ok(DecryptedContent {
        plaintext,
        entity_key,
    })
}

/// Seal the fixed verification passphrase under the master key.
pub fn create_verification_token(master_key: &MasterKey) -> Result<String, CryptoError> {
    let blob = seal(master_key.as_bytes(), VERIFICATION_PASSPHRASE.as_bytes())?;
    Ok(base64_encode(&blob))
}

/// Check a candidate master key against a verification token.
///
/// This is the one place a decryption failure is reported as a value instead
/// of an error: a wrong password is an expected outcome here. Every failure,
/// including a malformed token, yields `false`.
pub fn verify_master_key(verification_token: &str, master_key: &MasterKey) -> bool {
    let Ok(blob) = base64_decode(verification_token) else {
        return false;
    };
    match open(master_key.as_bytes(), &blob) {
        Ok(plaintext) => plaintext.as_slice() == VERIFICATION_PASSPHRASE.as_bytes(),
        Err(_) => false,
    }
}
