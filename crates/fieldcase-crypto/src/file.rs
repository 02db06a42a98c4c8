//! Envelope encryption for binary attachments.
//!
//! Same layout as record payloads, but the bytes are sealed directly without
//! the text codec. Every file gets a new entity key.

use zeroize::Zeroizing;

use crate::aead::{open, seal};
use crate::base64::{base64_decode, base64_encode};
use crate::error::CryptoError;
use crate::keys::{unwrap_entity_key, wrap_entity_key, EntityKey, MasterKey};
use crate::types::EncryptedFile;

pub fn encrypt_file(file_bytes: &[u8], master_key: &MasterKey) -> Result<EncryptedFile, CryptoError> {
    let entity_key = EntityKey::generate()?;
    let blob = seal(entity_key.as_bytes(), file_bytes)?;
    let wrapped = wrap_entity_key(&entity_key, master_key)?;
    Ok(EncryptedFile {
        encrypted_file: base64_encode(&blob),
        encrypted_entity_key: base64_encode(&wrapped),
    })
}

pub fn decrypt_file(
    encrypted_file: &str,
    encrypted_entity_key: &str,
    master_key: &MasterKey,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let wrapped = base64_decode(encrypted_entity_key)?;
    let entity_key = unwrap_entity_key(&wrapped, master_key)?;
    let blob = base64_decode(encrypted_file)?;
    open(entity_key.as_bytes(), &blob)
}
