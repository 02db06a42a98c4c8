//! Envelope encryption for case records and attachments.
//!
//! A password-derived [`MasterKey`] wraps a fresh [`EntityKey`] per record or
//! file; the entity key encrypts the content. Textual payloads pass through
//! the [`codec`] before encryption.

pub mod aead;
pub mod base64;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod file;
pub mod kdf;
pub mod keys;
pub mod types;

pub use aead::{open, seal};
pub use base64::{base64_decode, base64_encode};
pub use envelope::{
    create_verification_token, decrypt, encrypt, verify_master_key, DecryptedContent,
};
pub use error::CryptoError;
pub use file::{decrypt_file, encrypt_file};
pub use kdf::{derive_master_key, KdfParams, DEPLOYMENT_SALT};
pub use keys::{unwrap_entity_key, wrap_entity_key, EntityKey, MasterKey};
pub use types::{
    EncryptedFile, EncryptedPayload, KEY_LENGTH, MIN_BLOB_LENGTH, NONCE_LENGTH, SALT_LENGTH,
    TAG_LENGTH, VERIFICATION_PASSPHRASE,
};
