use serde::{Deserialize, Serialize};

/// Symmetric key length in bytes (MasterKey and EntityKey).
pub const KEY_LENGTH: usize = 32;

/// XChaCha20-Poly1305 nonce length in bytes (192 bits).
pub const NONCE_LENGTH: usize = 24;

/// Poly1305 tag length in bytes.
pub const TAG_LENGTH: usize = 16;

/// Smallest well-formed blob: `[nonce:24][ciphertext:0][tag:16]`.
pub const MIN_BLOB_LENGTH: usize = NONCE_LENGTH + TAG_LENGTH;

/// Argon2id salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// Known plaintext sealed under the master key to form a verification token.
pub const VERIFICATION_PASSPHRASE: &str = "fieldcase-master-key-verification";

/// A record's content and its wrapped entity key, both base64 at rest and on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub encrypted_content: String,
    pub encrypted_entity_key: String,
}

/// An attachment's bytes and its wrapped entity key, both base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFile {
    pub encrypted_file: String,
    pub encrypted_entity_key: String,
}
