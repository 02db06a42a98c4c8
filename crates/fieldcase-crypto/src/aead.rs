//! XChaCha20-Poly1305 sealing.
//!
//! Blob wire format: [24 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//! The nonce is drawn from the OS RNG on every call; callers never supply one.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::types::{KEY_LENGTH, MIN_BLOB_LENGTH, NONCE_LENGTH};

/// Generate a random 24-byte nonce.
pub fn generate_nonce() -> Result<[u8; NONCE_LENGTH], CryptoError> {
    let mut nonce = [0u8; NONCE_LENGTH];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(nonce)
}

fn cipher(key: &[u8]) -> Result<XChaCha20Poly1305, CryptoError> {
    if key.len() != KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH,
            got: key.len(),
        });
    }
    XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_LENGTH,
        got: key.len(),
    })
}

/// Encrypt `plaintext` under a 32-byte key, prepending a fresh nonce.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    let nonce_bytes = generate_nonce()?;
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Verify and decrypt a `[nonce][ciphertext][tag]` blob.
///
/// Blobs shorter than [`MIN_BLOB_LENGTH`] are rejected as malformed before
/// the tag is checked.
pub fn open(key: &[u8], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < MIN_BLOB_LENGTH {
        return Err(CryptoError::MalformedCiphertext {
            got: blob.len(),
            min: MIN_BLOB_LENGTH,
        });
    }
    let cipher = cipher(key)?;
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LENGTH);
    let nonce = XNonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decryption)?;
    Ok(Zeroizing::new(plaintext))
}
