use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Malformed ciphertext: {got} bytes is below the {min}-byte minimum")]
    MalformedCiphertext { got: usize, min: usize },

    #[error("Decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
