//! Text-safe content codec.
//!
//! `encode` escapes a string into a restricted ASCII range and then renders it
//! as base64. Every UTF-8 byte outside `[A-Za-z0-9-_.!~*'()]` becomes `%XX`,
//! which covers non-ASCII code points, the `%` sentinel itself and path
//! separators. `decode` is the exact inverse.

use crate::base64::{base64_decode, base64_encode};
use crate::error::CryptoError;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

/// Escape a string to unreserved ASCII plus `%XX` sequences.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX_UPPER[(byte >> 4) as usize] as char);
            out.push(HEX_UPPER[(byte & 0x0f) as usize] as char);
        }
    }
    out
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Reverse [`escape`].
pub fn unescape(input: &str) -> Result<String, CryptoError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => {
                        return Err(CryptoError::Encoding(format!(
                            "invalid escape sequence at offset {i}"
                        )))
                    }
                }
                i += 3;
            }
            byte if byte.is_ascii() => {
                out.push(byte);
                i += 1;
            }
            _ => {
                return Err(CryptoError::Encoding(format!(
                    "unescaped non-ASCII byte at offset {i}"
                )))
            }
        }
    }
    String::from_utf8(out).map_err(|e| CryptoError::Encoding(format!("invalid UTF-8: {e}")))
}

/// Escape then base64-encode a textual payload.
pub fn encode(input: &str) -> String {
    base64_encode(escape(input).as_bytes())
}

/// Inverse of [`encode`].
pub fn decode(encoded: &str) -> Result<String, CryptoError> {
    let bytes = base64_decode(encoded)?;
    let escaped = std::str::from_utf8(&bytes)
        .map_err(|e| CryptoError::Encoding(format!("escaped content is not ASCII: {e}")))?;
    unescape(escaped)
}
