//! # Hex Encoding/Decoding Utilities
//!
//! Enhanced hex encoding and decoding functions used throughout the DTE and
//! WALE implementations for packet tracing, debugging and test vectors.
//!
//! ## Usage
//!
//! ```rust
//! use minutemodem::util::hex::{encode_hex, decode_hex, pretty_hex};
//!
//! let data = [0x49, 0x50, 0x55, 0x04];
//! assert_eq!(encode_hex(&data), "49505504");
//!
//! let decoded = decode_hex("49 50 55 04").unwrap();
//! assert_eq!(decoded, data);
//!
//! println!("{}", pretty_hex(&data, 16));
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.is_empty() {
        return Err(HexError::EmptyString);
    }

    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format bytes as a spaced hex dump with `per_line` bytes per row.
///
/// Intended for packet traces at debug level.
pub fn pretty_hex(data: &[u8], per_line: usize) -> String {
    let per_line = per_line.max(1);
    let mut out = String::with_capacity(data.len() * 3 + data.len() / per_line + 1);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            if i % per_line == 0 {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = [0x00, 0x7F, 0xFF];
        assert_eq!(decode_hex(&encode_hex(&data)).unwrap(), data);
    }

    #[test]
    fn rejects_odd_length() {
        assert_eq!(decode_hex("abc"), Err(HexError::OddLength(3)));
    }

    #[test]
    fn strips_whitespace() {
        assert_eq!(decode_hex("49 50 55").unwrap(), vec![0x49, 0x50, 0x55]);
    }

    #[test]
    fn pretty_wraps_lines() {
        let dump = pretty_hex(&[1, 2, 3, 4, 5], 2);
        assert_eq!(dump, "01 02\n03 04\n05");
    }
}
