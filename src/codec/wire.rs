//! Transport-safe text encoding of binary frames

use base64::Engine;

use crate::error::CodecError;

/// Encode binary payload as standard base64
pub fn to_wire_format(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a standard base64 payload
pub fn from_wire_format(text: &str) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| CodecError::InvalidWireEncoding(e.to_string()))
}
