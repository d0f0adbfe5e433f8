//! Wire format: one JSON object per text frame.
//!
//! Outbound frames are [`ClientMessage`] envelopes, inbound frames are
//! [`ServerMessage`] envelopes. The peer's greeting is plain text and is
//! never passed through this codec.

use rps_types::{ClientMessage, ServerMessage};

use crate::error::ProtocolError;

/// Maximum inbound frame length (64 KiB). Anything longer is malformed.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Encode a request as a JSON text frame.
pub fn encode_request(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Decode a response frame.
///
/// Fails with [`ProtocolError::Malformed`] unless the frame is a JSON object
/// with exactly one of the keys `Result` or `Error` in the expected shape.
pub fn decode_response(frame: &str) -> Result<ServerMessage, ProtocolError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Malformed(format!(
            "frame size {} exceeds maximum {MAX_FRAME_LEN}",
            frame.len()
        )));
    }
    serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
