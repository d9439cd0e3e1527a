//! Codec for encoding and decoding Parley frames.
//!
//! Text WebSocket messages carry one JSON frame each. Binary messages carry
//! MessagePack with a length prefix so several frames can share a buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum binary frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Which WebSocket message flavour a peer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON in text messages.
    #[default]
    Text,
    /// Length-prefixed MessagePack in binary messages.
    Binary,
}

/// Encode a frame as a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a frame to length-prefixed MessagePack.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_binary<T: Serialize>(frame: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<T: Serialize>(frame: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);

    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ClientFrame, ServerFrame};

    #[test]
    fn test_text_encoding_is_plain_json() {
        let text = encode_text(&ServerFrame::pong(Some(7))).unwrap();
        assert_eq!(text, r#"{"type":"pong","timestamp":7}"#);

        let frame: ClientFrame = decode_text(r#"{"type":"typing_stop"}"#).unwrap();
        assert_eq!(frame, ClientFrame::TypingStop);
    }

    #[test]
    fn test_decode_text_rejects_unknown_type() {
        let result: Result<ClientFrame, _> = decode_text(r#"{"type":"send_message"}"#);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_binary_frame_decodes_back() {
        let frame = ServerFrame::typing("7", "carol", true);
        let encoded = encode_binary(&frame).unwrap();
        let decoded: ServerFrame = decode_binary(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode_binary(&ClientFrame::TypingStart).unwrap();

        match decode_binary::<ClientFrame>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut data = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]);

        match decode_binary::<ClientFrame>(&data) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let mut buf = BytesMut::new();
        encode_into(&ClientFrame::TypingStart, &mut buf).unwrap();
        encode_into(&ClientFrame::Ping { timestamp: Some(3) }, &mut buf).unwrap();

        let first: ClientFrame = decode_from(&mut buf).unwrap().unwrap();
        let second: ClientFrame = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(first, ClientFrame::TypingStart);
        assert_eq!(second, ClientFrame::Ping { timestamp: Some(3) });
        assert!(buf.is_empty());
        assert!(decode_from::<ClientFrame>(&mut buf).unwrap().is_none());
    }
}
