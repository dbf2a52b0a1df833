//! Serialization and deserialization of sync [`Record`]s.
//!
//! Provides encode/decode functions using postcard, along with
//! length-prefix framing variants for stream-based transports.

use crate::message::MAX_MESSAGE_LENGTH;
use crate::record::{MAX_MESSAGE_IDS, Record};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is incomplete or has an invalid length prefix.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The record decoded but breaks a protocol limit.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Encodes a [`Record`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::InvalidRecord` if the record breaks a protocol limit,
/// or `CodecError::Serialization` if it cannot be serialized.
pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    check_limits(record)?;
    postcard::to_allocvec(record).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`Record`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized,
/// or `CodecError::InvalidRecord` if the decoded record breaks a protocol
/// limit.
pub fn decode(bytes: &[u8]) -> Result<Record, CodecError> {
    let record: Record =
        postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))?;
    check_limits(&record)?;
    Ok(record)
}

/// Encodes a [`Record`] with a 4-byte little-endian length prefix.
///
/// Wire format: `[u32 length (LE)][payload bytes]`
///
/// # Errors
///
/// Returns the errors of [`encode`], or `CodecError::InvalidFrame` if the
/// payload exceeds `u32::MAX` bytes.
pub fn encode_framed(record: &Record) -> Result<Vec<u8>, CodecError> {
    let payload = encode(record)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        CodecError::InvalidFrame(format!(
            "payload too large for framing: {} bytes",
            payload.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a length-prefixed frame back into a [`Record`].
///
/// Returns the decoded record and the total number of bytes consumed from
/// the input (including the 4-byte length prefix).
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the input is too short or the
/// length prefix indicates more data than available, or the errors of
/// [`decode`] for the payload.
pub fn decode_framed(bytes: &[u8]) -> Result<(Record, usize), CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::InvalidFrame(format!(
            "need at least 4 bytes for length prefix, got {}",
            bytes.len()
        )));
    }
    let len_bytes: [u8; 4] = bytes[..4]
        .try_into()
        .map_err(|_| CodecError::InvalidFrame("failed to read length prefix".into()))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let total_len = 4 + payload_len;
    if bytes.len() < total_len {
        return Err(CodecError::InvalidFrame(format!(
            "frame indicates {} bytes but only {} available",
            payload_len,
            bytes.len() - 4
        )));
    }

    let record = decode(&bytes[4..total_len])?;
    Ok((record, total_len))
}

fn check_limits(record: &Record) -> Result<(), CodecError> {
    match record {
        Record::Message(raw) => {
            if raw.is_empty() || raw.len() > MAX_MESSAGE_LENGTH {
                return Err(CodecError::InvalidRecord(format!(
                    "message length {} outside 1..={MAX_MESSAGE_LENGTH}",
                    raw.len()
                )));
            }
        }
        other => {
            let count = other.message_ids().len();
            if count == 0 || count > MAX_MESSAGE_IDS {
                return Err(CodecError::InvalidRecord(format!(
                    "{count} message ids outside 1..={MAX_MESSAGE_IDS}"
                )));
            }
        }
    }
    Ok(())
}
