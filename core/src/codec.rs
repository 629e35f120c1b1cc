//! JSON wire format for order records.
//!
//! The payload is the camelCase JSON object produced by serde from
//! [`OrderRecord`]; `createdAt` is an RFC 3339 timestamp.

use crate::order::OrderRecord;
use thiserror::Error;

/// Content type carried on every published order.
pub const CONTENT_TYPE: &str = "application/json";

/// Errors encoding or decoding an order payload.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The record could not be serialized.
    #[error("Failed to encode order: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a valid order document.
    #[error("Failed to decode order: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize an order for publication.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode(order: &OrderRecord) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(order).map_err(CodecError::Encode)
}

/// Deserialize a delivered payload.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the payload is not valid JSON or does not
/// match the order schema.
pub fn decode(payload: &[u8]) -> Result<OrderRecord, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::Decode)
}

/// Render a payload for logging, replacing invalid UTF-8.
#[must_use]
pub fn payload_for_log(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
