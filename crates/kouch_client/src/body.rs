//! Response bodies kept as the server sent them.

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use serde_json::Value;

/// A JSON response body: the bytes on the wire and their parsed form.
///
/// Decoding into a [`Value`] loses key order, whitespace and number spelling,
/// so callers that echo a response keep the bytes alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJson {
    bytes: Bytes,
    value: Value,
}

impl RawJson {
    /// Parses a response body, keeping the original bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> ClientResult<Self> {
        let bytes = bytes.into();
        let value = serde_json::from_slice(&bytes).map_err(|e| ClientError::Data(e.to_string()))?;
        Ok(Self { bytes, value })
    }

    /// Wraps a value built locally; the bytes are its compact encoding.
    pub fn from_value(value: Value) -> Self {
        Self {
            bytes: Bytes::from(value.to_string()),
            value,
        }
    }

    /// The body as received.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The parsed body.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the body, returning the parsed form.
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl From<Value> for RawJson {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}
