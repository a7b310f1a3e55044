//! Error types for protocol parsing.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while parsing protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Revision id is not of the form `<N>-<hash>`.
    #[error("invalid revision id: {0:?}")]
    InvalidRevision(String),

    /// Document body is not a JSON object or lacks a required member.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Malformed changes feed response.
    #[error("malformed changes feed: {0}")]
    MalformedFeed(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(String),
}

impl ProtocolError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument(message.into())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
