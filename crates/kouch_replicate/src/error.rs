//! Error types for replication.

use kouch_client::{exit, ClientError};
use kouch_protocol::ProtocolError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicateResult<T> = Result<T, ReplicateError>;

/// Errors that can occur during replication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicateError {
    /// An error reported by the source or target database.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A malformed value was received.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid options or arguments.
    #[error("{0}")]
    Usage(String),

    /// The caller canceled the replication.
    #[error("replication canceled")]
    Canceled,
}

impl ReplicateError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Returns true if rerunning the replication may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReplicateError::Client(e) if e.is_transient())
    }

    /// Returns true if the replication was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            ReplicateError::Canceled | ReplicateError::Client(ClientError::Canceled)
        )
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReplicateError::Client(e) => e.exit_code(),
            ReplicateError::Protocol(_) => exit::DATA,
            ReplicateError::Usage(_) => exit::USAGE,
            ReplicateError::Canceled => exit::UNAVAILABLE,
        }
    }
}
