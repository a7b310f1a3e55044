//! Error types for the command-line tool.

use kouch_client::{exit, ClientError};
use kouch_protocol::ProtocolError;
use kouch_replicate::{ReplicateError, Retryable};
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors surfaced by `kouchctl`. Each maps to a process exit code.
#[derive(Error, Debug)]
pub enum CliError {
    /// An error from the server or the client adapter.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// An error from the replication engine.
    #[error(transparent)]
    Replicate(#[from] ReplicateError),

    /// Invalid flags, arguments or configuration.
    #[error("{0}")]
    Usage(String),

    /// Malformed input data.
    #[error("{0}")]
    Data(String),

    /// Local I/O failure.
    #[error("{0}")]
    Io(String),
}

impl CliError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Client(e) => e.exit_code(),
            CliError::Replicate(e) => e.exit_code(),
            CliError::Usage(_) => exit::USAGE,
            CliError::Data(_) => exit::DATA,
            CliError::Io(_) => exit::IO,
        }
    }
}

impl From<ProtocolError> for CliError {
    fn from(e: ProtocolError) -> Self {
        CliError::Data(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Data(e.to_string())
    }
}

impl Retryable for CliError {
    fn is_transient(&self) -> bool {
        match self {
            CliError::Client(e) => e.is_transient(),
            CliError::Replicate(e) => e.is_transient(),
            _ => false,
        }
    }

    fn canceled() -> Self {
        CliError::Client(ClientError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::usage("x").exit_code(), exit::USAGE);
        assert_eq!(CliError::data("x").exit_code(), exit::DATA);
        assert_eq!(CliError::Io("x".into()).exit_code(), exit::IO);
        assert_eq!(
            CliError::from(ClientError::not_found("Not Found: missing")).exit_code(),
            exit::NOT_FOUND
        );
        assert_eq!(
            CliError::from(ReplicateError::usage("bad")).exit_code(),
            exit::USAGE
        );
        assert_eq!(CliError::canceled().exit_code(), exit::UNAVAILABLE);
    }

    #[test]
    fn transient_passthrough() {
        assert!(CliError::from(ClientError::transient("reset")).is_transient());
        assert!(
            CliError::from(ReplicateError::from(ClientError::transient("reset"))).is_transient()
        );
        assert!(!CliError::usage("x").is_transient());
    }

    #[test]
    fn bad_json_is_data() {
        let err: CliError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.exit_code(), exit::DATA);
    }
}
