//! Error types for the client adapter.

use kouch_protocol::ProtocolError;
use serde::Deserialize;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Process exit codes, one per error kind.
pub mod exit {
    /// Success.
    pub const OK: i32 = 0;
    /// HTTP 401.
    pub const UNAUTHENTICATED: i32 = 41;
    /// HTTP 403.
    pub const UNAUTHORIZED: i32 = 43;
    /// HTTP 404.
    pub const NOT_FOUND: i32 = 44;
    /// HTTP 409 and 412.
    pub const CONFLICT: i32 = 49;
    /// Usage and configuration errors, and anything unclassified.
    pub const USAGE: i32 = 64;
    /// Malformed input data.
    pub const DATA: i32 = 65;
    /// The server stayed unreachable or kept failing.
    pub const UNAVAILABLE: i32 = 69;
    /// Local I/O failure.
    pub const IO: i32 = 74;
}

/// Errors surfaced by a database client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Network failure, timeout, 5xx, 408 or 429. Eligible for retry.
    #[error("{message}")]
    Transient {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Error message.
        message: String,
    },

    /// A 4xx response not covered by a more specific variant.
    #[error("{message}")]
    Permanent {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// HTTP 401.
    #[error("{0}")]
    Unauthenticated(String),

    /// HTTP 403.
    #[error("{0}")]
    Unauthorized(String),

    /// HTTP 404, or a requested revision does not exist.
    #[error("{0}")]
    NotFound(String),

    /// HTTP 409 or 412: document update conflict, or the database exists.
    #[error("{0}")]
    Conflict(String),

    /// The caller canceled the operation.
    #[error("operation canceled")]
    Canceled,

    /// Configuration or usage error, such as an unsupported URL scheme.
    #[error("{0}")]
    Usage(String),

    /// Malformed data received or supplied.
    #[error("{0}")]
    Data(String),

    /// Local I/O failure.
    #[error("{0}")]
    Io(String),
}

#[derive(Deserialize)]
struct CouchErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

impl ClientError {
    /// Creates a transient error without an HTTP status.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            message: message.into(),
        }
    }

    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Classifies an HTTP error response.
    ///
    /// CouchDB error bodies (`{"error": ..., "reason": ...}`) are folded into
    /// the message as `"<Status Text>: <reason>"`.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let text = status_text(status);
        let message = match serde_json::from_slice::<CouchErrorBody>(body) {
            Ok(b) if !b.reason.is_empty() => format!("{text}: {}", b.reason),
            Ok(b) if !b.error.is_empty() => format!("{text}: {}", b.error),
            _ => text.to_string(),
        };
        match status {
            401 => Self::Unauthenticated(message),
            403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            409 | 412 => Self::Conflict(message),
            408 | 429 => Self::Transient {
                status: Some(status),
                message,
            },
            s if s >= 500 => Self::Transient {
                status: Some(status),
                message,
            },
            s => Self::Permanent { status: s, message },
        }
    }

    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient { .. })
    }

    /// Returns the HTTP status this error corresponds to.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transient { status, .. } => *status,
            ClientError::Permanent { status, .. } => Some(*status),
            ClientError::Unauthenticated(_) => Some(401),
            ClientError::Unauthorized(_) => Some(403),
            ClientError::NotFound(_) => Some(404),
            ClientError::Conflict(_) => Some(409),
            ClientError::Data(_) => Some(400),
            ClientError::Canceled | ClientError::Usage(_) | ClientError::Io(_) => None,
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Transient { .. } | ClientError::Canceled => exit::UNAVAILABLE,
            ClientError::Permanent { status: 400, .. } | ClientError::Data(_) => exit::DATA,
            ClientError::Permanent { .. } | ClientError::Usage(_) => exit::USAGE,
            ClientError::Unauthenticated(_) => exit::UNAUTHENTICATED,
            ClientError::Unauthorized(_) => exit::UNAUTHORIZED,
            ClientError::NotFound(_) => exit::NOT_FOUND,
            ClientError::Conflict(_) => exit::CONFLICT,
            ClientError::Io(_) => exit::IO,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        Self::Data(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::Usage(err.to_string());
        }
        if err.is_decode() {
            return Self::Data(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &[]);
        }
        Self::Transient {
            status: None,
            message: err.to_string(),
        }
    }
}

/// Reason phrase for the statuses CouchDB commonly returns.
fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        s if s >= 500 => "Server Error",
        _ => "Client Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_statuses() {
        assert!(ClientError::from_status(500, b"").is_transient());
        assert!(ClientError::from_status(503, b"").is_transient());
        assert!(ClientError::from_status(408, b"").is_transient());
        assert!(ClientError::from_status(429, b"").is_transient());
        assert!(!ClientError::from_status(400, b"").is_transient());
        assert!(matches!(
            ClientError::from_status(401, b""),
            ClientError::Unauthenticated(_)
        ));
        assert!(matches!(
            ClientError::from_status(403, b""),
            ClientError::Unauthorized(_)
        ));
        assert!(matches!(ClientError::from_status(404, b""), ClientError::NotFound(_)));
        assert!(matches!(ClientError::from_status(409, b""), ClientError::Conflict(_)));
        assert!(matches!(ClientError::from_status(412, b""), ClientError::Conflict(_)));
        assert!(matches!(
            ClientError::from_status(415, b""),
            ClientError::Permanent { status: 415, .. }
        ));
    }

    #[test]
    fn couch_reason_in_message() {
        let err = ClientError::from_status(
            400,
            br#"{"error":"doc_validation","reason":"Bad special document member: _invalid"}"#,
        );
        assert_eq!(
            err.to_string(),
            "Bad Request: Bad special document member: _invalid"
        );
        assert_eq!(err.status(), Some(400));

        let err = ClientError::from_status(404, br#"{"error":"not_found","reason":"missing"}"#);
        assert_eq!(err.to_string(), "Not Found: missing");
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ClientError::from_status(400, b"").exit_code(), exit::DATA);
        assert_eq!(ClientError::from_status(401, b"").exit_code(), exit::UNAUTHENTICATED);
        assert_eq!(ClientError::from_status(403, b"").exit_code(), exit::UNAUTHORIZED);
        assert_eq!(ClientError::from_status(404, b"").exit_code(), exit::NOT_FOUND);
        assert_eq!(ClientError::from_status(409, b"").exit_code(), exit::CONFLICT);
        assert_eq!(ClientError::from_status(405, b"").exit_code(), exit::USAGE);
        assert_eq!(ClientError::from_status(502, b"").exit_code(), exit::UNAVAILABLE);
        assert_eq!(ClientError::usage("bad").exit_code(), exit::USAGE);
        assert_eq!(ClientError::Io("disk".into()).exit_code(), exit::IO);
    }

    #[test]
    fn protocol_errors_are_data() {
        let err: ClientError = ProtocolError::InvalidRevision("x".into()).into();
        assert!(matches!(err, ClientError::Data(_)));
        assert!(!err.is_transient());
    }
}
