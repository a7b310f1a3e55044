//! # Kouch Client
//!
//! Database client adapter for CouchDB-compatible servers.
//!
//! This crate provides:
//! - The `Client` and `Database` capability traits
//! - `HttpClient`, a reqwest-backed implementation speaking the CouchDB HTTP API
//! - `MemoryClient`, an in-memory implementation with full revision trees,
//!   a call log and failure injection
//! - `Dsn` parsing for the `http`, `https`, `couch`, `couchs`, `couchdb` and
//!   `couchdbs` schemes
//! - The `ClientError` taxonomy, with transient/permanent classification and
//!   process exit codes
//!
//! ## Error classification
//!
//! | Condition | Variant |
//! |---|---|
//! | network failure, timeout, 5xx, 408, 429 | `Transient` |
//! | 401 | `Unauthenticated` |
//! | 403 | `Unauthorized` |
//! | 404 | `NotFound` |
//! | 409, 412 | `Conflict` |
//! | other 4xx | `Permanent` |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod dsn;
mod error;
mod http;
mod memory;
mod transport;

pub use body::RawJson;
pub use dsn::{encode_db, encode_doc_id, Dsn};
pub use error::{exit, ClientError, ClientResult};
pub use http::{HttpClient, HttpConfig, HttpDatabase};
pub use memory::{Call, MemoryClient, MemoryDatabase, Op};
pub use transport::{ChangeStream, Client, Database, OpenRevStream, RevsDiffStream};

/// Connects to the server named by a DSN over HTTP.
pub fn connect(dsn: &Dsn, config: &HttpConfig) -> ClientResult<std::sync::Arc<dyn Client>> {
    Ok(std::sync::Arc::new(HttpClient::new(dsn, config)?))
}
