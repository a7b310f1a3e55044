//! # Kouch Protocol
//!
//! CouchDB replication protocol types.
//!
//! This crate provides:
//! - `RevisionId` and `Revisions` (the `_revisions` ancestry list)
//! - `Change` records from the changes feed, and an incremental
//!   `FeedDecoder` for `feed=normal` response bodies
//! - `Manifest` and `RevsDiffEntry` for `_revs_diff`
//! - `Document` and `OpenRev` for document bodies and `open_revs` leafs
//! - `SecurityObject`
//! - The heterogeneous `Options` bag and typed request options
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod document;
mod error;
mod feed;
mod options;
mod revision;
mod revs_diff;
mod security;

pub use change::{Change, Seq};
pub use document::{Document, OpenRev};
pub use error::{ProtocolError, ProtocolResult};
pub use feed::FeedDecoder;
pub use options::{ChangesOptions, GetOptions, OpenRevs, Options, PutOptions};
pub use revision::{RevisionId, Revisions};
pub use revs_diff::{Manifest, RevsDiffEntry};
pub use security::{Members, SecurityObject};
