//! # Kouch Testkit
//!
//! Test utilities for Kouch.
//!
//! This crate provides:
//! - `FakeCouch`, a CouchDB lookalike HTTP server on an ephemeral port
//! - Fixtures for documents, revisions and seeded in-memory databases
//! - Property-based test generators using proptest

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_couch;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake_couch::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fake_couch::{FakeCouch, RecordedRequest};
pub use fixtures::*;
pub use generators::*;
