//! # Kouch Replicate
//!
//! One-shot CouchDB replication with a retry controller.
//!
//! This crate provides:
//! - [`replicate`], a pull replication from a source to a target
//!   [`Database`](kouch_client::Database) using `_changes`, `_revs_diff`,
//!   `open_revs` and `new_edits=false` writes
//! - [`retry`], a controller that reruns a unit of work on transient errors
//!   under a [`RetryPolicy`]
//! - [`Replicator`], which combines the two
//! - [`parse_duration`] and [`fmt_duration`] for timeout flags and messages
//!
//! ## Example
//!
//! ```rust,ignore
//! use kouch_replicate::{replicate, ReplicateOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let opts = ReplicateOptions::new().with_create_target(true);
//! let result = replicate(&cancel, target.as_ref(), source.as_ref(), &opts).await?;
//! println!("wrote {} documents", result.docs_written);
//! ```
//!
//! ## Counters
//!
//! The counters of a [`ReplicationResult`] satisfy
//! `docs_written + doc_write_failures <= docs_read <= missing_found <= missing_checked`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod duration;
mod error;
mod replicate;
mod retry;

pub use batch::Batch;
pub use config::{
    Backoff, ExponentialBackoff, ReplicateOptions, RetryPolicy, DEFAULT_BATCH_BYTES,
    DEFAULT_BATCH_SIZE,
};
pub use duration::{fmt_duration, parse_duration};
pub use error::{ReplicateError, ReplicateResult};
pub use replicate::{replicate, ReplicationResult, Replicator};
pub use retry::{retry, Retryable};

pub use tokio_util::sync::CancellationToken;
