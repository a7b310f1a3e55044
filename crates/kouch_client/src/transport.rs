//! The client capability set.
//!
//! [`Client`] is a server-level handle and [`Database`] a per-database one.
//! The replication engine and the CLI only ever talk to these traits; the
//! HTTP implementation and the in-memory one are interchangeable.
//!
//! Streams returned from these traits are lazy and finite. Dropping a stream
//! releases whatever it holds (an open response body, for the HTTP client),
//! and dropping the future of a pending call cancels the request.

use crate::body::RawJson;
use crate::error::ClientResult;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use kouch_protocol::{
    Change, ChangesOptions, Document, GetOptions, Manifest, OpenRevs, PutOptions, RevisionId,
    RevsDiffEntry, SecurityObject, Seq,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Lazy sequence of `_revs_diff` entries.
pub type RevsDiffStream = BoxStream<'static, ClientResult<RevsDiffEntry>>;

/// Lazy sequence of leaf documents returned by an `open_revs` fetch.
pub type OpenRevStream = BoxStream<'static, ClientResult<Document>>;

/// Lazy sequence of change records in source order.
///
/// Once the stream is exhausted, [`ChangeStream::last_seq`] reports the
/// sequence the server sent after the last record.
pub struct ChangeStream {
    inner: BoxStream<'static, ClientResult<Change>>,
    last_seq: Arc<Mutex<Option<Seq>>>,
}

impl ChangeStream {
    /// Wraps a stream. The producer stores `last_seq` into the shared slot
    /// when it reaches the end of the feed.
    pub fn new(
        inner: BoxStream<'static, ClientResult<Change>>,
        last_seq: Arc<Mutex<Option<Seq>>>,
    ) -> Self {
        Self { inner, last_seq }
    }

    /// A stream over changes that are already in memory.
    pub fn from_changes(changes: Vec<Change>, last_seq: Option<Seq>) -> Self {
        Self {
            inner: stream::iter(changes.into_iter().map(Ok)).boxed(),
            last_seq: Arc::new(Mutex::new(last_seq)),
        }
    }

    /// The `last_seq` of the feed, once known.
    pub fn last_seq(&self) -> Option<Seq> {
        self.last_seq.lock().clone()
    }
}

impl Stream for ChangeStream {
    type Item = ClientResult<Change>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("last_seq", &self.last_seq())
            .finish_non_exhaustive()
    }
}

/// A connection to a database server.
#[async_trait]
pub trait Client: Send + Sync {
    /// The server URL, without credentials.
    fn dsn(&self) -> String;

    /// Returns a handle to a database. No request is made.
    fn db(&self, name: &str) -> ClientResult<Arc<dyn Database>>;

    /// Server version information (`GET /`).
    async fn version(&self) -> ClientResult<RawJson>;

    /// Checks that the server is up.
    ///
    /// Returns false when the server answers but reports it is not ready.
    async fn ping(&self) -> ClientResult<bool>;

    /// Creates a database.
    async fn create_db(&self, name: &str) -> ClientResult<()>;

    /// Deletes a database.
    async fn destroy_db(&self, name: &str) -> ClientResult<()>;

    /// Returns true if the database exists.
    async fn db_exists(&self, name: &str) -> ClientResult<bool>;

    /// Configures a cluster (`POST /_cluster_setup`).
    async fn cluster_setup(&self, body: Value) -> ClientResult<RawJson>;
}

/// A handle to one database.
#[async_trait]
pub trait Database: Send + Sync {
    /// The database name.
    fn name(&self) -> &str;

    /// Database information (`GET /{db}`).
    async fn info(&self) -> ClientResult<RawJson>;

    /// Returns true if the database exists.
    async fn exists(&self) -> ClientResult<bool>;

    /// Creates the database. Fails with `Conflict` if it already exists.
    async fn create(&self) -> ClientResult<()>;

    /// Deletes the database.
    async fn destroy(&self) -> ClientResult<()>;

    /// Opens the changes feed.
    async fn changes(&self, opts: ChangesOptions) -> ClientResult<ChangeStream>;

    /// Asks which of the listed revisions the database lacks.
    ///
    /// Documents for which nothing is missing are omitted from the stream.
    async fn revs_diff(&self, manifest: &Manifest) -> ClientResult<RevsDiffStream>;

    /// Fetches a single document.
    async fn get(&self, doc_id: &str, opts: GetOptions) -> ClientResult<Document>;

    /// Fetches a single document as the server encoded it.
    async fn get_raw(&self, doc_id: &str, opts: GetOptions) -> ClientResult<RawJson> {
        Ok(RawJson::from_value(self.get(doc_id, opts).await?.into_value()))
    }

    /// Fetches several leaf revisions of a document.
    ///
    /// A requested revision that does not exist surfaces as a `NotFound`
    /// item in the stream.
    async fn open_revs(
        &self,
        doc_id: &str,
        revs: OpenRevs,
        opts: GetOptions,
    ) -> ClientResult<OpenRevStream>;

    /// Writes a document, returning its new revision.
    ///
    /// With `new_edits = false` the document's own `_rev` and `_revisions`
    /// are stored verbatim and the returned revision equals the supplied one.
    async fn put(&self, doc_id: &str, doc: Document, opts: PutOptions)
        -> ClientResult<RevisionId>;

    /// Creates a document with a server-assigned id if it has none.
    async fn create_doc(&self, doc: Document, opts: PutOptions)
        -> ClientResult<(String, RevisionId)>;

    /// Deletes a document revision, returning the tombstone revision.
    async fn delete(&self, doc_id: &str, rev: &RevisionId) -> ClientResult<RevisionId>;

    /// Reads the security object.
    async fn security(&self) -> ClientResult<SecurityObject>;

    /// Replaces the security object.
    async fn set_security(&self, security: &SecurityObject) -> ClientResult<()>;

    /// Starts compaction.
    async fn compact(&self) -> ClientResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn change_stream_from_vec() {
        let rev = RevisionId::parse("1-a").unwrap();
        let mut stream = ChangeStream::from_changes(
            vec![
                Change::new("a", vec![rev.clone()], 1u64),
                Change::new("b", vec![rev], 2u64),
            ],
            Some(Seq::from(2u64)),
        );
        let mut ids = Vec::new();
        while let Some(change) = stream.next().await {
            ids.push(change.unwrap().id);
        }
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(stream.last_seq(), Some(Seq::from(2u64)));
    }
}
