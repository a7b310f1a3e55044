//! Test fixtures.
//!
//! Helpers for building documents and revision ids, and for seeding
//! in-memory databases.

use kouch_client::{Database, MemoryClient, MemoryDatabase};
use kouch_protocol::{Document, PutOptions, RevisionId};
use serde_json::{json, Value};

/// The revision used throughout the replication scenarios.
pub const FOO_REV: &str = "2-7051cbe5c8faecd085a3fa619e6e6337";

/// Builds a document from a JSON object.
pub fn doc(value: Value) -> Document {
    Document::from_value(value).expect("Fixture document must be a JSON object")
}

/// Parses a revision id.
pub fn rev(s: &str) -> RevisionId {
    RevisionId::parse(s).expect("Invalid fixture revision")
}

/// A source/target pair of in-memory servers, each with one database.
pub struct ReplicationPair {
    /// Source server.
    pub source_client: MemoryClient,
    /// Target server.
    pub target_client: MemoryClient,
    /// Source database, named `source`.
    pub source: MemoryDatabase,
    /// Target database, named `target`.
    pub target: MemoryDatabase,
}

impl ReplicationPair {
    /// Creates both databases.
    pub fn new() -> Self {
        let source_client = MemoryClient::with_dbs(&["source"]);
        let target_client = MemoryClient::with_dbs(&["target"]);
        Self {
            source: source_client.database("source"),
            target: target_client.database("target"),
            source_client,
            target_client,
        }
    }

    /// Creates the source database only.
    pub fn without_target() -> Self {
        let source_client = MemoryClient::with_dbs(&["source"]);
        let target_client = MemoryClient::new();
        Self {
            source: source_client.database("source"),
            target: target_client.database("target"),
            source_client,
            target_client,
        }
    }
}

impl Default for ReplicationPair {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes documents with server-generated revisions, returning them in
/// order.
pub async fn seed(db: &dyn Database, docs: &[(&str, Value)]) -> Vec<RevisionId> {
    let mut revs = Vec::with_capacity(docs.len());
    for (id, body) in docs {
        let rev = db
            .put(id, doc(body.clone()), PutOptions::default())
            .await
            .expect("Failed to seed document");
        revs.push(rev);
    }
    revs
}

/// Writes `count` documents named `doc0000`, `doc0001`, ...
pub async fn seed_numbered(db: &dyn Database, count: usize) -> Vec<RevisionId> {
    let mut revs = Vec::with_capacity(count);
    for i in 0..count {
        let rev = db
            .put(&format!("doc{i:04}"), doc(json!({"n": i})), PutOptions::default())
            .await
            .expect("Failed to seed document");
        revs.push(rev);
    }
    revs
}

/// Stores a revision with an explicit ancestry, the way replication does.
pub async fn put_replicated(db: &dyn Database, id: &str, ancestry: &[&str], body: Value) {
    let revs: Vec<RevisionId> = ancestry.iter().map(|r| rev(r)).collect();
    let mut document = doc(body);
    document.set_id(id);
    document.set_rev(&revs[0]);
    if let Some(revisions) = kouch_protocol::Revisions::from_revision_ids(&revs) {
        document.set_revisions(&revisions);
    }
    db.put(id, document, PutOptions::replicated())
        .await
        .expect("Failed to store replicated revision");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_and_replicated_put() {
        let pair = ReplicationPair::new();
        let revs = seed(&pair.source, &[("a", json!({"x": 1})), ("b", json!({}))]).await;
        assert_eq!(revs.len(), 2);

        put_replicated(&pair.target, "a", &["3-c", "2-b", "1-a"], json!({"y": 2})).await;
        assert_eq!(pair.target_client.leaves("target", "a"), vec![rev("3-c")]);
    }
}
