//! In-memory database server.
//!
//! [`MemoryClient`] keeps full revision trees for every document, so it can
//! answer `_revs_diff`, `open_revs` and `new_edits=false` writes the way a
//! real server does. Every call is recorded, and failures can be injected per
//! operation, which makes it the standard test double for the replication
//! engine.

use crate::body::RawJson;
use crate::error::{ClientError, ClientResult};
use crate::transport::{ChangeStream, Client, Database, OpenRevStream, RevsDiffStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kouch_protocol::{
    Change, ChangesOptions, Document, GetOptions, Manifest, OpenRevs, PutOptions, RevisionId,
    Revisions, RevsDiffEntry, SecurityObject, Seq,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Operations recorded in the call log and targeted by failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `Database::info`.
    Info,
    /// `Database::exists`.
    Exists,
    /// `Database::create`.
    Create,
    /// `Database::destroy`.
    Destroy,
    /// `Database::changes`.
    Changes,
    /// `Database::revs_diff`.
    RevsDiff,
    /// `Database::get`.
    Get,
    /// `Database::open_revs`.
    OpenRevs,
    /// `Database::put`.
    Put,
    /// `Database::create_doc`.
    CreateDoc,
    /// `Database::delete`.
    Delete,
    /// `Database::security`.
    Security,
    /// `Database::set_security`.
    SetSecurity,
    /// `Database::compact`.
    Compact,
}

/// One recorded database call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Database name.
    pub db: String,
    /// Operation.
    pub op: Op,
    /// Document id, for document operations.
    pub doc_id: Option<String>,
}

#[derive(Debug, Clone)]
struct Failure {
    db: String,
    op: Op,
    error: ClientError,
    /// Remaining injections; `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
struct RevNode {
    parent: Option<RevisionId>,
    /// `None` for ancestors known only by id.
    body: Option<Map<String, Value>>,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
struct DocTree {
    nodes: HashMap<RevisionId, RevNode>,
    seq: u64,
}

impl DocTree {
    fn leaves(&self) -> Vec<RevisionId> {
        let parents: HashSet<&RevisionId> =
            self.nodes.values().filter_map(|n| n.parent.as_ref()).collect();
        let mut leaves: Vec<RevisionId> = self
            .nodes
            .keys()
            .filter(|rev| !parents.contains(rev))
            .cloned()
            .collect();
        // Winner first: live before deleted, then highest revision.
        leaves.sort_by(|a, b| {
            let (da, db) = (self.nodes[a].deleted, self.nodes[b].deleted);
            da.cmp(&db).then_with(|| b.cmp(a))
        });
        leaves
    }

    fn winner(&self) -> Option<RevisionId> {
        self.leaves().into_iter().next()
    }

    /// The revision followed by its ancestors, newest first.
    fn ancestry(&self, rev: &RevisionId) -> Vec<RevisionId> {
        let mut path = vec![rev.clone()];
        let mut current = self.nodes.get(rev).and_then(|n| n.parent.clone());
        while let Some(parent) = current {
            current = self.nodes.get(&parent).and_then(|n| n.parent.clone());
            path.push(parent);
        }
        path
    }

    /// Grafts a revision path (newest first) into the tree. Returns false if
    /// the newest revision was already present.
    fn graft(&mut self, path: &[RevisionId], body: Map<String, Value>, deleted: bool) -> bool {
        let Some(leaf) = path.first() else {
            return false;
        };
        if self.nodes.get(leaf).is_some_and(|n| n.body.is_some()) {
            return false;
        }
        for (i, rev) in path.iter().enumerate().skip(1) {
            self.nodes.entry(rev.clone()).or_insert_with(|| RevNode {
                parent: path.get(i + 1).cloned(),
                body: None,
                deleted: false,
            });
        }
        self.nodes.insert(
            leaf.clone(),
            RevNode {
                parent: path.get(1).cloned(),
                body: Some(body),
                deleted,
            },
        );
        true
    }

    fn render(&self, doc_id: &str, rev: &RevisionId, revs: bool) -> Option<Document> {
        let node = self.nodes.get(rev)?;
        let body = node.body.as_ref()?;
        let mut doc = Document::new();
        doc.set_id(doc_id);
        doc.set_rev(rev);
        for (k, v) in body {
            doc.insert(k.clone(), v.clone());
        }
        if node.deleted {
            doc.insert("_deleted", true);
        }
        if revs {
            if let Some(revisions) = Revisions::from_revision_ids(&self.ancestry(rev)) {
                doc.set_revisions(&revisions);
            }
        }
        Some(doc)
    }
}

#[derive(Debug, Clone, Default)]
struct DbState {
    docs: BTreeMap<String, DocTree>,
    update_seq: u64,
    security: SecurityObject,
}

impl DbState {
    fn tree(&self, doc_id: &str) -> ClientResult<&DocTree> {
        self.docs
            .get(doc_id)
            .ok_or_else(|| ClientError::not_found("Not Found: missing"))
    }

    fn write(
        &mut self,
        doc_id: &str,
        doc: Document,
        opts: &PutOptions,
    ) -> ClientResult<RevisionId> {
        let supplied = doc.rev()?;
        let deleted = doc.is_deleted();
        let mut body = doc.as_map().clone();
        for reserved in ["_id", "_rev", "_revisions", "_deleted"] {
            body.remove(reserved);
        }

        let path = if opts.new_edits {
            let tree = self.docs.get(doc_id);
            let parent = match (tree.and_then(DocTree::winner), &supplied) {
                (None, None) => None,
                (None, Some(_)) => {
                    return Err(ClientError::conflict("Conflict: Document update conflict."))
                }
                (Some(_), Some(rev)) => {
                    let leaves = tree.map(DocTree::leaves).unwrap_or_default();
                    if !leaves.contains(rev) {
                        return Err(ClientError::conflict("Conflict: Document update conflict."));
                    }
                    Some(rev.clone())
                }
                (Some(winner), None) => {
                    let winner_deleted = tree.is_some_and(|t| t.nodes[&winner].deleted);
                    if !winner_deleted {
                        return Err(ClientError::conflict("Conflict: Document update conflict."));
                    }
                    Some(winner)
                }
            };
            let generation = parent.as_ref().map_or(1, |p| p.generation() + 1);
            let rev = RevisionId::new(generation, rev_hash(parent.as_ref(), &body, deleted))?;
            let mut path = vec![rev];
            if let Some(tree) = tree {
                if let Some(parent) = &parent {
                    path.extend(tree.ancestry(parent));
                }
            }
            path
        } else {
            let rev = supplied
                .ok_or_else(|| ClientError::Data("Bad Request: _rev required".into()))?;
            match doc.revisions()? {
                Some(revisions) => {
                    let ids = revisions.to_revision_ids()?;
                    if ids.first() != Some(&rev) {
                        return Err(ClientError::Data(
                            "Bad Request: _rev does not match _revisions".into(),
                        ));
                    }
                    ids
                }
                None => vec![rev],
            }
        };

        let rev = path[0].clone();
        let tree = self.docs.entry(doc_id.to_string()).or_default();
        if tree.graft(&path, body, deleted) {
            self.update_seq += 1;
            tree.seq = self.update_seq;
        }
        Ok(rev)
    }
}

fn rev_hash(parent: Option<&RevisionId>, body: &Map<String, Value>, deleted: bool) -> String {
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.to_string().as_bytes());
    }
    hasher.update([u8::from(deleted)]);
    hasher.update(Value::Object(body.clone()).to_string().as_bytes());
    hex(&hasher.finalize()[..16])
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Default)]
struct Inner {
    dbs: Mutex<BTreeMap<String, DbState>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<Failure>>,
    latency: Mutex<Option<Duration>>,
    doc_counter: Mutex<u64>,
}

impl Inner {
    /// Records a call, then applies latency and any injected failure.
    async fn enter(&self, db: &str, op: Op, doc_id: Option<&str>) -> ClientResult<()> {
        self.calls.lock().push(Call {
            db: db.to_string(),
            op,
            doc_id: doc_id.map(str::to_string),
        });
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut failures = self.failures.lock();
        if let Some(i) = failures.iter().position(|f| f.op == op && f.db == db) {
            let error = failures[i].error.clone();
            if let Some(remaining) = failures[i].remaining.as_mut() {
                *remaining -= 1;
                if *remaining == 0 {
                    failures.remove(i);
                }
            }
            return Err(error);
        }
        Ok(())
    }

    fn with_db<T>(&self, db: &str, f: impl FnOnce(&mut DbState) -> ClientResult<T>) -> ClientResult<T> {
        let mut dbs = self.dbs.lock();
        let state = dbs
            .get_mut(db)
            .ok_or_else(|| ClientError::not_found("Not Found: Database does not exist."))?;
        f(state)
    }
}

/// An in-memory server holding any number of databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    inner: Arc<Inner>,
}

impl MemoryClient {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server with the named databases already present.
    pub fn with_dbs(names: &[&str]) -> Self {
        let client = Self::new();
        {
            let mut dbs = client.inner.dbs.lock();
            for name in names {
                dbs.insert(name.to_string(), DbState::default());
            }
        }
        client
    }

    /// Returns a concrete handle to a database.
    pub fn database(&self, name: &str) -> MemoryDatabase {
        MemoryDatabase {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        }
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().clone()
    }

    /// Returns the calls made for one operation.
    pub fn calls_to(&self, op: Op) -> Vec<Call> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// Makes every call of `op` on `db` fail with `error`.
    pub fn fail(&self, db: &str, op: Op, error: ClientError) {
        self.push_failure(db, op, error, None);
    }

    /// Makes the next `times` calls of `op` on `db` fail with `error`.
    pub fn fail_times(&self, db: &str, op: Op, error: ClientError, times: usize) {
        if times > 0 {
            self.push_failure(db, op, error, Some(times));
        }
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.inner.failures.lock().clear();
    }

    /// Delays every database call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    fn push_failure(&self, db: &str, op: Op, error: ClientError, remaining: Option<usize>) {
        self.inner.failures.lock().push(Failure {
            db: db.to_string(),
            op,
            error,
            remaining,
        });
    }

    /// Returns the winning document of every live document in a database,
    /// keyed by id.
    pub fn dump(&self, db: &str) -> BTreeMap<String, Document> {
        let dbs = self.inner.dbs.lock();
        let Some(state) = dbs.get(db) else {
            return BTreeMap::new();
        };
        state
            .docs
            .iter()
            .filter_map(|(id, tree)| {
                let winner = tree.winner()?;
                let doc = tree.render(id, &winner, false)?;
                (!doc.is_deleted()).then(|| (id.clone(), doc))
            })
            .collect()
    }

    /// Returns every leaf revision of a document, winner first.
    pub fn leaves(&self, db: &str, doc_id: &str) -> Vec<RevisionId> {
        self.inner
            .dbs
            .lock()
            .get(db)
            .and_then(|s| s.docs.get(doc_id))
            .map(DocTree::leaves)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Client for MemoryClient {
    fn dsn(&self) -> String {
        "memory://".to_string()
    }

    fn db(&self, name: &str) -> ClientResult<Arc<dyn Database>> {
        if name.is_empty() {
            return Err(ClientError::usage("database name required"));
        }
        Ok(Arc::new(self.database(name)))
    }

    async fn version(&self) -> ClientResult<RawJson> {
        let version = json!({
            "couchdb": "Welcome",
            "version": "3.3.3",
            "vendor": {"name": "kouch memory"},
        });
        Ok(version.into())
    }

    async fn ping(&self) -> ClientResult<bool> {
        Ok(true)
    }

    async fn create_db(&self, name: &str) -> ClientResult<()> {
        self.database(name).create().await
    }

    async fn destroy_db(&self, name: &str) -> ClientResult<()> {
        self.database(name).destroy().await
    }

    async fn db_exists(&self, name: &str) -> ClientResult<bool> {
        self.database(name).exists().await
    }

    async fn cluster_setup(&self, body: Value) -> ClientResult<RawJson> {
        if !body.get("action").is_some_and(Value::is_string) {
            return Err(ClientError::from_status(
                400,
                br#"{"error":"bad_request","reason":"Invalid Action"}"#,
            ));
        }
        Ok(json!({"ok": true}).into())
    }
}

/// A database handle on a [`MemoryClient`].
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
    name: String,
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> ClientResult<RawJson> {
        self.inner.enter(&self.name, Op::Info, None).await?;
        self.inner.with_db(&self.name, |state| {
            let (deleted, live): (Vec<&DocTree>, Vec<&DocTree>) =
                state.docs.values().partition(|tree| {
                    tree.winner()
                        .is_some_and(|w| tree.nodes.get(&w).is_some_and(|n| n.deleted))
                });
            Ok(json!({
                "db_name": self.name,
                "doc_count": live.len(),
                "doc_del_count": deleted.len(),
                "update_seq": state.update_seq.to_string(),
            })
            .into())
        })
    }

    async fn exists(&self) -> ClientResult<bool> {
        self.inner.enter(&self.name, Op::Exists, None).await?;
        Ok(self.inner.dbs.lock().contains_key(&self.name))
    }

    async fn create(&self) -> ClientResult<()> {
        self.inner.enter(&self.name, Op::Create, None).await?;
        let mut dbs = self.inner.dbs.lock();
        if dbs.contains_key(&self.name) {
            return Err(ClientError::from_status(
                412,
                br#"{"error":"file_exists","reason":"The database could not be created, the file already exists."}"#,
            ));
        }
        dbs.insert(self.name.clone(), DbState::default());
        Ok(())
    }

    async fn destroy(&self) -> ClientResult<()> {
        self.inner.enter(&self.name, Op::Destroy, None).await?;
        self.inner
            .dbs
            .lock()
            .remove(&self.name)
            .map(|_| ())
            .ok_or_else(|| ClientError::not_found("Not Found: Database does not exist."))
    }

    async fn changes(&self, opts: ChangesOptions) -> ClientResult<ChangeStream> {
        self.inner.enter(&self.name, Op::Changes, None).await?;
        if opts.doc_ids.is_empty() && opts.filter.is_some() {
            return Err(ClientError::from_status(
                400,
                br#"{"error":"bad_request","reason":"filter functions are not supported"}"#,
            ));
        }
        let since: u64 = opts.since.parse().unwrap_or(0);
        let all_docs = opts.style == "all_docs";
        self.inner.with_db(&self.name, |state| {
            let mut entries: Vec<(u64, Change)> = state
                .docs
                .iter()
                .filter(|(id, tree)| {
                    tree.seq > since && (opts.doc_ids.is_empty() || opts.doc_ids.contains(*id))
                })
                .filter_map(|(id, tree)| {
                    let leaves = tree.leaves();
                    let winner = leaves.first()?.clone();
                    let revs = if all_docs { leaves } else { vec![winner.clone()] };
                    let mut change = Change::new(id.clone(), revs, tree.seq);
                    if tree.nodes[&winner].deleted {
                        change = change.deleted();
                    }
                    Some((tree.seq, change))
                })
                .collect();
            entries.sort_by_key(|(seq, _)| *seq);
            let changes = entries.into_iter().map(|(_, c)| c).collect();
            Ok(ChangeStream::from_changes(
                changes,
                Some(Seq::from(state.update_seq)),
            ))
        })
    }

    async fn revs_diff(&self, manifest: &Manifest) -> ClientResult<RevsDiffStream> {
        self.inner.enter(&self.name, Op::RevsDiff, None).await?;
        let entries = self.inner.with_db(&self.name, |state| {
            let mut entries = Vec::new();
            for (doc_id, revs) in manifest.iter() {
                let tree = state.docs.get(doc_id);
                let missing: Vec<RevisionId> = revs
                    .iter()
                    .filter(|rev| !tree.is_some_and(|t| t.nodes.contains_key(*rev)))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    continue;
                }
                let mut entry = RevsDiffEntry::new(doc_id, missing);
                if let Some(tree) = tree {
                    let max_missing = entry.missing.iter().map(RevisionId::generation).max();
                    let ancestors: Vec<RevisionId> = tree
                        .leaves()
                        .into_iter()
                        .filter(|leaf| max_missing.is_some_and(|g| leaf.generation() < g))
                        .collect();
                    if !ancestors.is_empty() {
                        entry.possible_ancestors = Some(ancestors);
                    }
                }
                entries.push(entry);
            }
            Ok(entries)
        })?;
        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn get(&self, doc_id: &str, opts: GetOptions) -> ClientResult<Document> {
        self.inner.enter(&self.name, Op::Get, Some(doc_id)).await?;
        self.inner.with_db(&self.name, |state| {
            let tree = state.tree(doc_id)?;
            let rev = match &opts.rev {
                Some(rev) => rev.clone(),
                None => {
                    let winner = tree
                        .winner()
                        .ok_or_else(|| ClientError::not_found("Not Found: missing"))?;
                    if tree.nodes[&winner].deleted {
                        return Err(ClientError::not_found("Not Found: deleted"));
                    }
                    winner
                }
            };
            tree.render(doc_id, &rev, opts.revs)
                .ok_or_else(|| ClientError::not_found("Not Found: missing"))
        })
    }

    async fn open_revs(
        &self,
        doc_id: &str,
        revs: OpenRevs,
        opts: GetOptions,
    ) -> ClientResult<OpenRevStream> {
        self.inner.enter(&self.name, Op::OpenRevs, Some(doc_id)).await?;
        let leaves = self.inner.with_db(&self.name, |state| {
            let tree = state.tree(doc_id)?;
            let wanted = match revs {
                OpenRevs::All => tree.leaves(),
                OpenRevs::Revs(revs) => revs,
            };
            Ok(wanted
                .into_iter()
                .map(|rev| {
                    tree.render(doc_id, &rev, opts.revs).ok_or_else(|| {
                        ClientError::not_found(format!(
                            "Not Found: missing revision {rev} of {doc_id}"
                        ))
                    })
                })
                .collect::<Vec<_>>())
        })?;
        Ok(stream::iter(leaves).boxed())
    }

    async fn put(
        &self,
        doc_id: &str,
        doc: Document,
        opts: PutOptions,
    ) -> ClientResult<RevisionId> {
        self.inner.enter(&self.name, Op::Put, Some(doc_id)).await?;
        self.inner
            .with_db(&self.name, |state| state.write(doc_id, doc, &opts))
    }

    async fn create_doc(
        &self,
        doc: Document,
        opts: PutOptions,
    ) -> ClientResult<(String, RevisionId)> {
        let doc_id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let mut counter = self.inner.doc_counter.lock();
                *counter += 1;
                hex(&Sha256::digest(counter.to_be_bytes())[..16])
            }
        };
        self.inner
            .enter(&self.name, Op::CreateDoc, Some(&doc_id))
            .await?;
        let rev = self
            .inner
            .with_db(&self.name, |state| state.write(&doc_id, doc, &opts))?;
        Ok((doc_id, rev))
    }

    async fn delete(&self, doc_id: &str, rev: &RevisionId) -> ClientResult<RevisionId> {
        self.inner.enter(&self.name, Op::Delete, Some(doc_id)).await?;
        let mut tombstone = Document::new();
        tombstone.set_rev(rev);
        tombstone.insert("_deleted", true);
        self.inner.with_db(&self.name, |state| {
            state.tree(doc_id)?;
            state.write(doc_id, tombstone, &PutOptions::default())
        })
    }

    async fn security(&self) -> ClientResult<SecurityObject> {
        self.inner.enter(&self.name, Op::Security, None).await?;
        self.inner
            .with_db(&self.name, |state| Ok(state.security.clone()))
    }

    async fn set_security(&self, security: &SecurityObject) -> ClientResult<()> {
        self.inner.enter(&self.name, Op::SetSecurity, None).await?;
        self.inner.with_db(&self.name, |state| {
            state.security = security.clone();
            Ok(())
        })
    }

    async fn compact(&self) -> ClientResult<()> {
        self.inner.enter(&self.name, Op::Compact, None).await?;
        self.inner.with_db(&self.name, |_| Ok(()))
    }
}
