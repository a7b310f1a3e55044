//! One-shot replication engine.

use crate::batch::Batch;
use crate::config::{ReplicateOptions, RetryPolicy};
use crate::error::{ReplicateError, ReplicateResult};
use crate::retry::retry;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use kouch_client::{ClientError, ClientResult, Database};
use kouch_protocol::{GetOptions, Manifest, OpenRevs, PutOptions, RevisionId, Seq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a replication.
///
/// `missing_checked` counts revisions listed in the manifests sent to the
/// target, `missing_found` the revisions the target reported missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationResult {
    /// Documents fetched from the source.
    pub docs_read: u64,
    /// Documents written to the target.
    pub docs_written: u64,
    /// Documents the target rejected.
    pub doc_write_failures: u64,
    /// Revisions checked against the target.
    pub missing_checked: u64,
    /// Revisions the target did not have.
    pub missing_found: u64,
    /// When the replication started.
    pub start_time: DateTime<Utc>,
    /// When the last write was acknowledged.
    pub end_time: DateTime<Utc>,
    /// `last_seq` reported by the source changes feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_last_seq: Option<Seq>,
}

impl ReplicationResult {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            docs_read: 0,
            docs_written: 0,
            doc_write_failures: 0,
            missing_checked: 0,
            missing_found: 0,
            start_time: now,
            end_time: now,
            source_last_seq: None,
        }
    }
}

/// Awaits an adapter call unless the replication is canceled first.
async fn guarded<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = ClientResult<T>>,
) -> ReplicateResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReplicateError::Canceled),
        out = call => out.map_err(ReplicateError::from),
    }
}

/// Pulls the next item from an adapter stream unless canceled first.
async fn next_guarded<S, T>(
    cancel: &CancellationToken,
    stream: &mut S,
) -> ReplicateResult<Option<T>>
where
    S: Stream<Item = ClientResult<T>> + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReplicateError::Canceled),
        item = stream.next() => item.transpose().map_err(ReplicateError::from),
    }
}

/// Replicates every revision reachable from the source changes feed that the
/// target is missing.
///
/// Writes use `new_edits=false`, so running the same replication again is a
/// no-op. Conflicts and other permanent rejections of single documents are
/// counted in `doc_write_failures`; any other error aborts the replication.
/// Documents already written stay on the target.
pub async fn replicate(
    cancel: &CancellationToken,
    target: &dyn Database,
    source: &dyn Database,
    opts: &ReplicateOptions,
) -> ReplicateResult<ReplicationResult> {
    opts.validate()?;
    let mut result = ReplicationResult::started();
    debug!(
        source_db = source.name(),
        target_db = target.name(),
        "replication started"
    );

    if opts.create_target && !guarded(cancel, target.exists()).await? {
        match guarded(cancel, target.create()).await {
            Ok(()) => info!(db = target.name(), "created target database"),
            Err(ReplicateError::Client(ClientError::Conflict(_))) => {}
            Err(err) => return Err(err),
        }
    }

    let mut changes = guarded(cancel, source.changes(opts.changes_options())).await?;
    let mut batch = Batch::new(opts.batch_size, opts.batch_bytes);
    let mut batch_no = 0u64;
    while let Some(change) = next_guarded(cancel, &mut changes).await? {
        batch.push(&change);
        if batch.is_full() {
            batch_no += 1;
            let manifest = batch.take();
            replicate_batch(cancel, target, source, manifest, batch_no, &mut result).await?;
        }
    }
    if !batch.is_empty() {
        batch_no += 1;
        let manifest = batch.take();
        replicate_batch(cancel, target, source, manifest, batch_no, &mut result).await?;
    }
    result.source_last_seq = changes.last_seq();
    drop(changes);

    if opts.copy_security {
        let security = guarded(cancel, source.security()).await?;
        guarded(cancel, target.set_security(&security)).await?;
        debug!(db = target.name(), "copied security object");
    }

    result.end_time = Utc::now();
    debug!(
        docs_read = result.docs_read,
        docs_written = result.docs_written,
        doc_write_failures = result.doc_write_failures,
        "replication finished"
    );
    Ok(result)
}

async fn replicate_batch(
    cancel: &CancellationToken,
    target: &dyn Database,
    source: &dyn Database,
    manifest: Manifest,
    batch: u64,
    result: &mut ReplicationResult,
) -> ReplicateResult<()> {
    if cancel.is_cancelled() {
        return Err(ReplicateError::Canceled);
    }
    let checked = manifest.rev_count() as u64;
    result.missing_checked += checked;
    debug!(batch, docs = manifest.len(), revs = checked, "checking batch");

    let mut diffs = guarded(cancel, target.revs_diff(&manifest)).await?;
    let mut missing: HashMap<String, Vec<RevisionId>> = HashMap::new();
    while let Some(entry) = next_guarded(cancel, &mut diffs).await? {
        result.missing_found += entry.missing.len() as u64;
        if !entry.missing.is_empty() {
            missing.insert(entry.id, entry.missing);
        }
    }
    drop(diffs);

    for doc_id in manifest.doc_ids() {
        let Some(revs) = missing.remove(doc_id) else {
            continue;
        };
        let mut leafs = guarded(
            cancel,
            source.open_revs(doc_id, OpenRevs::Revs(revs), GetOptions::replication()),
        )
        .await?;
        while let Some(doc) = next_guarded(cancel, &mut leafs).await? {
            result.docs_read += 1;
            let rev = doc.rev()?.map(|r| r.to_string()).unwrap_or_default();
            match guarded(cancel, target.put(doc_id, doc, PutOptions::replicated())).await {
                Ok(_) => result.docs_written += 1,
                Err(ReplicateError::Client(
                    err @ (ClientError::Conflict(_) | ClientError::Permanent { .. }),
                )) => {
                    result.doc_write_failures += 1;
                    warn!(
                        doc_id,
                        rev = %rev,
                        error = %err,
                        "failed to write document"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

/// A replication between two databases, rerun under a retry policy.
#[derive(Clone)]
pub struct Replicator {
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    options: ReplicateOptions,
    policy: RetryPolicy,
}

impl Replicator {
    /// Creates a replicator with default options and no retries.
    pub fn new(source: Arc<dyn Database>, target: Arc<dyn Database>) -> Self {
        Self {
            source,
            target,
            options: ReplicateOptions::default(),
            policy: RetryPolicy::default(),
        }
    }

    /// Sets the replication options.
    pub fn with_options(mut self, options: ReplicateOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the replication options.
    pub fn options(&self) -> &ReplicateOptions {
        &self.options
    }

    /// Runs the replication, retrying the whole pass on transient errors.
    ///
    /// The result describes the final, successful pass.
    pub async fn run(&self, cancel: &CancellationToken) -> ReplicateResult<ReplicationResult> {
        let source = self.source.as_ref();
        let target = self.target.as_ref();
        let options = &self.options;
        retry(&self.policy, cancel, move || {
            replicate(cancel, target, source, options)
        })
        .await
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("source", &self.source.name())
            .field("target", &self.target.name())
            .field("options", &self.options)
            .field("policy", &self.policy)
            .finish()
    }
}
