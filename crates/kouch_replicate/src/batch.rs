//! Batching of change records into revision manifests.

use kouch_protocol::{Change, Manifest};

/// Accumulates change records until a count or size limit is reached.
///
/// The size is an estimate of the manifest's JSON encoding, so a batch never
/// serializes to much more than the configured byte limit.
#[derive(Debug)]
pub struct Batch {
    manifest: Manifest,
    records: usize,
    bytes: usize,
    max_records: usize,
    max_bytes: usize,
}

impl Batch {
    /// Creates an empty batch with the given limits.
    pub fn new(max_records: usize, max_bytes: usize) -> Self {
        Self {
            manifest: Manifest::new(),
            records: 0,
            bytes: 2,
            max_records: max_records.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Adds a change record.
    pub fn push(&mut self, change: &Change) {
        self.records += 1;
        if self.manifest.get(&change.id).is_none() {
            // "id":[],
            self.bytes += change.id.len() + 6;
        }
        self.manifest.add(&change.id, &change.revs);
        // "rev",
        self.bytes += change
            .revs
            .iter()
            .map(|rev| rev.to_string().len() + 3)
            .sum::<usize>();
    }

    /// Returns true when no more records should be added.
    pub fn is_full(&self) -> bool {
        self.records >= self.max_records || self.bytes >= self.max_bytes
    }

    /// Returns true if no records were added.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Number of change records in the batch.
    pub fn len(&self) -> usize {
        self.records
    }

    /// Estimated serialized size of the manifest.
    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the manifest and resets the batch.
    pub fn take(&mut self) -> Manifest {
        self.records = 0;
        self.bytes = 2;
        std::mem::take(&mut self.manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kouch_protocol::RevisionId;

    fn change(id: &str, revs: &[&str]) -> Change {
        let revs = revs
            .iter()
            .map(|r| RevisionId::parse(r).unwrap())
            .collect();
        Change::new(id, revs, 1u64)
    }

    #[test]
    fn full_by_count() {
        let mut batch = Batch::new(2, usize::MAX);
        assert!(batch.is_empty());
        batch.push(&change("a", &["1-aa"]));
        assert!(!batch.is_full());
        batch.push(&change("b", &["1-bb"]));
        assert!(batch.is_full());

        let manifest = batch.take();
        assert_eq!(manifest.len(), 2);
        assert!(batch.is_empty());
        assert!(!batch.is_full());
    }

    #[test]
    fn full_by_bytes() {
        let mut batch = Batch::new(100, 64);
        batch.push(&change("doc-one", &["1-0123456789abcdef"]));
        assert!(!batch.is_full());
        batch.push(&change("doc-two", &["1-0123456789abcdef", "2-fedcba9876543210"]));
        assert!(batch.is_full());
    }

    #[test]
    fn estimate_tracks_encoding() {
        let mut batch = Batch::new(100, usize::MAX);
        batch.push(&change("foo", &["2-7051cbe5c8faecd085a3fa619e6e6337"]));
        batch.push(&change("bar", &["1-abc", "1-def"]));
        let encoded = serde_json::to_string(&batch.take()).unwrap();
        let estimate = 2 + (3 + 6) + (34 + 3) + (3 + 6) + (5 + 3) * 2;
        assert!(encoded.len() <= estimate);
    }

    #[test]
    fn repeated_doc_merges() {
        let mut batch = Batch::new(100, usize::MAX);
        batch.push(&change("a", &["1-aa"]));
        batch.push(&change("a", &["2-bb"]));
        assert_eq!(batch.len(), 2);
        let manifest = batch.take();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.rev_count(), 2);
    }
}
