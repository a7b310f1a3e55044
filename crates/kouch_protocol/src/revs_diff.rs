//! `_revs_diff` request manifests and response entries.

use crate::revision::RevisionId;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

/// A revision manifest: `doc_id → [rev, …]`.
///
/// Documents keep the order in which they were first added, so a manifest
/// built from a batch of changes lists documents in feed order. Adding the
/// same document twice merges its revisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: Vec<(String, Vec<RevisionId>)>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds revisions for a document. Duplicate revisions are ignored.
    ///
    /// Returns the number of revisions that were new to the manifest.
    pub fn add(&mut self, doc_id: &str, revs: &[RevisionId]) -> usize {
        let slot = match self.index.get(doc_id) {
            Some(&i) => i,
            None => {
                self.entries.push((doc_id.to_string(), Vec::new()));
                self.index.insert(doc_id.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let list = &mut self.entries[slot].1;
        let mut added = 0;
        for rev in revs {
            if !list.contains(rev) {
                list.push(rev.clone());
                added += 1;
            }
        }
        added
    }

    /// Returns the number of documents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the manifest lists no documents.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total number of revisions across all documents.
    pub fn rev_count(&self) -> usize {
        self.entries.iter().map(|(_, revs)| revs.len()).sum()
    }

    /// Returns the revisions listed for a document.
    pub fn get(&self, doc_id: &str) -> Option<&[RevisionId]> {
        self.index
            .get(doc_id)
            .map(|&i| self.entries[i].1.as_slice())
    }

    /// Iterates documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RevisionId])> {
        self.entries
            .iter()
            .map(|(id, revs)| (id.as_str(), revs.as_slice()))
    }

    /// Returns the document ids in insertion order.
    pub fn doc_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }
}

impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, revs) in &self.entries {
            map.serialize_entry(id, revs)?;
        }
        map.end()
    }
}

/// One document in a `_revs_diff` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevsDiffEntry {
    /// Document id.
    #[serde(skip)]
    pub id: String,
    /// Revisions the target does not have.
    #[serde(default)]
    pub missing: Vec<RevisionId>,
    /// Leaf revisions the target has that may be ancestors of the missing
    /// ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible_ancestors: Option<Vec<RevisionId>>,
}

impl RevsDiffEntry {
    /// Creates an entry with only missing revisions.
    pub fn new(id: impl Into<String>, missing: Vec<RevisionId>) -> Self {
        Self {
            id: id.into(),
            missing,
            possible_ancestors: None,
        }
    }

    /// Decodes a whole `_revs_diff` response body, keyed by document id.
    pub fn decode_response(bytes: &[u8]) -> crate::ProtocolResult<Vec<RevsDiffEntry>> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes)?;
        map.into_iter()
            .map(|(id, value)| {
                let mut entry = RevsDiffEntry::deserialize(value)?;
                entry.id = id;
                Ok(entry)
            })
            .collect()
    }
}
