//! Change records from the changes feed.

use crate::revision::RevisionId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// An opaque update sequence token.
///
/// CouchDB 1.x emits integers, 2.x and later emit strings. The engine never
/// interprets the value, it is only carried along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(pub Value);

impl Seq {
    /// The sequence token representing the beginning of the feed.
    pub fn zero() -> Self {
        Seq(Value::from(0))
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        Seq(Value::String(s.to_string()))
    }
}

impl From<u64> for Seq {
    fn from(n: u64) -> Self {
        Seq(Value::from(n))
    }
}

/// A single record from the changes feed.
///
/// With `style=all_docs`, `revs` holds every leaf revision of the document,
/// not only the winner.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Document id.
    pub id: String,
    /// Leaf revisions, never empty.
    pub revs: Vec<RevisionId>,
    /// Update sequence of this change.
    pub seq: Seq,
    /// Whether the winning revision is a tombstone.
    pub deleted: bool,
}

impl Change {
    /// Creates a change record.
    pub fn new(id: impl Into<String>, revs: Vec<RevisionId>, seq: impl Into<Seq>) -> Self {
        Self {
            id: id.into(),
            revs,
            seq: seq.into(),
            deleted: false,
        }
    }

    /// Marks the change as a deletion.
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct RevEntry {
    rev: RevisionId,
}

#[derive(Serialize, Deserialize)]
struct WireChange {
    seq: Seq,
    id: String,
    changes: Vec<RevEntry>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireChange {
            seq: self.seq.clone(),
            id: self.id.clone(),
            changes: self
                .revs
                .iter()
                .map(|rev| RevEntry { rev: rev.clone() })
                .collect(),
            deleted: self.deleted,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Change {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireChange::deserialize(deserializer)?;
        if wire.changes.is_empty() {
            return Err(serde::de::Error::custom(format!(
                "change for {:?} lists no revisions",
                wire.id
            )));
        }
        Ok(Change {
            id: wire.id,
            revs: wire.changes.into_iter().map(|c| c.rev).collect(),
            seq: wire.seq,
            deleted: wire.deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_couch_change() {
        let json = r#"{"seq":"3-g1AAAA","id":"foo","changes":[{"rev":"2-7051cbe5c8faecd085a3fa619e6e6337"}]}"#;
        let change: Change = serde_json::from_str(json).unwrap();
        assert_eq!(change.id, "foo");
        assert_eq!(change.revs.len(), 1);
        assert_eq!(change.revs[0].generation(), 2);
        assert_eq!(change.seq.to_string(), "3-g1AAAA");
        assert!(!change.deleted);
    }

    #[test]
    fn decode_deleted_with_numeric_seq() {
        let json = r#"{"seq":12,"id":"gone","changes":[{"rev":"3-a"},{"rev":"2-b"}],"deleted":true}"#;
        let change: Change = serde_json::from_str(json).unwrap();
        assert!(change.deleted);
        assert_eq!(change.seq, Seq::from(12u64));
        assert_eq!(change.revs.len(), 2);
    }

    #[test]
    fn reject_empty_revs() {
        let json = r#"{"seq":1,"id":"x","changes":[]}"#;
        assert!(serde_json::from_str::<Change>(json).is_err());
    }

    #[test]
    fn encode_matches_wire_shape() {
        let change = Change::new("a", vec![RevisionId::parse("1-x").unwrap()], 7u64).deleted();
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"seq": 7, "id": "a", "changes": [{"rev": "1-x"}], "deleted": true})
        );
    }
}
