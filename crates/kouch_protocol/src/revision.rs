//! Revision identifiers and revision ancestry.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A document revision id of the form `<N>-<hash>`.
///
/// `N` is the generation, a positive integer that grows by one along each
/// edit of a revision chain. The hash is opaque.
///
/// Revisions order by generation first and hash second, which is the same
/// order CouchDB uses to pick a deterministic winner between conflicting
/// leafs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionId {
    generation: u64,
    hash: String,
}

impl RevisionId {
    /// Creates a revision id from its parts.
    pub fn new(generation: u64, hash: impl Into<String>) -> ProtocolResult<Self> {
        let hash = hash.into();
        if generation == 0 || hash.is_empty() || hash.contains('-') {
            return Err(ProtocolError::InvalidRevision(format!("{generation}-{hash}")));
        }
        Ok(Self { generation, hash })
    }

    /// Parses a revision id.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| ProtocolError::InvalidRevision(s.to_string()))?;
        let generation: u64 = generation
            .parse()
            .map_err(|_| ProtocolError::InvalidRevision(s.to_string()))?;
        Self::new(generation, hash).map_err(|_| ProtocolError::InvalidRevision(s.to_string()))
    }

    /// Returns the generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the opaque hash part.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl Ord for RevisionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for RevisionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for RevisionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RevisionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RevisionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The `_revisions` member of a document fetched with `revs=true`.
///
/// `ids[0]` is the hash of the revision at generation `start`, `ids[1]` the
/// hash of its parent, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    /// Generation of the newest revision in the list.
    pub start: u64,
    /// Revision hashes, newest first.
    pub ids: Vec<String>,
}

impl Revisions {
    /// Expands the ancestry into full revision ids, newest first.
    ///
    /// Entries that would fall below generation 1 are dropped.
    pub fn to_revision_ids(&self) -> ProtocolResult<Vec<RevisionId>> {
        self.ids
            .iter()
            .enumerate()
            .take_while(|(i, _)| (*i as u64) < self.start)
            .map(|(i, hash)| RevisionId::new(self.start - i as u64, hash.clone()))
            .collect()
    }

    /// Builds the ancestry list from revision ids ordered newest first.
    pub fn from_revision_ids(revs: &[RevisionId]) -> Option<Self> {
        let first = revs.first()?;
        Some(Self {
            start: first.generation(),
            ids: revs.iter().map(|r| r.hash().to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        let rev = RevisionId::parse("2-7051cbe5c8faecd085a3fa619e6e6337").unwrap();
        assert_eq!(rev.generation(), 2);
        assert_eq!(rev.hash(), "7051cbe5c8faecd085a3fa619e6e6337");
        assert_eq!(rev.to_string(), "2-7051cbe5c8faecd085a3fa619e6e6337");
    }

    #[test]
    fn parse_invalid() {
        for bad in ["", "abc", "0-abc", "-abc", "1-", "x-abc", "1-a-b"] {
            assert!(RevisionId::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn ordering_by_generation_then_hash() {
        let a = RevisionId::parse("2-aaa").unwrap();
        let b = RevisionId::parse("2-bbb").unwrap();
        let c = RevisionId::parse("10-000").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serde_as_string() {
        let rev = RevisionId::parse("3-abc").unwrap();
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"3-abc\"");
        let back: RevisionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);
        assert!(serde_json::from_str::<RevisionId>("\"nope\"").is_err());
    }

    #[test]
    fn revisions_expand() {
        let revs = Revisions {
            start: 3,
            ids: vec!["c".into(), "b".into(), "a".into()],
        };
        let ids = revs.to_revision_ids().unwrap();
        let strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(strings, ["3-c", "2-b", "1-a"]);
        assert_eq!(Revisions::from_revision_ids(&ids), Some(revs));
    }

    #[test]
    fn revisions_truncates_below_generation_one() {
        let revs = Revisions {
            start: 1,
            ids: vec!["a".into(), "stray".into()],
        };
        assert_eq!(revs.to_revision_ids().unwrap().len(), 1);
    }
}
