//! Document bodies.

use crate::error::{ProtocolError, ProtocolResult};
use crate::revision::{RevisionId, Revisions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON document.
///
/// The body is opaque apart from the reserved members `_id`, `_rev`,
/// `_deleted`, `_revisions` and `_attachments`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProtocolError::invalid_document(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Parses a document from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    /// Returns the underlying JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Returns the members of the document.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the `_id` member.
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    /// Returns the `_rev` member, parsed.
    pub fn rev(&self) -> ProtocolResult<Option<RevisionId>> {
        match self.0.get("_rev") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => RevisionId::parse(s).map(Some),
            Some(other) => Err(ProtocolError::InvalidRevision(other.to_string())),
        }
    }

    /// Returns true if the document is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.0
            .get("_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the `_revisions` ancestry, if present.
    pub fn revisions(&self) -> ProtocolResult<Option<Revisions>> {
        match self.0.get("_revisions") {
            None => Ok(None),
            Some(value) => Ok(Some(Revisions::deserialize(value)?)),
        }
    }

    /// Returns true if the document carries attachments.
    pub fn has_attachments(&self) -> bool {
        self.0
            .get("_attachments")
            .and_then(Value::as_object)
            .is_some_and(|a| !a.is_empty())
    }

    /// Returns a member of the document.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a member of the document.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Removes a member of the document.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Sets `_id`.
    pub fn set_id(&mut self, id: &str) {
        self.insert("_id", id);
    }

    /// Sets `_rev`.
    pub fn set_rev(&mut self, rev: &RevisionId) {
        self.insert("_rev", rev.to_string());
    }

    /// Sets `_revisions`.
    pub fn set_revisions(&mut self, revisions: &Revisions) {
        self.0.insert(
            "_revisions".into(),
            serde_json::json!({"start": revisions.start, "ids": revisions.ids}),
        );
    }

    /// Returns a copy without the reserved `_` members.
    pub fn body(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl TryFrom<Value> for Document {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// One element of an `open_revs` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpenRev {
    /// The revision was found.
    #[serde(rename = "ok")]
    Found(Document),
    /// The revision does not exist in the database.
    #[serde(rename = "missing")]
    Missing(RevisionId),
}
