//! Request options.
//!
//! [`Options`] is the heterogeneous key/value bag that crosses the client
//! boundary. The typed structs model the options an operation recognizes and
//! carry anything else through unchanged.

use crate::revision::RevisionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A heterogeneous option bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, Value>);

impl Options {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Sets an option, returning the bag.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns an option.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Removes and returns an option.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns true if the option is set.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Reads a boolean option. The strings `"true"` and `"false"` are
    /// accepted as well.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Reads a string option.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Reads a list of strings. A single string is treated as a one-element
    /// list.
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::String(s) => Some(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// Returns true if the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merges another bag into this one; entries in `other` win.
    pub fn merge(&mut self, other: Options) {
        self.0.extend(other.0);
    }

    /// Renders the bag as URL query pairs.
    ///
    /// Strings are sent verbatim, every other value as its JSON encoding, as
    /// CouchDB expects for `open_revs`, `keys` and similar parameters.
    pub fn to_query(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for Options {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which leaf revisions to fetch with `open_revs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRevs {
    /// Every leaf revision.
    All,
    /// The listed revisions.
    Revs(Vec<RevisionId>),
}

impl OpenRevs {
    /// Renders the `open_revs` query value.
    pub fn to_query_value(&self) -> String {
        match self {
            OpenRevs::All => "all".to_string(),
            OpenRevs::Revs(revs) => {
                serde_json::to_string(revs).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }
}

/// Options for fetching a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    /// Fetch this revision instead of the winner.
    pub rev: Option<RevisionId>,
    /// Include the `_revisions` ancestry.
    pub revs: bool,
    /// Include attachment bodies inline.
    pub attachments: bool,
    /// Unrecognized options, passed through.
    pub extra: Options,
}

impl GetOptions {
    /// Options used by replication: `revs=true&attachments=true`.
    pub fn replication() -> Self {
        Self {
            revs: true,
            attachments: true,
            ..Self::default()
        }
    }

    /// Parses recognized keys out of an option bag.
    pub fn from_options(mut opts: Options) -> crate::ProtocolResult<Self> {
        let rev = match opts.remove("rev") {
            Some(Value::String(s)) => Some(RevisionId::parse(&s)?),
            Some(other) => return Err(crate::ProtocolError::InvalidRevision(other.to_string())),
            None => None,
        };
        let revs = opts.get_bool("revs").unwrap_or(false);
        let attachments = opts.get_bool("attachments").unwrap_or(false);
        opts.remove("revs");
        opts.remove("attachments");
        Ok(Self {
            rev,
            revs,
            attachments,
            extra: opts,
        })
    }

    /// Renders the options as URL query pairs.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(rev) = &self.rev {
            query.push(("rev".to_string(), rev.to_string()));
        }
        if self.revs {
            query.push(("revs".to_string(), "true".to_string()));
        }
        if self.attachments {
            query.push(("attachments".to_string(), "true".to_string()));
        }
        query.extend(self.extra.to_query());
        query
    }
}

/// Options for writing a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOptions {
    /// When false, the supplied `_rev` and `_revisions` are stored verbatim.
    pub new_edits: bool,
    /// Unrecognized options, passed through.
    pub extra: Options,
}

impl PutOptions {
    /// Options used by replication: `new_edits=false`.
    pub fn replicated() -> Self {
        Self {
            new_edits: false,
            extra: Options::new(),
        }
    }

    /// Parses recognized keys out of an option bag.
    pub fn from_options(mut opts: Options) -> Self {
        let new_edits = opts.get_bool("new_edits").unwrap_or(true);
        opts.remove("new_edits");
        Self {
            new_edits,
            extra: opts,
        }
    }

    /// Renders the options as URL query pairs.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if !self.new_edits {
            query.push(("new_edits".to_string(), "false".to_string()));
        }
        query.extend(self.extra.to_query());
        query
    }
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            new_edits: true,
            extra: Options::new(),
        }
    }
}

/// Options for reading the changes feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesOptions {
    /// Feed type; replication always reads `normal`.
    pub feed: String,
    /// `all_docs` reports every leaf, `main_only` only the winner.
    pub style: String,
    /// Sequence to start after.
    pub since: String,
    /// Server-side filter function name.
    pub filter: Option<String>,
    /// Restrict the feed to these document ids.
    pub doc_ids: Vec<String>,
    /// Unrecognized options, passed through.
    pub extra: Options,
}

impl ChangesOptions {
    /// Options used by one-shot replication.
    pub fn replication() -> Self {
        Self {
            feed: "normal".to_string(),
            style: "all_docs".to_string(),
            since: "0".to_string(),
            filter: None,
            doc_ids: Vec::new(),
            extra: Options::new(),
        }
    }

    /// Renders the options as URL query pairs.
    ///
    /// When `doc_ids` is set the filter becomes `_doc_ids` and the ids travel
    /// in the request body, see [`ChangesOptions::body`]. Extras never repeat
    /// a key already sent.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("feed".to_string(), self.feed.clone()),
            ("style".to_string(), self.style.clone()),
            ("since".to_string(), self.since.clone()),
        ];
        if !self.doc_ids.is_empty() {
            query.push(("filter".to_string(), "_doc_ids".to_string()));
        } else if let Some(filter) = &self.filter {
            query.push(("filter".to_string(), filter.clone()));
        }
        let extra: Vec<_> = self
            .extra
            .to_query()
            .into_iter()
            .filter(|(k, _)| !query.iter().any(|(fixed, _)| fixed == k))
            .collect();
        query.extend(extra);
        query
    }

    /// Request body for a POSTed changes request, if one is needed.
    pub fn body(&self) -> Option<Value> {
        if self.doc_ids.is_empty() {
            None
        } else {
            Some(serde_json::json!({ "doc_ids": self.doc_ids }))
        }
    }
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self::replication()
    }
}
