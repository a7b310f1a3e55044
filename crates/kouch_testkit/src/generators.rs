//! Property-based test generators using proptest.

use kouch_protocol::{Change, RevisionId};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for revision ids with 32-character hex hashes.
pub fn revision_id_strategy() -> impl Strategy<Value = RevisionId> {
    (
        1u64..1000,
        prop::string::string_regex("[0-9a-f]{32}").expect("Invalid regex"),
    )
        .prop_map(|(generation, hash)| {
            RevisionId::new(generation, hash).expect("Generated revision must be valid")
        })
}

/// Strategy for small document bodies without reserved members.
pub fn body_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,20}".prop_map(Value::from),
        ],
        0..5,
    )
    .prop_map(|m| m.into_iter().collect())
}

/// Strategy for change records.
pub fn change_strategy() -> impl Strategy<Value = Change> {
    (
        doc_id_strategy(),
        prop::collection::vec(revision_id_strategy(), 1..4),
        any::<u32>(),
        any::<bool>(),
    )
        .prop_map(|(id, revs, seq, deleted)| {
            let change = Change::new(id, revs, u64::from(seq));
            if deleted {
                change.deleted()
            } else {
                change
            }
        })
}

/// Strategy for a sequence of writes against a small id space, so that some
/// writes update documents written earlier.
pub fn writes_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Map<String, Value>)>> {
    prop::collection::vec(
        (
            prop::string::string_regex("doc[0-9]").expect("Invalid regex"),
            body_strategy(),
        ),
        0..max,
    )
}
