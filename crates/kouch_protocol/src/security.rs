//! Database security objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A list of user names and roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Members {
    /// User names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    /// Role names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl Members {
    /// Returns true if no names or roles are listed.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.roles.is_empty()
    }
}

/// The `_security` document of a database.
///
/// Members other than `admins` and `members` are preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityObject {
    /// Database administrators.
    #[serde(default)]
    pub admins: Members,
    /// Database members (readers).
    #[serde(default)]
    pub members: Members,
    /// Any other members.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_normalises() {
        let sec: SecurityObject = serde_json::from_str("{}").unwrap();
        assert_eq!(
            serde_json::to_value(&sec).unwrap(),
            json!({"admins": {}, "members": {}})
        );
    }

    #[test]
    fn members_roundtrip_with_extras() {
        let input = json!({
            "admins": {"roles": ["_admin"]},
            "members": {"names": ["bob"]},
            "couchdb_auth_only": true
        });
        let sec: SecurityObject = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(sec.members.names, ["bob"]);
        assert!(sec.admins.names.is_empty());
        assert_eq!(serde_json::to_value(&sec).unwrap(), input);
    }
}
