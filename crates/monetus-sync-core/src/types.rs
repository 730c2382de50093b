//! Strong type definitions for Monetus Sync Core.
//!
//! Record identifiers are newtypes so they cannot be confused with other
//! string fields such as a category reference or a description.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A caller-assigned record identifier.
///
/// Identity is the only thing the merge engine looks at: two records with
/// the same `RecordId` are the same record, whatever their contents.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new RecordId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An identity-keyed record.
pub trait Record: Clone {
    /// The record's identity.
    fn id(&self) -> &RecordId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_display() {
        let id = RecordId::new("t1");
        assert_eq!(format!("{}", id), "t1");
        assert_eq!(format!("{:?}", id), "RecordId(t1)");
    }

    #[test]
    fn test_record_id_serializes_as_plain_string() {
        let id = RecordId::new("exp-14");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"exp-14\"");
    }
}
