//! Type-safe identifier wrappers.
//!
//! Aggregate identifiers are opaque strings. Generators receive a random
//! UUID v4 at creation time, while vehicles are identified by the lowercase
//! hex SHA-256 digest of their generated content, so the same logical
//! vehicle always maps to the same identifier.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Identifier of a single aggregate instance (a generator or a vehicle).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct AggregateId(pub String);

impl AggregateId {
    /// Create a fresh random identifier (UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AggregateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AggregateId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<AggregateId> for String {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct() {
        let a = AggregateId::random();
        let b = AggregateId::random();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = AggregateId::from("abc");
        let json = serde_json::to_string(&id).ok();
        assert_eq!(json.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn display_matches_inner() {
        let id = AggregateId::from("gen-1");
        assert_eq!(id.to_string(), "gen-1");
    }
}
