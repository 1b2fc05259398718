//! Entity records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::Value;
use super::validity::Validity;

/// An entity: a named, typed node in the knowledge graph.
///
/// Construction is a plain data builder; the invariants named in the data
/// model (case-insensitive name uniqueness among live entities, mutually
/// exclusive `active`/`discontinued` status) are enforced by the Store's
/// insert path, not here.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Display name. Case-insensitively unique among live entities.
    pub name: String,
    /// Entity type, e.g. `"Person"`, `"Project"`, `"Task"`, `"Note"`.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Free-form metadata.
    pub metadata: Value,
    /// Unit vector embedding of the entity's content, if computed.
    pub content_embedding: Option<Vec<f32>>,
    /// Unit vector embedding of `name` alone, if computed.
    pub name_embedding: Option<Vec<f32>>,
    /// Current validity stamp.
    pub validity: Validity,
    /// When this entity id was first created (independent of validity
    /// history — retractions do not move this).
    pub created_at: DateTime<Utc>,
    /// When this entity was last written.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Build a new entity with a fresh id, asserted now.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type: entity_type.into(),
            metadata: Value::empty_object(),
            content_embedding: None,
            name_embedding: None,
            validity: Validity::asserted_now(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `metadata.status` marks this entity active.
    pub fn is_active_status(&self) -> bool {
        self.metadata.status() == Some("active")
    }

    /// Whether `metadata.status` (or `archived`) marks this entity
    /// discontinued.
    pub fn is_discontinued_status(&self) -> bool {
        self.metadata.status() == Some("discontinued") || self.metadata.archived()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_is_asserted_and_has_empty_metadata() {
        let e = Entity::new("Alice", "Person");
        assert!(e.validity.asserted);
        assert_eq!(e.metadata, Value::empty_object());
        assert!(!e.id.is_empty());
    }

    #[test]
    fn status_and_discontinued_cannot_both_read_true_from_disjoint_values() {
        let mut e = Entity::new("Project X", "Project");
        e.metadata.set("status", Value::String("active".into()));
        assert!(e.is_active_status());
        assert!(!e.is_discontinued_status());
    }
}
