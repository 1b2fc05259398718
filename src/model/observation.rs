//! Observation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::Value;
use super::validity::Validity;

/// An observation: a piece of text attributed to an entity.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// The entity this observation is attributed to. Not validity-enforced
    /// against the referenced entity — the Store does not require the
    /// entity to still be live.
    pub entity_id: String,
    /// Observation text. Non-empty.
    pub text: String,
    /// Unit vector embedding of `text`, if computed.
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata.
    pub metadata: Value,
    /// Current validity stamp.
    pub validity: Validity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Observation {
    /// Build a new observation with a fresh id, asserted now.
    pub fn new(entity_id: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            text: text.into(),
            embedding: None,
            metadata: Value::empty_object(),
            validity: Validity::asserted_now(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_observation_is_asserted() {
        let o = Observation::new("entity-1", "met with Bob about the rollout");
        assert!(o.validity.asserted);
        assert_eq!(o.entity_id, "entity-1");
    }
}
