//! Relationship records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::Value;
use super::validity::Validity;

/// A typed, directed, weighted relationship between two entities.
///
/// Keyed by `(from_id, to_id, relation_type, validity)`. The Store's insert
/// path rejects `from_id == to_id`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    /// Relationship strength in `[0, 1]`, used as edge weight by
    /// `GraphAnalytics` and by the retriever's graph-expansion source.
    pub strength: f32,
    pub metadata: Value,
    pub validity: Validity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Build a new relationship with default strength 1.0, asserted now.
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            relation_type: relation_type.into(),
            strength: 1.0,
            metadata: Value::empty_object(),
            validity: Validity::asserted_now(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Whether this relationship is a self-loop — rejected by the Store on
    /// insert, but checked here too so callers can fail fast.
    pub fn is_self_loop(&self) -> bool {
        self.from_id == self.to_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_strength_into_unit_interval() {
        let r = Relationship::new("a", "b", "knows").with_strength(1.7);
        assert_eq!(r.strength, 1.0);
        let r = Relationship::new("a", "b", "knows").with_strength(-0.3);
        assert_eq!(r.strength, 0.0);
    }

    #[test]
    fn detects_self_loop() {
        let r = Relationship::new("a", "a", "knows");
        assert!(r.is_self_loop());
    }
}
