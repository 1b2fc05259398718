//! Memory snapshot records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::Value;

/// Aggregate counts captured at a point in time, for `manage_system`'s
/// `snapshot_create` / `snapshot_list` / `snapshot_diff` actions.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub id: String,
    pub entity_count: i64,
    pub observation_count: i64,
    pub relationship_count: i64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl MemorySnapshot {
    pub fn new(entity_count: i64, observation_count: i64, relationship_count: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_count,
            observation_count,
            relationship_count,
            metadata: Value::empty_object(),
            created_at: Utc::now(),
        }
    }

    /// Field-by-field delta against an earlier snapshot.
    pub fn diff(&self, earlier: &MemorySnapshot) -> SnapshotDiff {
        SnapshotDiff {
            entity_delta: self.entity_count - earlier.entity_count,
            observation_delta: self.observation_count - earlier.observation_count,
            relationship_delta: self.relationship_count - earlier.relationship_count,
        }
    }
}

/// The result of comparing two snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub entity_delta: i64,
    pub observation_delta: i64,
    pub relationship_delta: i64,
}
