//! User-defined inference rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A declarative rule that, when bound against a start entity (`$id`) and
/// run, must return rows of shape `(from_id, to_id, relation_type,
/// confidence, reason)`.
///
/// `datalog` is stored as opaque text. The Store realizes it as a
/// parameterized SQL query over `relationships`/`entities` (a `WITH
/// RECURSIVE` CTE when the rule describes a transitive path); validation of
/// the returned column shape happens at insertion time in
/// [`crate::storage::Store::insert_inference_rule`], not here.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRule {
    pub id: String,
    pub name: String,
    pub datalog: String,
    pub created_at: DateTime<Utc>,
}

impl InferenceRule {
    pub fn new(name: impl Into<String>, datalog: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            datalog: datalog.into(),
            created_at: Utc::now(),
        }
    }
}

/// The five columns a custom rule's result set must contain, in order.
pub const RULE_RESULT_COLUMNS: [&str; 5] =
    ["from_id", "to_id", "relation_type", "confidence", "reason"];
