//! Persisted graph-analytics outputs

use serde::{Deserialize, Serialize};

/// `entity_id -> community_id` mapping produced by Label Propagation and
/// consulted by bridge discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCommunity {
    pub entity_id: String,
    pub community_id: i64,
}

/// `entity_id -> pagerank` mapping, multiplied into retriever scores as
/// `(1 + pagerank)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRank {
    pub entity_id: String,
    pub pagerank: f64,
}
