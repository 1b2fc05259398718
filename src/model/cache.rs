//! Search cache records

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A cached search result, keyed by `query_hash`.
///
/// `created_at` is stored in **seconds**, distinct from the microsecond
/// scale used by `Validity`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCacheEntry {
    /// `SHA256(normalize(query) + canonical(options))`, hex-encoded.
    pub query_hash: String,
    pub query_text: String,
    /// Opaque serialized result rows.
    pub results: Json,
    /// The options the query was run with, canonicalized for hashing.
    pub options: Json,
    /// The query's embedding, used for the semantic cache probe.
    pub query_embedding: Vec<f32>,
    /// Unix seconds at which this entry was written.
    pub created_at: i64,
}

impl SearchCacheEntry {
    pub fn new(
        query_hash: impl Into<String>,
        query_text: impl Into<String>,
        results: Json,
        options: Json,
        query_embedding: Vec<f32>,
        created_at: i64,
    ) -> Self {
        Self {
            query_hash: query_hash.into(),
            query_text: query_text.into(),
            results,
            options,
            query_embedding,
            created_at,
        }
    }

    /// Whether this entry is still within `ttl_seconds` of `now_seconds`.
    pub fn is_fresh(&self, now_seconds: i64, ttl_seconds: i64) -> bool {
        now_seconds.saturating_sub(self.created_at) < ttl_seconds
    }
}
