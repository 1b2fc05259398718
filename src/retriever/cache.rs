//! Two-tier search-result cache
//!
//! Tier 1 is an exact `query_hash` lookup; tier 2 is a semantic probe
//! against the `search_cache:semantic` HNSW index (`k=1`, cosine similarity
//! `>= 0.95`). Both tiers respect the entry's TTL.

use sha2::{Digest, Sha256};

use crate::config::RetrieverConfig;
use crate::error::Result;
use crate::model::SearchCacheEntry;
use crate::storage::Store;

/// `SHA256(normalize(query) + canonical(options))`, hex-encoded.
pub fn query_hash(query: &str, options: &serde_json::Value) -> String {
    let normalized = query.trim().to_lowercase();
    let canonical = canonicalize(options);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic JSON serialization: `serde_json::Value` backed by a
/// `BTreeMap`-equivalent key order is not guaranteed for `Map`, so sort keys
/// explicitly before hashing.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    sorted.insert(key.clone(), sort(&map[key]));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Probe both cache tiers. Returns cached results on a hit, `None` on a
/// full miss (the caller should then run the candidate-generation
/// pipeline).
pub async fn probe(
    store: &Store,
    query: &str,
    options: &serde_json::Value,
    query_embedding: &[f32],
    config: &RetrieverConfig,
) -> Result<Option<serde_json::Value>> {
    let now = now_seconds();
    let hash = query_hash(query, options);

    if let Some(entry) = store.cache_get(&hash)? {
        if entry.is_fresh(now, config.cache_ttl.as_secs() as i64) {
            return Ok(Some(entry.results));
        }
    }

    #[cfg(feature = "vector-search")]
    {
        let hits = store.ann_search(crate::storage::vector::SEARCH_CACHE, query_embedding, 1)?;
        if let Some((hash, similarity)) = hits.into_iter().next() {
            if similarity >= config.semantic_cache_threshold {
                if let Some(entry) = store.cache_get(&hash)? {
                    if entry.is_fresh(now, config.cache_ttl.as_secs() as i64) {
                        return Ok(Some(entry.results));
                    }
                }
            }
        }
    }

    Ok(None)
}

/// Store the result set for `query`. Best-effort: failures are logged and
/// swallowed per the retriever's cache-store contract.
pub async fn store_results(
    store: &Store,
    query: &str,
    options: &serde_json::Value,
    query_embedding: Vec<f32>,
    results: serde_json::Value,
) {
    let hash = query_hash(query, options);
    let entry = SearchCacheEntry::new(
        hash,
        query.to_string(),
        results,
        options.clone(),
        query_embedding,
        now_seconds(),
    );
    if let Err(e) = store.cache_put(&entry) {
        tracing::warn!(error = %e, "search cache write failed, continuing without caching");
    }
}

fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_key_order() {
        let a = query_hash("hello", &serde_json::json!({"a": 1, "b": 2}));
        let b = query_hash("hello", &serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn hash_is_case_and_whitespace_insensitive_on_query_text() {
        let a = query_hash("Hello World", &serde_json::json!({}));
        let b = query_hash("  hello world  ", &serde_json::json!({}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_options_yield_different_hash() {
        let a = query_hash("hello", &serde_json::json!({"limit": 10}));
        let b = query_hash("hello", &serde_json::json!({"limit": 20}));
        assert_ne!(a, b);
    }
}
