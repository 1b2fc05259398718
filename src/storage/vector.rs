//! Named HNSW vector indexes
//!
//! Generalizes the single-index wrapper idiom to the set of named,
//! per-field indexes the store maintains: `entity.embedding`,
//! `entity.name_embedding`, `observation.embedding`, `search_cache.embedding`,
//! plus type-filtered partitions of `entity.embedding` for `{Person,
//! Project, Task, Note}`.

#![cfg(feature = "vector-search")]

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::HnswConfig;

/// Errors from the underlying HNSW index.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorIndexError {
    IndexCreation(String),
    IndexAdd(String),
    IndexSearch(String),
    InvalidDimensions { expected: usize, got: usize },
    UnknownIndex(String),
}

impl std::fmt::Display for VectorIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorIndexError::IndexCreation(e) => write!(f, "index creation failed: {e}"),
            VectorIndexError::IndexAdd(e) => write!(f, "failed to add vector: {e}"),
            VectorIndexError::IndexSearch(e) => write!(f, "search failed: {e}"),
            VectorIndexError::InvalidDimensions { expected, got } => {
                write!(f, "invalid dimensions: expected {expected}, got {got}")
            }
            VectorIndexError::UnknownIndex(name) => write!(f, "unknown index: {name}"),
        }
    }
}

impl std::error::Error for VectorIndexError {}

/// A single named HNSW index over string keys.
pub struct VectorIndex {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    pub fn new(config: &HnswConfig) -> Result<Self, VectorIndexError> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: config.m,
            expansion_add: config.ef_construction,
            expansion_search: config.ef_search,
            multi: false,
        };
        let index =
            Index::new(&options).map_err(|e| VectorIndexError::IndexCreation(e.to_string()))?;
        Ok(Self {
            index,
            dimensions: config.dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    fn reserve(&self, capacity: usize) -> Result<(), VectorIndexError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorIndexError::IndexCreation(e.to_string()))
    }

    /// Insert or overwrite the vector for `key`.
    pub fn upsert(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index
                .remove(existing_id)
                .map_err(|e| VectorIndexError::IndexAdd(e.to_string()))?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| VectorIndexError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        let current_capacity = self.index.capacity();
        let current_size = self.index.size();
        if current_size >= current_capacity {
            let new_capacity = std::cmp::max(current_capacity * 2, 16);
            self.reserve(new_capacity)?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| VectorIndexError::IndexAdd(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, VectorIndexError> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| VectorIndexError::IndexAdd(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Top-`limit` nearest keys by cosine similarity (`1 - distance`).
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, VectorIndexError> {
        if query.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self
            .index
            .search(query, limit)
            .map_err(|e| VectorIndexError::IndexSearch(e.to_string()))?;

        let mut out = Vec::with_capacity(results.keys.len());
        for (id, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(key) = self.id_to_key.get(id) {
                out.push((key.clone(), 1.0 - distance));
            }
        }
        Ok(out)
    }
}

/// The full set of named vector indexes the store maintains.
pub struct VectorIndexSet {
    indexes: HashMap<String, VectorIndex>,
    config: HnswConfig,
}

/// Canonical index names for the always-present (non-type-filtered) fields.
pub const ENTITY_CONTENT: &str = "entity.embedding";
pub const ENTITY_NAME: &str = "entity.name_embedding";
pub const OBSERVATION_CONTENT: &str = "observation.embedding";
pub const SEARCH_CACHE: &str = "search_cache.embedding";

/// Name of the type-filtered partition of `entity.embedding` for `entity_type`.
pub fn type_partition_name(entity_type: &str) -> String {
    format!("entity.embedding::{entity_type}")
}

impl VectorIndexSet {
    pub fn new(config: HnswConfig) -> Result<Self, VectorIndexError> {
        let mut indexes = HashMap::new();
        for name in [ENTITY_CONTENT, ENTITY_NAME, OBSERVATION_CONTENT, SEARCH_CACHE] {
            indexes.insert(name.to_string(), VectorIndex::new(&config)?);
        }
        for entity_type in crate::model::VECTOR_PARTITIONED_TYPES {
            indexes.insert(type_partition_name(entity_type), VectorIndex::new(&config)?);
        }
        Ok(Self { indexes, config })
    }

    fn get(&self, name: &str) -> Result<&VectorIndex, VectorIndexError> {
        self.indexes
            .get(name)
            .ok_or_else(|| VectorIndexError::UnknownIndex(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut VectorIndex, VectorIndexError> {
        self.indexes
            .get_mut(name)
            .ok_or_else(|| VectorIndexError::UnknownIndex(name.to_string()))
    }

    pub fn upsert(&mut self, index: &str, key: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.get_mut(index)?.upsert(key, vector)
    }

    /// Upsert an entity's content embedding into both the global index and,
    /// if `entity_type` has a dedicated partition, that partition too.
    pub fn upsert_entity_content(
        &mut self,
        entity_type: &str,
        key: &str,
        vector: &[f32],
    ) -> Result<(), VectorIndexError> {
        self.upsert(ENTITY_CONTENT, key, vector)?;
        if crate::model::VECTOR_PARTITIONED_TYPES.contains(&entity_type) {
            self.upsert(&type_partition_name(entity_type), key, vector)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, index: &str, key: &str) -> Result<bool, VectorIndexError> {
        self.get_mut(index)?.remove(key)
    }

    pub fn search(
        &self,
        index: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        self.get(index)?.search(query, limit)
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn len(&self, index: &str) -> Result<usize, VectorIndexError> {
        Ok(self.get(index)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HnswConfig {
        HnswConfig {
            dimensions: 8,
            m: 8,
            ef_construction: 32,
            ef_search: 16,
        }
    }

    fn vec_at(seed: f32, dims: usize) -> Vec<f32> {
        (0..dims).map(|i| ((i as f32 + seed) / dims as f32).sin()).collect()
    }

    #[test]
    fn upserts_into_global_and_type_partition() {
        let mut set = VectorIndexSet::new(cfg()).unwrap();
        let v = vec_at(1.0, 8);
        set.upsert_entity_content("Person", "alice", &v).unwrap();
        assert!(set.get(ENTITY_CONTENT).unwrap().contains("alice"));
        assert!(set
            .get(&type_partition_name("Person"))
            .unwrap()
            .contains("alice"));
    }

    #[test]
    fn unpartitioned_type_skips_partition_write() {
        let mut set = VectorIndexSet::new(cfg()).unwrap();
        let v = vec_at(1.0, 8);
        set.upsert_entity_content("Organization", "acme", &v).unwrap();
        assert!(set.get(ENTITY_CONTENT).unwrap().contains("acme"));
        assert!(!set.indexes.contains_key(&type_partition_name("Organization")));
    }

    #[test]
    fn search_ranks_nearest_first() {
        let mut index = VectorIndex::new(&cfg()).unwrap();
        let v1 = vec_at(1.0, 8);
        let v2 = vec_at(50.0, 8);
        index.upsert("a", &v1).unwrap();
        index.upsert("b", &v2).unwrap();
        let results = index.search(&v1, 2).unwrap();
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn rejects_wrong_dimensions() {
        let mut index = VectorIndex::new(&cfg()).unwrap();
        let err = index.upsert("a", &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, VectorIndexError::InvalidDimensions { .. }));
    }
}
