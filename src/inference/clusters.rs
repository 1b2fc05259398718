//! HNSW-topology cluster analysis
//!
//! `usearch` doesn't expose the HNSW's internal layer-0 graph through its
//! public API, so the layer-0 neighbor relation is approximated by querying
//! each embedded entity's own top-k nearest neighbors on `entity.embedding`
//! and treating that as an unweighted adjacency list — the same graph shape
//! label propagation would see if it could read the index's internal edges
//! directly.

use std::collections::HashMap;

use crate::analytics::label_propagation;
use crate::error::Result;
use crate::storage::Store;

const NEIGHBOR_K: usize = 6;
const MAX_ITERATIONS: usize = 20;
const MAX_EXAMPLE_NAMES: usize = 5;

/// One cluster found by label propagation over the embedding neighbor graph.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCluster {
    pub cluster_id: usize,
    pub size: usize,
    pub example_names: Vec<String>,
}

/// Group embedded entities into clusters via label propagation, sorted by
/// size descending.
pub fn analyze_clusters(store: &Store) -> Result<Vec<EntityCluster>> {
    let entities = store.list_entities(None, None)?;
    let embedded: Vec<_> = entities.iter().filter(|e| e.content_embedding.is_some()).collect();
    if embedded.is_empty() {
        return Ok(vec![]);
    }

    let mut adjacency: HashMap<String, Vec<(String, f32)>> = HashMap::new();
    for entity in &embedded {
        let vector = entity.content_embedding.as_ref().expect("filtered above");
        let hits = store.ann_search(crate::storage::ENTITY_CONTENT, vector, NEIGHBOR_K + 1)?;
        let neighbor_ids = hits
            .into_iter()
            .filter(|(id, _)| id != &entity.id)
            .map(|(id, similarity)| (id, similarity))
            .collect();
        adjacency.insert(entity.id.clone(), neighbor_ids);
    }

    let labels = label_propagation(&adjacency, MAX_ITERATIONS);

    let names: HashMap<&str, &str> = embedded.iter().map(|e| (e.id.as_str(), e.name.as_str())).collect();
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for (id, label) in &labels {
        groups.entry(label.clone()).or_default().push(
            names.get(id.as_str()).map(|n| n.to_string()).unwrap_or_else(|| id.clone()),
        );
    }

    let mut clusters: Vec<EntityCluster> = groups
        .into_values()
        .map(|mut members| {
            let size = members.len();
            members.sort();
            members.truncate(MAX_EXAMPLE_NAMES);
            EntityCluster { cluster_id: 0, size, example_names: members }
        })
        .collect();
    clusters.sort_by(|a, b| b.size.cmp(&a.size));
    for (i, cluster) in clusters.iter_mut().enumerate() {
        cluster.cluster_id = i;
    }
    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Entity;

    #[test]
    fn entities_without_embeddings_yield_no_clusters() {
        let store = Store::open(None, Config::with_dimensions(8)).unwrap();
        store.insert_entity(&Entity::new("Alice", "Person")).unwrap();
        assert!(analyze_clusters(&store).unwrap().is_empty());
    }

    #[test]
    fn embedded_entities_form_at_least_one_cluster() {
        let store = Store::open(None, Config::with_dimensions(4)).unwrap();
        let mut a = Entity::new("Alpha", "Note");
        a.content_embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
        let mut b = Entity::new("Beta", "Note");
        b.content_embedding = Some(vec![0.99, 0.01, 0.0, 0.0]);
        store.insert_entity(&a).unwrap();
        store.insert_entity(&b).unwrap();

        let clusters = analyze_clusters(&store).unwrap();
        assert!(!clusters.is_empty());
        assert!(clusters.iter().map(|c| c.size).sum::<usize>() >= 2);
    }
}
