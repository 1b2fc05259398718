//! Semantic graph walk
//!
//! Breadth-first expansion from a start entity, mixing explicit relationship
//! hops (`new_score = score * strength`) with semantic ANN hops
//! (`new_score = score * similarity * 0.8`, gated by `min_similarity`).
//! Every reachable entity is reported once, at its best-scoring path.

use std::collections::HashMap;

use crate::error::Result;
use crate::storage::Store;

const SEMANTIC_FANOUT: usize = 5;

/// How the best-scoring path to an entity was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    Start,
    Explicit,
    Semantic,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Explicit,
    Semantic,
}

fn advance(path_type: PathType, step: StepKind) -> PathType {
    match (path_type, step) {
        (PathType::Start, StepKind::Explicit) => PathType::Explicit,
        (PathType::Start, StepKind::Semantic) => PathType::Semantic,
        (PathType::Explicit, StepKind::Explicit) => PathType::Explicit,
        (PathType::Semantic, StepKind::Semantic) => PathType::Semantic,
        _ => PathType::Mixed,
    }
}

/// One walk result: an entity reached from the start, its hop count at the
/// best-scoring path, that path's score, and how the path was assembled.
#[derive(Debug, Clone)]
pub struct WalkHit {
    pub entity_id: String,
    pub distance: i64,
    pub path_score: f32,
    pub path_type: PathType,
}

/// Walk out from `start_id` up to `max_depth` hops, gating semantic hops by
/// `min_similarity`. Returns one [`WalkHit`] per reachable entity, taking
/// the max `path_score` across every path found to it.
pub fn semantic_walk(
    store: &Store,
    start_id: &str,
    max_depth: usize,
    min_similarity: f32,
) -> Result<Vec<WalkHit>> {
    if store.get_entity(start_id, None)?.is_none() {
        return Ok(vec![]);
    }

    let mut best: HashMap<String, (i64, f32, PathType)> = HashMap::new();
    let mut frontier: Vec<(String, f32, PathType)> =
        vec![(start_id.to_string(), 1.0, PathType::Start)];

    for depth in 1..=max_depth as i64 {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();

        for (current_id, score, path_type) in &frontier {
            for rel in store.relationships_for_entity(current_id, None)? {
                if rel.from_id != *current_id {
                    continue;
                }
                if rel.to_id == start_id {
                    continue;
                }
                let new_score = score * rel.strength;
                let new_type = advance(*path_type, StepKind::Explicit);
                update_best(&mut best, &rel.to_id, depth, new_score, new_type);
                next_frontier.push((rel.to_id.clone(), new_score, new_type));
            }

            if let Some(entity) = store.get_entity(current_id, None)? {
                if let Some(vector) = &entity.content_embedding {
                    for (id, similarity) in
                        store.ann_search(crate::storage::ENTITY_CONTENT, vector, SEMANTIC_FANOUT)?
                    {
                        if id == *current_id || id == start_id || similarity < min_similarity {
                            continue;
                        }
                        let new_score = score * similarity * 0.8;
                        let new_type = advance(*path_type, StepKind::Semantic);
                        update_best(&mut best, &id, depth, new_score, new_type);
                        next_frontier.push((id, new_score, new_type));
                    }
                }
            }
        }

        frontier = next_frontier;
    }

    let mut hits: Vec<WalkHit> = best
        .into_iter()
        .map(|(entity_id, (distance, path_score, path_type))| WalkHit {
            entity_id,
            distance,
            path_score,
            path_type,
        })
        .collect();
    hits.sort_by(|a, b| b.path_score.partial_cmp(&a.path_score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(hits)
}

fn update_best(
    best: &mut HashMap<String, (i64, f32, PathType)>,
    id: &str,
    depth: i64,
    score: f32,
    path_type: PathType,
) {
    best.entry(id.to_string())
        .and_modify(|(d, s, t)| {
            if score > *s {
                *d = depth;
                *s = score;
                *t = path_type;
            }
        })
        .or_insert((depth, score, path_type));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Entity, Relationship};

    #[test]
    fn unknown_start_yields_no_hits() {
        let store = Store::open(None, Config::with_dimensions(8)).unwrap();
        assert!(semantic_walk(&store, "missing", 2, 0.7).unwrap().is_empty());
    }

    #[test]
    fn explicit_hop_is_scored_by_strength() {
        let store = Store::open(None, Config::with_dimensions(8)).unwrap();
        let a = Entity::new("A", "Person");
        let b = Entity::new("B", "Person");
        store.insert_entity(&a).unwrap();
        store.insert_entity(&b).unwrap();
        store
            .insert_relationship(&Relationship::new(&a.id, &b.id, "knows").with_strength(0.5))
            .unwrap();

        let hits = semantic_walk(&store, &a.id, 1, 0.7).unwrap();
        let hit = hits.iter().find(|h| h.entity_id == b.id).unwrap();
        assert!((hit.path_score - 0.5).abs() < 1e-5);
        assert_eq!(hit.path_type, PathType::Explicit);
    }

    #[test]
    fn start_entity_never_appears_in_results() {
        let store = Store::open(None, Config::with_dimensions(8)).unwrap();
        let a = Entity::new("A", "Person");
        store.insert_entity(&a).unwrap();
        let hits = semantic_walk(&store, &a.id, 2, 0.7).unwrap();
        assert!(!hits.iter().any(|h| h.entity_id == a.id));
    }
}
