//! InferenceEngine
//!
//! Five strategies produce candidate relationships for a given entity:
//! co-occurrence (substring match over observation text), vector proximity
//! (ANN over content embeddings), transitive closure over two live hops,
//! typed transitive expertise (`Person -works_on-> Project -uses_tech->
//! Tech`), and user-defined rules bound through the Store's `$id` parameter.
//! None of this unwinds on a single strategy's failure — a broken rule is
//! skipped and logged, matching the retriever's per-source failure
//! tolerance.

pub mod clusters;
pub mod walk;

use std::collections::HashMap;
use std::sync::Arc;

use crate::embeddings::Embedder;
use crate::error::Result;
use crate::model::Entity;
use crate::storage::Store;

pub use clusters::EntityCluster;
pub use walk::{PathType, WalkHit};

/// One inferred relationship candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredRelation {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    pub confidence: f64,
    pub reason: String,
}

const VECTOR_PROXIMITY_K: usize = 5;
const VECTOR_PROXIMITY_MAX_DISTANCE: f32 = 0.2;

/// Computes inference candidates and exposes the cluster/walk analyses that
/// share its Store and Embedder handles.
pub struct InferenceEngine {
    store: Arc<Store>,
    embedder: Arc<Embedder>,
}

impl InferenceEngine {
    pub fn new(store: Arc<Store>, embedder: Arc<Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Run every strategy for `entity_id` and concatenate their candidates.
    /// A strategy that errors contributes nothing rather than aborting the
    /// others.
    pub async fn infer(&self, entity_id: &str) -> Result<Vec<InferredRelation>> {
        let Some(entity) = self.store.get_entity(entity_id, None)? else {
            return Ok(vec![]);
        };

        let mut out = Vec::new();
        out.extend(self.co_occurrence(&entity).unwrap_or_default());
        out.extend(self.vector_proximity(&entity).await.unwrap_or_default());
        out.extend(self.transitive(&entity).unwrap_or_default());
        out.extend(self.typed_transitive_expertise(&entity).unwrap_or_default());
        out.extend(self.custom_rules(&entity));
        Ok(out)
    }

    /// Other entities whose name appears as a substring (case-insensitive)
    /// of one of `entity`'s observation texts.
    fn co_occurrence(&self, entity: &Entity) -> Result<Vec<InferredRelation>> {
        let observations = self.store.list_observations_for_entity(&entity.id, None)?;
        let candidates = self.store.list_entities(None, None)?;
        let mut out = Vec::new();
        for obs in &observations {
            let text_lower = obs.text.to_lowercase();
            for candidate in &candidates {
                if candidate.id == entity.id {
                    continue;
                }
                if text_lower.contains(&candidate.name.to_lowercase()) {
                    out.push(InferredRelation {
                        from_id: entity.id.clone(),
                        to_id: candidate.id.clone(),
                        relation_type: "related_to".to_string(),
                        confidence: 0.7,
                        reason: format!("'{}' mentioned in observation", candidate.name),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Top-5 nearest by content embedding, cosine distance `< 0.2`. An
    /// entity that hasn't been assigned a content embedding yet (no
    /// observations indexed) is embedded from its name on the fly so this
    /// strategy still has a vector to search with.
    async fn vector_proximity(&self, entity: &Entity) -> Result<Vec<InferredRelation>> {
        let owned;
        let vector = match &entity.content_embedding {
            Some(vector) => vector,
            None => {
                owned = self.embedder.embed(&entity.name).await;
                &owned
            }
        };
        let hits = self.store.ann_search(
            crate::storage::ENTITY_CONTENT,
            vector,
            VECTOR_PROXIMITY_K + 1,
        )?;
        let mut out = Vec::new();
        for (id, similarity) in hits {
            if id == entity.id {
                continue;
            }
            let distance = 1.0 - similarity;
            if distance >= VECTOR_PROXIMITY_MAX_DISTANCE {
                continue;
            }
            out.push(InferredRelation {
                from_id: entity.id.clone(),
                to_id: id,
                relation_type: "similar_to".to_string(),
                confidence: (1.0 - distance as f64) * 0.9,
                reason: format!("cosine distance {distance:.4}"),
            });
            if out.len() >= VECTOR_PROXIMITY_K {
                break;
            }
        }
        Ok(out)
    }

    /// Two-hop paths `entity -r1-> mid -r2-> target` over live relationships.
    fn transitive(&self, entity: &Entity) -> Result<Vec<InferredRelation>> {
        let first_hop = self.store.relationships_for_entity(&entity.id, None)?;
        let mut out = Vec::new();
        for r1 in &first_hop {
            let mid_id = if r1.from_id == entity.id { &r1.to_id } else { &r1.from_id };
            if mid_id == &entity.id {
                continue;
            }
            let second_hop = self.store.relationships_for_entity(mid_id, None)?;
            for r2 in &second_hop {
                let target_id = if r2.from_id == *mid_id { &r2.to_id } else { &r2.from_id };
                if target_id == &entity.id || target_id == mid_id {
                    continue;
                }
                out.push(InferredRelation {
                    from_id: entity.id.clone(),
                    to_id: target_id.clone(),
                    relation_type: "potentially_related".to_string(),
                    confidence: 0.5,
                    reason: format!("via {},{}", r1.relation_type, r2.relation_type),
                });
            }
        }
        Ok(out)
    }

    /// `Person -works_on-> Project -uses_tech-> Tech` ⇒ `expert_in`,
    /// deduplicated by target keeping the max confidence.
    fn typed_transitive_expertise(&self, entity: &Entity) -> Result<Vec<InferredRelation>> {
        if entity.entity_type != "Person" {
            return Ok(vec![]);
        }
        let outgoing = self.store.relationships_for_entity(&entity.id, None)?;
        let mut best: HashMap<String, f64> = HashMap::new();
        for works_on in outgoing.iter().filter(|r| r.from_id == entity.id && r.relation_type == "works_on") {
            let project_rels = self.store.relationships_for_entity(&works_on.to_id, None)?;
            for uses_tech in project_rels
                .iter()
                .filter(|r| r.from_id == works_on.to_id && r.relation_type == "uses_tech")
            {
                best.entry(uses_tech.to_id.clone())
                    .and_modify(|c| *c = c.max(0.7))
                    .or_insert(0.7);
            }
        }
        Ok(best
            .into_iter()
            .map(|(tech_id, confidence)| InferredRelation {
                from_id: entity.id.clone(),
                to_id: tech_id,
                relation_type: "expert_in".to_string(),
                confidence,
                reason: "works_on project that uses_tech".to_string(),
            })
            .collect())
    }

    /// Run every registered [`crate::model::InferenceRule`] bound to `$id`;
    /// a rule whose SQL errors at runtime is skipped and logged, not
    /// propagated.
    fn custom_rules(&self, entity: &Entity) -> Vec<InferredRelation> {
        let rules = match self.store.list_inference_rules() {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list inference rules");
                return vec![];
            }
        };
        let mut out = Vec::new();
        for rule in rules {
            match self.store.run_inference_rule(&rule, &entity.id) {
                Ok(rows) => {
                    for (from_id, to_id, relation_type, confidence, reason) in rows {
                        if from_id == to_id {
                            continue;
                        }
                        out.push(InferredRelation { from_id, to_id, relation_type, confidence, reason });
                    }
                }
                Err(e) => {
                    tracing::warn!(rule = %rule.name, error = %e, "inference rule failed, skipping");
                }
            }
        }
        out
    }

    /// HNSW-topology cluster analysis; see [`clusters::analyze_clusters`].
    pub fn clusters(&self) -> Result<Vec<EntityCluster>> {
        clusters::analyze_clusters(&self.store)
    }

    /// Semantic graph walk from `start_id`; see [`walk::semantic_walk`].
    pub fn walk(&self, start_id: &str, max_depth: usize, min_similarity: f32) -> Result<Vec<WalkHit>> {
        walk::semantic_walk(&self.store, start_id, max_depth, min_similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embeddings::NullEmbeddingProvider;
    use crate::error::CoreError;
    use crate::model::{InferenceRule, Relationship};

    fn engine() -> InferenceEngine {
        let config = Config::with_dimensions(8);
        let store = Arc::new(Store::open(None, config.clone()).unwrap());
        let embedder = Arc::new(Embedder::new(Box::new(NullEmbeddingProvider::new(8)), config.embedder.clone()));
        InferenceEngine::new(store, embedder)
    }

    #[test]
    fn co_occurrence_finds_mentioned_entity_name() {
        let e = engine();
        let alice = Entity::new("Alice", "Person");
        let project = Entity::new("Project Atlas", "Project");
        e.store.insert_entity(&alice).unwrap();
        e.store.insert_entity(&project).unwrap();
        e.store
            .insert_observation(&crate::model::Observation::new(&alice.id, "Alice is leading Project Atlas this quarter"))
            .unwrap();

        let results = e.co_occurrence(&alice).unwrap();
        assert!(results.iter().any(|r| r.to_id == project.id && r.relation_type == "related_to"));
    }

    #[test]
    fn transitive_finds_two_hop_path() {
        let e = engine();
        let a = Entity::new("A", "Person");
        let b = Entity::new("B", "Person");
        let c = Entity::new("C", "Person");
        e.store.insert_entity(&a).unwrap();
        e.store.insert_entity(&b).unwrap();
        e.store.insert_entity(&c).unwrap();
        e.store.insert_relationship(&Relationship::new(&a.id, &b.id, "knows")).unwrap();
        e.store.insert_relationship(&Relationship::new(&b.id, &c.id, "knows")).unwrap();

        let results = e.transitive(&a).unwrap();
        assert!(results.iter().any(|r| r.to_id == c.id && r.relation_type == "potentially_related"));
    }

    #[test]
    fn typed_transitive_expertise_requires_person_type() {
        let e = engine();
        let org = Entity::new("Acme", "Organization");
        e.store.insert_entity(&org).unwrap();
        assert!(e.typed_transitive_expertise(&org).unwrap().is_empty());
    }

    #[tokio::test]
    async fn vector_proximity_embeds_entity_name_when_no_content_embedding() {
        let e = engine();
        let alice = Entity::new("Alice Anderson", "Person");
        let mut twin = Entity::new("Alice Anderson", "Person");
        twin.content_embedding = Some(e.embedder.embed(&twin.name).await);
        e.store.insert_entity(&alice).unwrap();
        e.store.insert_entity(&twin).unwrap();

        assert!(alice.content_embedding.is_none());
        let results = e.vector_proximity(&alice).await.unwrap();
        assert!(results.iter().any(|r| r.to_id == twin.id));
    }

    #[test]
    fn custom_rule_with_wrong_column_shape_is_rejected_on_insertion() {
        let e = engine();
        let rule = InferenceRule::new(
            "bad-shape",
            "SELECT id FROM entities WHERE id = $id",
        );
        let err = e.store.insert_inference_rule(&rule).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn custom_rule_with_correct_shape_produces_a_relation() {
        let e = engine();
        let alice = Entity::new("Alice", "Person");
        let bob = Entity::new("Bob", "Person");
        e.store.insert_entity(&alice).unwrap();
        e.store.insert_entity(&bob).unwrap();
        let rule = InferenceRule::new(
            "same-type",
            format!(
                "SELECT $id, id, 'peer_of', 0.6, 'same type' FROM entities WHERE type = 'Person' AND id != $id AND id = '{}'",
                bob.id
            ),
        );
        e.store.insert_inference_rule(&rule).unwrap();
        let results = e.custom_rules(&alice);
        assert!(results.iter().any(|r| r.to_id == bob.id && r.relation_type == "peer_of"));
    }
}
