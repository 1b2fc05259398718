//! The retrieval pipeline: `search`, `advanced_search`, `graph_rag`, `graph_walking`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::{check_cancelled, CoreError, Result};
use crate::model::{Entity, Metadata};
use crate::retriever::cache;
use crate::retriever::rrf::{reciprocal_rank_fusion, RankedSource};
use crate::storage::Store;

/// The entity id the retriever's user-profile boost applies to.
pub const GLOBAL_USER_PROFILE_ID: &str = "global_user_profile";

/// How a candidate reached the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Vector,
    Keyword,
    Graph,
    Inference,
    Mixed,
}

/// One assembled result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultRow {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub text: Option<String>,
    pub score: f32,
    pub source: Source,
    pub entity_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub explanation: String,
}

/// Options shared by `search` and as the base of `advanced_search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub include_entities: bool,
    pub include_observations: bool,
    pub entity_types: Option<Vec<String>>,
    pub time_range_hours: Option<i64>,
}

/// Exact-match metadata filter plus graph-reachability constraints, the
/// `advanced_search`-only additions over [`SearchOptions`].
#[derive(Debug, Clone, Default)]
pub struct GraphConstraints {
    pub required_relations: Vec<String>,
    pub target_entity_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdvancedSearchOptions {
    pub base: SearchOptions,
    pub metadata_filter: Option<Metadata>,
    pub graph_constraints: GraphConstraints,
    pub ef_search: Option<usize>,
}

/// Multi-source hybrid retriever: dense (content & name), FTS, graph
/// expansion, and PageRank priors fused by RRF, sitting behind a two-tier
/// result cache.
pub struct Retriever {
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    config: Config,
}

/// Which scoring function produces the `"graph"` candidate source inside
/// `run()`. `search`/`advanced_search` always expand one hop by inverse
/// depth; `graph_rag`/`graph_walking` swap in their own algorithm instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphMode {
    Default,
    Rag,
    Walk,
}

impl Retriever {
    pub fn new(store: Arc<Store>, embedder: Arc<Embedder>, config: Config) -> Self {
        Self { store, embedder, config }
    }

    /// `search(query, limit, include_entities, include_observations,
    /// entity_types?, time_range_hours?)`.
    pub async fn search(
        &self,
        query: &str,
        opts: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        self.run(query, &AdvancedSearchOptions { base: opts, ..Default::default() }, 1, None, GraphMode::Default, cancel)
            .await
    }

    /// `advanced_search`: adds exact metadata match and graph-reachability
    /// post-filters over `search`.
    pub async fn advanced_search(
        &self,
        query: &str,
        opts: AdvancedSearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        self.run(query, &opts, 1, None, GraphMode::Default, cancel).await
    }

    /// Seed via vectors, expand via relationships up to `max_depth` with no
    /// gate, then re-score every reached entity by cosine similarity
    /// between the query embedding and its content embedding — expansion
    /// widens recall, the re-score narrows it back to what's relevant.
    pub async fn graph_rag(
        &self,
        query: &str,
        limit: usize,
        max_depth: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        let opts = AdvancedSearchOptions {
            base: SearchOptions { limit, include_entities: true, include_observations: true, ..Default::default() },
            ..Default::default()
        };
        self.run(query, &opts, max_depth, None, GraphMode::Rag, cancel).await
    }

    /// Same seeding as `graph_rag`, but expansion tracks a running path
    /// score rather than re-scoring after the fact: each step from the
    /// current node to the next is gated by `cos(query, next) > 0.5`, and a
    /// step that passes decays the path score by `sim * (1 - 0.1 * depth)`.
    /// A node reached by more than one path keeps the best of its scores.
    pub async fn graph_walking(
        &self,
        query: &str,
        start_entity_id: Option<&str>,
        max_depth: i64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        let opts = AdvancedSearchOptions {
            base: SearchOptions { limit, include_entities: true, include_observations: false, ..Default::default() },
            ..Default::default()
        };
        self.run(query, &opts, max_depth, start_entity_id, GraphMode::Walk, cancel).await
    }

    async fn run(
        &self,
        query: &str,
        opts: &AdvancedSearchOptions,
        max_depth: i64,
        graph_walk_seed: Option<&str>,
        mode: GraphMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        if query.trim().is_empty() {
            return Err(CoreError::InvalidInput("query must not be empty".into()));
        }
        check_cancelled(cancel, "search")?;
        let limit = if opts.base.limit == 0 { 10 } else { opts.base.limit };

        let options_json = options_to_json(opts);
        let q_emb = self.embedder.embed(query).await;
        check_cancelled(cancel, "search")?;

        if let Some(cached) = cache::probe(&self.store, query, &options_json, &q_emb, &self.config.retriever).await? {
            if let Ok(rows) = serde_json::from_value::<Vec<SearchResultRow>>(cached) {
                return Ok(rows);
            }
        }
        check_cancelled(cancel, "search")?;

        let weights = self.config.retriever.weights;
        let k = self.config.retriever.rrf_k;
        let source_limit = limit.max(20);

        let mut failures = 0usize;
        let mut attempted = 0usize;

        macro_rules! try_source {
            ($call:expr) => {{
                attempted += 1;
                match $call {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "candidate source failed, continuing");
                        failures += 1;
                        vec![]
                    }
                }
            }};
        }

        let dense_content = if graph_walk_seed.is_none() {
            try_source!(self.store.ann_search(crate::storage::ENTITY_CONTENT, &q_emb, source_limit))
        } else {
            vec![]
        };
        check_cancelled(cancel, "search")?;
        let dense_name = try_source!(self.store.ann_search(crate::storage::ENTITY_NAME, &q_emb, source_limit));
        let dense_observation_raw: Vec<(String, f32)> =
            try_source!(self.store.ann_search(crate::storage::OBSERVATION_CONTENT, &q_emb, source_limit));
        let dense_observation = map_observations_to_entities(&self.store, &dense_observation_raw);
        check_cancelled(cancel, "search")?;
        let fts_entity = try_source!(self.store.fts_search_entities(query, source_limit));
        let fts_observation = try_source!(self.store.fts_search_observations(query, source_limit));
        check_cancelled(cancel, "search")?;

        let seeds: Vec<String> = if let Some(id) = graph_walk_seed {
            vec![id.to_string()]
        } else {
            dense_content.iter().map(|(id, _)| id.clone()).collect()
        };
        let graph_depth = if graph_walk_seed.is_some() { max_depth } else { max_depth.max(1) };
        let graph_seed_scores = match mode {
            GraphMode::Default => try_source!(self.graph_expand(&seeds, graph_depth)),
            GraphMode::Rag => try_source!(self.graph_rag_expand(&seeds, graph_depth, &q_emb)),
            GraphMode::Walk => try_source!(self.graph_walk_expand(&seeds, graph_depth, &q_emb)),
        };

        if attempted > 0 && failures == attempted {
            return Err(CoreError::store("retriever candidate generation", "every candidate source failed"));
        }
        check_cancelled(cancel, "search")?;

        let sources = vec![
            RankedSource { name: "dense_content", weight: weights.dense_content, results: &dense_content },
            RankedSource { name: "dense_name", weight: weights.dense_name, results: &dense_name },
            RankedSource { name: "fts_entity", weight: weights.fts_entity, results: &fts_entity },
            RankedSource { name: "fts_observation", weight: weights.fts_observation, results: &fts_observation },
            RankedSource { name: "dense_observation", weight: weights.dense_observation, results: &dense_observation },
            RankedSource { name: "graph", weight: weights.graph, results: &graph_seed_scores },
        ];
        let fused = reciprocal_rank_fusion(&sources, k);

        let mut rows = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some(entity) = self.store.get_entity(&candidate.id, None)? else { continue };
            if !passes_type_filter(&entity, &opts.base.entity_types) {
                continue;
            }
            if !passes_metadata_filter(&entity, opts.metadata_filter.as_ref()) {
                continue;
            }
            if !self.passes_graph_constraints(&entity.id, &opts.graph_constraints)? {
                continue;
            }
            if !passes_time_filter(&entity, opts.base.time_range_hours) {
                continue;
            }

            let prior = self.store.get_entity_rank(&entity.id)?.unwrap_or(0.0);
            let mut score = candidate.score * (1.0 + prior as f32);
            if entity.id == GLOBAL_USER_PROFILE_ID {
                score *= 1.5;
            }

            let source = classify_source(&candidate.sources);
            rows.push(SearchResultRow {
                id: entity.id.clone(),
                name: Some(entity.name.clone()),
                entity_type: Some(entity.entity_type.clone()),
                text: None,
                score,
                source,
                entity_id: entity.id.clone(),
                created_at: entity.created_at,
                updated_at: entity.updated_at,
                metadata: entity.metadata.clone(),
                explanation: format!("matched via {}", candidate.sources.join(", ")),
            });
        }

        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        rows.truncate(limit);

        check_cancelled(cancel, "search")?;
        let serialized = serde_json::to_value(&rows).unwrap_or(serde_json::Value::Null);
        cache::store_results(&self.store, query, &options_json, q_emb, serialized).await;

        Ok(rows)
    }

    /// Neighbors of the seed entities up to `max_depth` hops, scored by
    /// inverse depth. Used by `search`/`advanced_search`, which only ever
    /// expand one hop; `graph_rag`/`graph_walking` use their own scoring
    /// below instead of this.
    fn graph_expand(&self, seeds: &[String], max_depth: i64) -> Result<Vec<(String, f32)>> {
        let mut best: HashMap<String, i64> = HashMap::new();
        for seed in seeds {
            for (id, depth) in self.store.neighbors(seed, max_depth.max(1), None)? {
                best.entry(id)
                    .and_modify(|d| *d = (*d).min(depth))
                    .or_insert(depth);
            }
        }
        let mut ranked: Vec<(String, f32)> = best
            .into_iter()
            .map(|(id, depth)| (id, 1.0 / (1.0 + depth as f32)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }

    /// Neighbors of the seed entities up to `max_depth` hops, ungated,
    /// scored by cosine similarity between `q_emb` and each reached
    /// entity's content embedding rather than by hop distance. An entity
    /// with no content embedding yet scores `0.0` rather than being
    /// dropped, so it can still surface through the other candidate
    /// sources' RRF contribution.
    fn graph_rag_expand(&self, seeds: &[String], max_depth: i64, q_emb: &[f32]) -> Result<Vec<(String, f32)>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut ranked: Vec<(String, f32)> = Vec::new();
        for seed in seeds {
            for (id, _depth) in self.store.neighbors(seed, max_depth.max(1), None)? {
                if !seen.insert(id.clone()) {
                    continue;
                }
                let score = match self.store.get_entity(&id, None)? {
                    Some(entity) => match &entity.content_embedding {
                        Some(emb) => cosine_similarity(q_emb, emb),
                        None => 0.0,
                    },
                    None => continue,
                };
                ranked.push((id, score));
            }
        }
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }

    /// Path-scoring walk from the seed entities: a frontier of
    /// `(id, path_score)` starts at the seeds with score `1.0`, and at each
    /// depth every incident relationship (either direction) from a
    /// frontier node to a next node is followed only if
    /// `cos(q_emb, emb(next)) > 0.5`; a step that passes carries the path
    /// forward with `path_score * sim * (1 - 0.1 * depth)`. A node reached
    /// by more than one path keeps the best of its scores. A next node
    /// with no content embedding never passes the gate, so it's neither
    /// scored nor expanded further.
    fn graph_walk_expand(&self, seeds: &[String], max_depth: i64, q_emb: &[f32]) -> Result<Vec<(String, f32)>> {
        let seed_set: HashSet<&str> = seeds.iter().map(String::as_str).collect();
        let mut best: HashMap<String, f32> = HashMap::new();
        let mut frontier: Vec<(String, f32)> = seeds.iter().map(|id| (id.clone(), 1.0)).collect();

        for depth in 1..=max_depth.max(1) {
            let mut next_frontier: Vec<(String, f32)> = Vec::new();
            for (current_id, path_score) in &frontier {
                for rel in self.store.relationships_for_entity(current_id, None)? {
                    let next_id = if rel.from_id == *current_id { rel.to_id } else { rel.from_id };
                    if next_id == *current_id {
                        continue;
                    }
                    let Some(next_entity) = self.store.get_entity(&next_id, None)? else { continue };
                    let Some(next_emb) = &next_entity.content_embedding else { continue };
                    let sim = cosine_similarity(q_emb, next_emb);
                    if sim <= 0.5 {
                        continue;
                    }
                    let decayed = path_score * sim * (1.0 - 0.1 * depth as f32).max(0.0);
                    best.entry(next_id.clone())
                        .and_modify(|s| *s = s.max(decayed))
                        .or_insert(decayed);
                    next_frontier.push((next_id, decayed));
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        let mut ranked: Vec<(String, f32)> =
            best.into_iter().filter(|(id, _)| !seed_set.contains(id.as_str())).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }

    fn passes_graph_constraints(&self, entity_id: &str, constraints: &GraphConstraints) -> Result<bool> {
        if constraints.target_entity_ids.is_empty() {
            return Ok(true);
        }
        let relationships = self.store.relationships_for_entity(entity_id, None)?;
        let targets: HashSet<&str> = constraints.target_entity_ids.iter().map(String::as_str).collect();
        Ok(relationships.iter().any(|r| {
            let other = if r.from_id == entity_id { &r.to_id } else { &r.from_id };
            targets.contains(other.as_str())
                && (constraints.required_relations.is_empty()
                    || constraints.required_relations.contains(&r.relation_type))
        }))
    }
}

fn map_observations_to_entities(store: &Store, hits: &[(String, f32)]) -> Vec<(String, f32)> {
    hits.iter()
        .filter_map(|(obs_id, score)| {
            store
                .get_observation(obs_id, None)
                .ok()
                .flatten()
                .map(|obs| (obs.entity_id, *score))
        })
        .collect()
}

fn passes_type_filter(entity: &Entity, entity_types: &Option<Vec<String>>) -> bool {
    match entity_types {
        Some(types) if !types.is_empty() => types.contains(&entity.entity_type),
        _ => true,
    }
}

fn passes_metadata_filter(entity: &Entity, filter: Option<&Metadata>) -> bool {
    match filter {
        Some(f) => entity.metadata.matches_all(f),
        None => true,
    }
}

fn passes_time_filter(entity: &Entity, time_range_hours: Option<i64>) -> bool {
    match time_range_hours {
        Some(hours) => Utc::now() - entity.created_at <= chrono::Duration::hours(hours),
        None => true,
    }
}

fn classify_source(sources: &[String]) -> Source {
    let is_graph = sources.iter().any(|s| s == "graph");
    let is_keyword = sources.iter().any(|s| s.starts_with("fts"));
    let is_vector = sources.iter().any(|s| s.starts_with("dense"));
    match (is_vector, is_keyword, is_graph) {
        (true, false, false) => Source::Vector,
        (false, true, false) => Source::Keyword,
        (false, false, true) => Source::Graph,
        _ => Source::Mixed,
    }
}

fn options_to_json(opts: &AdvancedSearchOptions) -> serde_json::Value {
    serde_json::json!({
        "limit": opts.base.limit,
        "includeEntities": opts.base.include_entities,
        "includeObservations": opts.base.include_observations,
        "entityTypes": opts.base.entity_types,
        "timeRangeHours": opts.base.time_range_hours,
        "requiredRelations": opts.graph_constraints.required_relations,
        "targetEntityIds": opts.graph_constraints.target_entity_ids,
        "efSearch": opts.ef_search,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::NullEmbeddingProvider;
    use crate::model::Relationship;

    fn retriever() -> Retriever {
        let config = Config::with_dimensions(16);
        let store = Arc::new(Store::open(None, config.clone()).unwrap());
        let embedder = Arc::new(Embedder::new(
            Box::new(NullEmbeddingProvider::new(16)),
            config.embedder.clone(),
        ));
        Retriever::new(store, embedder, config)
    }

    #[tokio::test]
    async fn empty_query_is_invalid_input() {
        let r = retriever();
        let err = r
            .search("", SearchOptions { limit: 10, ..Default::default() }, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn search_finds_entity_by_name_via_fts() {
        let r = retriever();
        let entity = Entity::new("Distributed Consensus Project", "Project");
        r.store.insert_entity(&entity).unwrap();

        let rows = r
            .search("consensus", SearchOptions { limit: 10, ..Default::default() }, &CancellationToken::new())
            .await
            .unwrap();
        assert!(rows.iter().any(|row| row.id == entity.id));
    }

    #[tokio::test]
    async fn search_is_cancelled_before_running() {
        let r = retriever();
        let token = CancellationToken::new();
        token.cancel();
        let err = r
            .search("consensus", SearchOptions { limit: 10, ..Default::default() }, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled(_)));
    }

    #[tokio::test]
    async fn entity_type_filter_excludes_non_matching_types() {
        let r = retriever();
        let person = Entity::new("Alice Consensus", "Person");
        r.store.insert_entity(&person).unwrap();

        let rows = r
            .search(
                "consensus",
                SearchOptions {
                    limit: 10,
                    entity_types: Some(vec!["Project".to_string()]),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!rows.iter().any(|row| row.id == person.id));
    }

    #[tokio::test]
    async fn graph_constraint_requires_reachability_to_target() {
        let r = retriever();
        let a = Entity::new("Hub Consensus Node", "Project");
        let b = Entity::new("Leaf Node", "Project");
        r.store.insert_entity(&a).unwrap();
        r.store.insert_entity(&b).unwrap();
        r.store.insert_relationship(&Relationship::new(&a.id, &b.id, "depends_on")).unwrap();

        let rows = r
            .advanced_search(
                "consensus",
                AdvancedSearchOptions {
                    base: SearchOptions { limit: 10, ..Default::default() },
                    graph_constraints: GraphConstraints {
                        required_relations: vec!["depends_on".to_string()],
                        target_entity_ids: vec![b.id.clone()],
                    },
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(rows.iter().any(|row| row.id == a.id));
    }

    #[tokio::test]
    async fn graph_rag_expand_scores_by_similarity_not_hop_distance() {
        let r = retriever();
        let near = Entity::new("Near Hop", "Project");
        let mut far = Entity::new("Far Hop", "Project");
        let seed = Entity::new("Seed", "Project");
        r.store.insert_entity(&seed).unwrap();
        r.store.insert_entity(&near).unwrap();
        let query_emb = r.embedder.embed("exact target phrase").await;
        far.content_embedding = Some(query_emb.clone());
        r.store.insert_entity(&far).unwrap();
        r.store.insert_relationship(&Relationship::new(&seed.id, &near.id, "relates_to")).unwrap();
        r.store.insert_relationship(&Relationship::new(&near.id, &far.id, "relates_to")).unwrap();

        let ranked = r.graph_rag_expand(&[seed.id.clone()], 2, &query_emb).unwrap();
        let far_score = ranked.iter().find(|(id, _)| *id == far.id).unwrap().1;
        let near_score = ranked.iter().find(|(id, _)| *id == near.id).unwrap().1;
        assert!(far_score > near_score, "two-hop exact match should outscore an unembedded one-hop neighbor");
    }

    #[tokio::test]
    async fn graph_walk_expand_stops_below_similarity_gate() {
        let r = retriever();
        let start = Entity::new("Start", "Project");
        let mut unrelated = Entity::new("Unrelated", "Project");
        unrelated.content_embedding = Some(r.embedder.embed("Unrelated").await);
        r.store.insert_entity(&start).unwrap();
        r.store.insert_entity(&unrelated).unwrap();
        r.store.insert_relationship(&Relationship::new(&start.id, &unrelated.id, "relates_to")).unwrap();

        let query_emb = r.embedder.embed("a completely different query").await;
        let ranked = r.graph_walk_expand(&[start.id.clone()], 2, &query_emb).unwrap();
        assert!(!ranked.iter().any(|(id, _)| id == &unrelated.id));
    }

    #[tokio::test]
    async fn graph_walk_expand_decays_score_with_depth() {
        let r = retriever();
        let start = Entity::new("Start", "Project");
        let mut mid = Entity::new("Mid", "Project");
        let mut end = Entity::new("End", "Project");
        let query_emb = r.embedder.embed("shared target phrase").await;
        mid.content_embedding = Some(query_emb.clone());
        end.content_embedding = Some(query_emb.clone());
        r.store.insert_entity(&start).unwrap();
        r.store.insert_entity(&mid).unwrap();
        r.store.insert_entity(&end).unwrap();
        r.store.insert_relationship(&Relationship::new(&start.id, &mid.id, "relates_to")).unwrap();
        r.store.insert_relationship(&Relationship::new(&mid.id, &end.id, "relates_to")).unwrap();

        let ranked = r.graph_walk_expand(&[start.id.clone()], 2, &query_emb).unwrap();
        let mid_score = ranked.iter().find(|(id, _)| *id == mid.id).unwrap().1;
        let end_score = ranked.iter().find(|(id, _)| *id == end.id).unwrap().1;
        assert!(end_score < mid_score, "a deeper hop should decay below a shallower one to the same embedding");
    }

    #[tokio::test]
    async fn graph_walking_never_returns_the_seed_entity() {
        let r = retriever();
        let start = Entity::new("Consensus Start", "Project");
        r.store.insert_entity(&start).unwrap();

        let rows = r
            .graph_walking("consensus", Some(&start.id), 2, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!rows.iter().any(|row| row.id == start.id));
    }
}
