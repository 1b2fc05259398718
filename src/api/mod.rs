//! Memory façade
//!
//! Composes the Store with its collaborators — Embedder, Retriever,
//! InferenceEngine, GraphAnalytics, Janitor — into four action groups:
//! `mutate_memory`, `query_memory`, `analyze_graph`, `manage_system`. Each
//! group exposes typed inherent methods plus a single
//! `{group}(args: Value) -> Result<Value>` dispatcher that matches on an
//! `action` field — a single unified tool surface per group rather than
//! one tool per operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

use crate::analytics::GraphAnalytics;
use crate::config::Config;
use crate::conflict::{self, EvolutionEvent, EvolutionSummary, StatusConflict};
use crate::embeddings::Embedder;
use crate::error::{CoreError, Result};
use crate::inference::{EntityCluster, InferenceEngine, InferredRelation, PathType, WalkHit};
use crate::janitor::{Janitor, JanitorReport, JanitorRequest, SummarizationProvider};
use crate::model::community::{EntityCommunity, EntityRank};
use crate::model::{Entity, Metadata, Observation, Relationship};
use crate::model::snapshot::{MemorySnapshot, SnapshotDiff};
use crate::retriever::{
    AdvancedSearchOptions, Retriever, SearchOptions, SearchResultRow,
};
use crate::storage::{Store, TransactionStep, TransactionStepOutcome};

const GLOBAL_USER_PROFILE_NAME: &str = "Global User Profile";
const RECENT_OBSERVATIONS_FOR_CONTENT: usize = 20;

/// The entity id `mutate_memory`/`query_memory` treat as the single global
/// user-profile anchor, mirrored from [`crate::retriever::pipeline`]'s
/// boost target.
pub use crate::retriever::pipeline::GLOBAL_USER_PROFILE_ID;

/// Composes every collaborator behind the four action groups.
pub struct Memory {
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    retriever: Retriever,
    inference: InferenceEngine,
    analytics: GraphAnalytics,
    janitor: Janitor,
}

impl Memory {
    /// Build the façade, ensuring the system-owned `global_user_profile`
    /// entity exists (idempotent — a fresh store gets it created once).
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<Embedder>,
        summarizer: Box<dyn SummarizationProvider>,
        config: Config,
    ) -> Result<Self> {
        let retriever = Retriever::new(Arc::clone(&store), Arc::clone(&embedder), config.clone());
        let inference = InferenceEngine::new(Arc::clone(&store), Arc::clone(&embedder));
        let analytics = GraphAnalytics::new(Arc::clone(&store), config.analytics.clone());
        let janitor = Janitor::new(Arc::clone(&store), summarizer, config.janitor.clone());

        let memory = Self { store, embedder, retriever, inference, analytics, janitor };
        memory.ensure_global_user_profile()?;
        Ok(memory)
    }

    fn ensure_global_user_profile(&self) -> Result<()> {
        if self.store.get_entity(GLOBAL_USER_PROFILE_ID, None)?.is_some() {
            return Ok(());
        }
        let mut profile = Entity::new(GLOBAL_USER_PROFILE_NAME, "Profile");
        profile.id = GLOBAL_USER_PROFILE_ID.to_string();
        profile.metadata.set("is_global_user", crate::model::metadata::Value::Bool(true));
        self.store.insert_entity(&profile)
    }

    // -----------------------------------------------------------------
    // mutate_memory
    // -----------------------------------------------------------------

    pub async fn create_entity(
        &self,
        name: &str,
        entity_type: &str,
        metadata: Option<Metadata>,
    ) -> Result<Entity> {
        let mut entity = Entity::new(name, entity_type);
        if let Some(metadata) = metadata {
            entity.metadata = metadata;
        }
        let name_embedding = self.embedder.embed(name).await;
        entity.name_embedding = Some(name_embedding.clone());
        entity.content_embedding = Some(name_embedding);
        self.store.insert_entity(&entity)?;
        Ok(entity)
    }

    /// Re-asserts `id` with any of `name`/`entity_type`/`metadata` replaced,
    /// as a fresh bitemporal row (the same pattern `Store::retract_entity`
    /// uses to append rather than overwrite).
    pub async fn update_entity(
        &self,
        id: &str,
        name: Option<&str>,
        entity_type: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<Entity> {
        let mut entity = self
            .store
            .get_entity(id, None)?
            .ok_or_else(|| CoreError::NotFound(format!("entity {id}")))?;

        if let Some(name) = name {
            entity.name = name.to_string();
            let name_embedding = self.embedder.embed(name).await;
            entity.name_embedding = Some(name_embedding);
        }
        if let Some(entity_type) = entity_type {
            entity.entity_type = entity_type.to_string();
        }
        if let Some(metadata) = metadata {
            entity.metadata = metadata;
        }
        entity.validity = crate::model::Validity::asserted_now();
        entity.updated_at = chrono::Utc::now();
        self.store.insert_entity(&entity)?;
        Ok(entity)
    }

    pub fn delete_entity(&self, id: &str) -> Result<()> {
        self.store.retract_entity(id)
    }

    /// `add_observation`, with the three-step dedup ladder: exact text
    /// match, then an LSH near-duplicate probe, then insert.
    pub async fn add_observation(
        &self,
        entity_id: &str,
        text: &str,
        metadata: Option<Metadata>,
        deduplicate: bool,
    ) -> Result<AddObservationOutcome> {
        if self.store.get_entity(entity_id, None)?.is_none() {
            return Err(CoreError::NotFound(format!("entity {entity_id}")));
        }

        if deduplicate {
            for existing in self.store.list_observations_for_entity(entity_id, None)? {
                if existing.text == text {
                    return Ok(AddObservationOutcome {
                        observation_id: None,
                        duplicate_detected: true,
                        similarity: 1.0,
                        suggested_relations: vec![],
                    });
                }
            }

            let hasher = crate::storage::lsh::MinHasher::new(&self.store.config().lsh);
            let signature = hasher.signature(text);
            let candidates = self.store.lsh_candidates(
                "observation:lsh",
                Some(entity_id),
                &signature,
                &self.store.config().lsh,
            )?;
            if let Some(top) = candidates.first() {
                return Ok(AddObservationOutcome {
                    observation_id: None,
                    duplicate_detected: true,
                    similarity: top.estimated_jaccard as f32,
                    suggested_relations: vec![],
                });
            }
        }

        let mut observation = Observation::new(entity_id, text);
        if let Some(metadata) = metadata {
            observation.metadata = metadata;
        }
        observation.embedding = Some(self.embedder.embed(text).await);
        self.store.insert_observation(&observation)?;

        let hasher = crate::storage::lsh::MinHasher::new(&self.store.config().lsh);
        self.store.upsert_minhash(
            "observation:lsh",
            &observation.id,
            Some(entity_id),
            &hasher.signature(text),
        )?;

        self.refresh_entity_content(entity_id).await?;

        let suggested_relations = self.inference.infer(entity_id).await.unwrap_or_default();

        Ok(AddObservationOutcome {
            observation_id: Some(observation.id),
            duplicate_detected: false,
            similarity: 0.0,
            suggested_relations,
        })
    }

    /// Recompute an entity's `content_embedding` from its most recent
    /// observations, keeping the retriever's dense-content index current.
    async fn refresh_entity_content(&self, entity_id: &str) -> Result<()> {
        let Some(mut entity) = self.store.get_entity(entity_id, None)? else { return Ok(()) };
        let mut observations = self.store.list_observations_for_entity(entity_id, None)?;
        observations.sort_by_key(|o| std::cmp::Reverse(o.created_at));
        observations.truncate(RECENT_OBSERVATIONS_FOR_CONTENT);
        let joined = observations
            .iter()
            .rev()
            .map(|o| o.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let content = if joined.trim().is_empty() { entity.name.clone() } else { joined };
        entity.content_embedding = Some(self.embedder.embed(&content).await);
        entity.validity = crate::model::Validity::asserted_now();
        entity.updated_at = chrono::Utc::now();
        self.store.insert_entity(&entity)
    }

    pub fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
        strength: Option<f32>,
        metadata: Option<Metadata>,
    ) -> Result<Relationship> {
        let mut relationship = Relationship::new(from_id, to_id, relation_type);
        if let Some(strength) = strength {
            relationship = relationship.with_strength(strength);
        }
        if let Some(metadata) = metadata {
            relationship.metadata = metadata;
        }
        self.store.insert_relationship(&relationship)?;
        Ok(relationship)
    }

    pub fn run_transaction(
        &self,
        steps: Vec<TransactionStep>,
    ) -> Result<Vec<TransactionStepOutcome>> {
        self.store.run_transaction(&steps)
    }

    pub fn add_inference_rule(&self, rule: crate::model::InferenceRule) -> Result<()> {
        self.store.insert_inference_rule(&rule)
    }

    /// Markdown (blank-line paragraph chunking) or JSON (array of strings or
    /// `{text, metadata}`) ingestion.
    pub async fn ingest_file(&self, entity_id: &str, content: IngestContent, deduplicate: bool) -> Result<IngestReport> {
        let chunks = match content {
            IngestContent::Markdown(text) => text
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| (p.to_string(), None))
                .collect::<Vec<_>>(),
            IngestContent::Json(value) => {
                let Json::Array(items) = value else {
                    return Err(CoreError::InvalidInput("json ingest content must be an array".into()));
                };
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Json::String(text) => Some((text, None)),
                        Json::Object(mut obj) => {
                            let text = obj.remove("text")?.as_str()?.to_string();
                            let metadata = obj.remove("metadata").map(Metadata::from);
                            Some((text, metadata))
                        }
                        _ => None,
                    })
                    .collect()
            }
        };

        let requested = chunks.len();
        let mut added = 0usize;
        let mut skipped = 0usize;
        for (text, metadata) in chunks {
            let outcome = self.add_observation(entity_id, &text, metadata, deduplicate).await?;
            if outcome.duplicate_detected {
                skipped += 1;
            } else {
                added += 1;
            }
        }
        Ok(IngestReport { requested, added, skipped })
    }

    // -----------------------------------------------------------------
    // query_memory
    // -----------------------------------------------------------------

    pub async fn search(
        &self,
        query: &str,
        opts: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        self.retriever.search(query, opts, cancel).await
    }

    pub async fn advanced_search(
        &self,
        query: &str,
        opts: AdvancedSearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        self.retriever.advanced_search(query, opts, cancel).await
    }

    /// An entity, its live observations, and its one-hop neighbors.
    pub fn context(&self, entity_id: &str, neighbor_depth: i64) -> Result<EntityContext> {
        let entity = self
            .store
            .get_entity(entity_id, None)?
            .ok_or_else(|| CoreError::NotFound(format!("entity {entity_id}")))?;
        let observations = self.store.list_observations_for_entity(entity_id, None)?;
        let neighbors = self.hydrate_neighbors(entity_id, neighbor_depth.max(1))?;
        Ok(EntityContext { entity, observations, neighbors })
    }

    pub fn entity_details(&self, entity_id: &str) -> Result<Entity> {
        self.store
            .get_entity(entity_id, None)?
            .ok_or_else(|| CoreError::NotFound(format!("entity {entity_id}")))
    }

    /// Entity details plus the evolution summary of its outgoing relations.
    pub fn history(&self, entity_id: &str, since: Option<i64>, until: Option<i64>) -> Result<EntityHistory> {
        let entity = self.entity_details(entity_id)?;
        let (events, summary) = conflict::relation_evolution(&self.store, entity_id, None, since, until)?;
        Ok(EntityHistory { entity, events, summary })
    }

    pub async fn graph_rag(
        &self,
        query: &str,
        limit: usize,
        max_depth: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        self.retriever.graph_rag(query, limit, max_depth, cancel).await
    }

    pub async fn graph_walking(
        &self,
        query: &str,
        start_entity_id: Option<&str>,
        max_depth: i64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultRow>> {
        self.retriever.graph_walking(query, start_entity_id, max_depth, limit, cancel).await
    }

    fn hydrate_neighbors(&self, entity_id: &str, max_depth: i64) -> Result<Vec<(Entity, i64)>> {
        let mut out = Vec::new();
        for (id, distance) in self.store.neighbors(entity_id, max_depth, None)? {
            if let Some(entity) = self.store.get_entity(&id, None)? {
                out.push((entity, distance));
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------
    // analyze_graph
    // -----------------------------------------------------------------

    pub fn explore(&self, start_id: &str, max_depth: i64) -> Result<Vec<(Entity, i64)>> {
        self.hydrate_neighbors(start_id, max_depth)
    }

    pub fn communities(&self, cancel: &CancellationToken) -> Result<Vec<EntityCommunity>> {
        self.analytics.communities(cancel)
    }

    pub fn pagerank(&self, cancel: &CancellationToken) -> Result<Vec<EntityRank>> {
        self.analytics.pagerank(cancel)
    }

    pub fn betweenness(&self, cancel: &CancellationToken) -> Result<Vec<(String, f64)>> {
        self.analytics.betweenness_centrality(cancel)
    }

    pub fn hits(&self, cancel: &CancellationToken) -> Result<Vec<(String, f64, f64)>> {
        self.analytics.hits(cancel)
    }

    pub fn connected_components(&self, cancel: &CancellationToken) -> Result<Vec<Vec<String>>> {
        self.analytics.connected_components(cancel)
    }

    pub fn shortest_path(
        &self,
        from_id: &str,
        to_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(f64, Vec<String>)>> {
        self.analytics.shortest_path(from_id, to_id, cancel)
    }

    pub fn bridge_discovery(&self, cancel: &CancellationToken) -> Result<Vec<(String, usize)>> {
        self.analytics.bridges(cancel)
    }

    pub async fn infer_relations(&self, entity_id: &str) -> Result<Vec<InferredRelation>> {
        self.inference.infer(entity_id).await
    }

    pub fn get_relation_evolution(
        &self,
        from_id: &str,
        to_id: Option<&str>,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<(Vec<EvolutionEvent>, EvolutionSummary)> {
        conflict::relation_evolution(&self.store, from_id, to_id, since, until)
    }

    pub fn semantic_walk(&self, start_id: &str, max_depth: usize, min_similarity: f32) -> Result<Vec<WalkHit>> {
        self.inference.walk(start_id, max_depth, min_similarity)
    }

    pub fn hnsw_clusters(&self) -> Result<Vec<EntityCluster>> {
        self.inference.clusters()
    }

    // -----------------------------------------------------------------
    // manage_system
    // -----------------------------------------------------------------

    pub fn health(&self) -> Result<HealthReport> {
        let (entity_count, observation_count, relationship_count) = self.store.counts()?;
        Ok(HealthReport { entity_count, observation_count, relationship_count })
    }

    pub fn snapshot_create(&self) -> Result<MemorySnapshot> {
        let (entity_count, observation_count, relationship_count) = self.store.counts()?;
        let snapshot = MemorySnapshot::new(entity_count, observation_count, relationship_count);
        self.store.insert_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    pub fn snapshot_list(&self) -> Result<Vec<MemorySnapshot>> {
        self.store.list_snapshots()
    }

    pub fn snapshot_diff(&self, earlier_id: &str, later_id: &str) -> Result<SnapshotDiff> {
        let earlier = self
            .store
            .get_snapshot(earlier_id)?
            .ok_or_else(|| CoreError::NotFound(format!("snapshot {earlier_id}")))?;
        let later = self
            .store
            .get_snapshot(later_id)?
            .ok_or_else(|| CoreError::NotFound(format!("snapshot {later_id}")))?;
        Ok(later.diff(&earlier))
    }

    /// `req.confirm` gates dry-run reporting vs. actual retraction — callers
    /// must pass `confirm: true` to perform the destructive sweep.
    pub async fn cleanup(&self, req: JanitorRequest, cancel: &CancellationToken) -> Result<JanitorReport> {
        self.janitor.run(req, cancel).await
    }

    /// A combined pagerank + communities + status-conflict sweep across
    /// every live entity.
    pub fn reflect(&self, cancel: &CancellationToken) -> Result<ReflectReport> {
        let ranks = self.analytics.pagerank(cancel)?;
        let communities = self.analytics.communities(cancel)?;
        let entity_ids: Vec<String> = self.store.list_entities(None, None)?.into_iter().map(|e| e.id).collect();
        let conflicts = conflict::detect_status_conflicts(&self.store, &entity_ids)?;
        Ok(ReflectReport { ranks, communities, conflicts })
    }

    pub fn clear_memory(&self, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(CoreError::InvalidInput("clear_memory requires confirm=true".into()));
        }
        self.store.clear_all()?;
        self.ensure_global_user_profile()
    }

    // -----------------------------------------------------------------
    // Action-group dispatch
    // -----------------------------------------------------------------

    pub async fn mutate_memory(&self, args: Json) -> Result<Json> {
        let args: MutateArgs = parse_args(args)?;
        match args.action.as_str() {
            "create_entity" => {
                let name = require_str(&args.name, "name")?;
                let entity_type = require_str(&args.entity_type, "entityType")?;
                let entity = self.create_entity(name, entity_type, args.metadata).await?;
                to_json(&entity)
            }
            "update_entity" => {
                let id = require_str(&args.id, "id")?;
                let entity = self
                    .update_entity(id, args.name.as_deref(), args.entity_type.as_deref(), args.metadata)
                    .await?;
                to_json(&entity)
            }
            "delete_entity" => {
                let id = require_str(&args.id, "id")?;
                self.delete_entity(id)?;
                Ok(Json::Null)
            }
            "add_observation" => {
                let entity_id = require_str(&args.entity_id, "entityId")?;
                let text = require_str(&args.text, "text")?;
                let outcome = self
                    .add_observation(entity_id, text, args.metadata, args.deduplicate.unwrap_or(true))
                    .await?;
                to_json(&outcome)
            }
            "create_relation" => {
                let from_id = require_str(&args.from_id, "fromId")?;
                let to_id = require_str(&args.to_id, "toId")?;
                let relation_type = require_str(&args.relation_type, "relationType")?;
                let relationship = self.create_relation(from_id, to_id, relation_type, args.strength, args.metadata)?;
                to_json(&relationship)
            }
            "add_inference_rule" => {
                let name = require_str(&args.name, "name")?;
                let datalog = require_str(&args.datalog, "datalog")?;
                let rule = crate::model::InferenceRule::new(name, datalog);
                self.add_inference_rule(rule.clone())?;
                to_json(&rule)
            }
            "ingest_file" => {
                let entity_id = require_str(&args.entity_id, "entityId")?;
                let content = match args.content {
                    Some(Json::String(text)) => IngestContent::Markdown(text),
                    Some(value @ Json::Array(_)) => IngestContent::Json(value),
                    _ => return Err(CoreError::InvalidInput("ingest_file requires string or array 'content'".into())),
                };
                let report = self.ingest_file(entity_id, content, args.deduplicate.unwrap_or(true)).await?;
                to_json(&report)
            }
            "run_transaction" => {
                let steps_json = args
                    .steps
                    .ok_or_else(|| CoreError::InvalidInput("run_transaction requires 'steps'".into()))?;
                let steps = parse_transaction_steps(steps_json)?;
                to_json(&self.run_transaction(steps)?.iter().map(describe_outcome).collect::<Vec<_>>())
            }
            other => Err(CoreError::InvalidInput(format!("unknown mutate_memory action '{other}'"))),
        }
    }

    pub async fn query_memory(&self, args: Json, cancel: &CancellationToken) -> Result<Json> {
        let args: QueryArgs = parse_args(args)?;
        match args.action.as_str() {
            "search" => {
                let query = require_str(&args.query, "query")?;
                to_json(&self.search(query, args.search_options(), cancel).await?)
            }
            "advanced_search" => {
                let query = require_str(&args.query, "query")?;
                to_json(&self.advanced_search(query, args.advanced_options(), cancel).await?)
            }
            "context" => {
                let entity_id = require_str(&args.entity_id, "entityId")?;
                to_json(&self.context(entity_id, args.max_depth.unwrap_or(1))?)
            }
            "entity_details" => {
                let entity_id = require_str(&args.entity_id, "entityId")?;
                to_json(&self.entity_details(entity_id)?)
            }
            "history" => {
                let entity_id = require_str(&args.entity_id, "entityId")?;
                to_json(&self.history(entity_id, args.since, args.until)?)
            }
            "graph_rag" => {
                let query = require_str(&args.query, "query")?;
                to_json(&self.graph_rag(query, args.limit.unwrap_or(10), args.max_depth.unwrap_or(2), cancel).await?)
            }
            "graph_walking" => {
                let query = require_str(&args.query, "query")?;
                to_json(
                    &self
                        .graph_walking(
                            query,
                            args.entity_id.as_deref(),
                            args.max_depth.unwrap_or(2),
                            args.limit.unwrap_or(10),
                            cancel,
                        )
                        .await?,
                )
            }
            other => Err(CoreError::InvalidInput(format!("unknown query_memory action '{other}'"))),
        }
    }

    pub async fn analyze_graph(&self, args: Json, cancel: &CancellationToken) -> Result<Json> {
        let args: AnalyzeArgs = parse_args(args)?;
        match args.action.as_str() {
            "explore" => {
                let start_id = require_str(&args.start_id, "startId")?;
                to_json(&self.explore(start_id, args.max_depth.unwrap_or(2))?)
            }
            "communities" => to_json(&self.communities(cancel)?),
            "pagerank" => to_json(&self.pagerank(cancel)?),
            "betweenness" => to_json(&self.betweenness(cancel)?),
            "hits" => to_json(&self.hits(cancel)?),
            "connected_components" => to_json(&self.connected_components(cancel)?),
            "shortest_path" => {
                let from_id = require_str(&args.from_id, "fromId")?;
                let to_id = require_str(&args.to_id, "toId")?;
                to_json(&self.shortest_path(from_id, to_id, cancel)?)
            }
            "bridge_discovery" => to_json(&self.bridge_discovery(cancel)?),
            "infer_relations" => {
                let entity_id = require_str(&args.entity_id, "entityId")?;
                to_json(&self.infer_relations(entity_id).await?)
            }
            "get_relation_evolution" => {
                let from_id = require_str(&args.from_id, "fromId")?;
                let (events, summary) =
                    self.get_relation_evolution(from_id, args.to_id.as_deref(), args.since, args.until)?;
                to_json(&(events.len(), summary))
            }
            "semantic_walk" => {
                let start_id = require_str(&args.start_id, "startId")?;
                to_json(&self.semantic_walk(
                    start_id,
                    args.max_depth.unwrap_or(2) as usize,
                    args.min_similarity.unwrap_or(0.5),
                )?)
            }
            "hnsw_clusters" => to_json(&self.hnsw_clusters()?),
            other => Err(CoreError::InvalidInput(format!("unknown analyze_graph action '{other}'"))),
        }
    }

    pub async fn manage_system(&self, args: Json, cancel: &CancellationToken) -> Result<Json> {
        let args: ManageArgs = parse_args(args)?;
        match args.action.as_str() {
            "health" => to_json(&self.health()?),
            "snapshot_create" => to_json(&self.snapshot_create()?),
            "snapshot_list" => to_json(&self.snapshot_list()?),
            "snapshot_diff" => {
                let earlier_id = require_str(&args.earlier_id, "earlierId")?;
                let later_id = require_str(&args.later_id, "laterId")?;
                to_json(&self.snapshot_diff(earlier_id, later_id)?)
            }
            "cleanup" => {
                if !args.confirm.unwrap_or(false) {
                    return Err(CoreError::InvalidInput("cleanup requires confirm=true".into()));
                }
                let req = JanitorRequest {
                    older_than_days: args.older_than_days.unwrap_or(90),
                    max_observations: args.max_observations.unwrap_or(100),
                    min_entity_degree: args.min_entity_degree.unwrap_or(2),
                    confirm: true,
                };
                to_json(&self.cleanup(req, cancel).await?)
            }
            "reflect" => to_json(&self.reflect(cancel)?),
            "clear_memory" => {
                self.clear_memory(args.confirm.unwrap_or(false))?;
                Ok(Json::Null)
            }
            other => Err(CoreError::InvalidInput(format!("unknown manage_system action '{other}'"))),
        }
    }
}

// -----------------------------------------------------------------
// Shared response/request shapes
// -----------------------------------------------------------------

/// Markdown or JSON payload for `ingest_file`.
#[derive(Debug, Clone)]
pub enum IngestContent {
    Markdown(String),
    Json(Json),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub requested: usize,
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddObservationOutcome {
    pub observation_id: Option<String>,
    pub duplicate_detected: bool,
    pub similarity: f32,
    pub suggested_relations: Vec<InferredRelation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContext {
    pub entity: Entity,
    pub observations: Vec<Observation>,
    pub neighbors: Vec<(Entity, i64)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHistory {
    pub entity: Entity,
    pub events: Vec<EvolutionEvent>,
    pub summary: EvolutionSummary,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub entity_count: i64,
    pub observation_count: i64,
    pub relationship_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectReport {
    pub ranks: Vec<EntityRank>,
    pub communities: Vec<EntityCommunity>,
    pub conflicts: Vec<StatusConflict>,
}

impl Serialize for PathType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let s = match self {
            PathType::Start => "start",
            PathType::Explicit => "explicit",
            PathType::Semantic => "semantic",
            PathType::Mixed => "mixed",
        };
        serializer.serialize_str(s)
    }
}

impl Serialize for EvolutionEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("EvolutionEvent", 4)?;
        st.serialize_field("toId", &self.to_id)?;
        st.serialize_field("relationType", &self.relation_type)?;
        st.serialize_field(
            "kind",
            match self.kind {
                conflict::EvolutionKind::Asserted => "asserted",
                conflict::EvolutionKind::Retracted => "retracted",
            },
        )?;
        st.serialize_field("at", &self.at)?;
        st.end()
    }
}

impl Serialize for StatusConflict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("StatusConflict", 5)?;
        st.serialize_field("entityId", &self.entity_id)?;
        st.serialize_field("activeObservationId", &self.active_observation_id)?;
        st.serialize_field("activeAt", &self.active_at)?;
        st.serialize_field("discontinuedObservationId", &self.discontinued_observation_id)?;
        st.serialize_field("discontinuedAt", &self.discontinued_at)?;
        st.end()
    }
}

impl Serialize for WalkHit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("WalkHit", 4)?;
        st.serialize_field("entityId", &self.entity_id)?;
        st.serialize_field("distance", &self.distance)?;
        st.serialize_field("pathScore", &self.path_score)?;
        st.serialize_field("pathType", &self.path_type)?;
        st.end()
    }
}

impl Serialize for InferredRelation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("InferredRelation", 5)?;
        st.serialize_field("fromId", &self.from_id)?;
        st.serialize_field("toId", &self.to_id)?;
        st.serialize_field("relationType", &self.relation_type)?;
        st.serialize_field("confidence", &self.confidence)?;
        st.serialize_field("reason", &self.reason)?;
        st.end()
    }
}

impl Serialize for EntityCluster {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("EntityCluster", 3)?;
        st.serialize_field("clusterId", &self.cluster_id)?;
        st.serialize_field("size", &self.size)?;
        st.serialize_field("exampleNames", &self.example_names)?;
        st.end()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Json> {
    serde_json::to_value(value).map_err(|e| CoreError::InvalidInput(format!("failed to encode response: {e}")))
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Json) -> Result<T> {
    serde_json::from_value(args).map_err(|e| CoreError::InvalidInput(format!("invalid arguments: {e}")))
}

fn require_str<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::InvalidInput(format!("missing required field '{name}'")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutateArgs {
    action: String,
    id: Option<String>,
    name: Option<String>,
    entity_type: Option<String>,
    metadata: Option<Metadata>,
    entity_id: Option<String>,
    text: Option<String>,
    deduplicate: Option<bool>,
    from_id: Option<String>,
    to_id: Option<String>,
    relation_type: Option<String>,
    strength: Option<f32>,
    datalog: Option<String>,
    content: Option<Json>,
    steps: Option<Json>,
}

/// Decode a JSON array of `{type, ...}` step objects into [`TransactionStep`]s,
/// for `mutate_memory`'s `run_transaction` action.
fn parse_transaction_steps(json: Json) -> Result<Vec<TransactionStep>> {
    let Json::Array(items) = json else {
        return Err(CoreError::InvalidInput("'steps' must be an array".into()));
    };
    items.into_iter().map(parse_transaction_step).collect()
}

fn step_field<'a>(value: &'a Json, field: &str, step_type: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::InvalidInput(format!("'{step_type}' transaction step missing '{field}'")))
}

fn parse_transaction_step(value: Json) -> Result<TransactionStep> {
    let step_type = value
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| CoreError::InvalidInput("transaction step missing 'type'".into()))?
        .to_string();
    match step_type.as_str() {
        "create_entity" => {
            let name = step_field(&value, "name", &step_type)?;
            let entity_type = step_field(&value, "entityType", &step_type)?;
            let mut entity = Entity::new(name, entity_type);
            if let Some(metadata) = value.get("metadata") {
                entity.metadata = Metadata::from(metadata.clone());
            }
            Ok(TransactionStep::CreateEntity(entity))
        }
        "add_observation" => {
            let entity_id = step_field(&value, "entityId", &step_type)?;
            let text = step_field(&value, "text", &step_type)?;
            let mut observation = Observation::new(entity_id, text);
            if let Some(metadata) = value.get("metadata") {
                observation.metadata = Metadata::from(metadata.clone());
            }
            Ok(TransactionStep::AddObservation(observation))
        }
        "create_relation" => {
            let from_id = step_field(&value, "fromId", &step_type)?;
            let to_id = step_field(&value, "toId", &step_type)?;
            let relation_type = step_field(&value, "relationType", &step_type)?;
            let mut relationship = Relationship::new(from_id, to_id, relation_type);
            if let Some(strength) = value.get("strength").and_then(Json::as_f64) {
                relationship = relationship.with_strength(strength as f32);
            }
            Ok(TransactionStep::CreateRelation(relationship))
        }
        other => Err(CoreError::InvalidInput(format!("unknown transaction step type '{other}'"))),
    }
}

fn describe_outcome(outcome: &TransactionStepOutcome) -> Json {
    match outcome {
        TransactionStepOutcome::EntityCreated(id) => serde_json::json!({"entityCreated": id}),
        TransactionStepOutcome::ObservationAdded(id) => serde_json::json!({"observationAdded": id}),
        TransactionStepOutcome::RelationCreated { from_id, to_id, relation_type } => {
            serde_json::json!({"fromId": from_id, "toId": to_id, "relationType": relation_type})
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryArgs {
    action: String,
    query: Option<String>,
    entity_id: Option<String>,
    limit: Option<usize>,
    max_depth: Option<i64>,
    since: Option<i64>,
    until: Option<i64>,
    entity_types: Option<Vec<String>>,
    include_observations: Option<bool>,
}

impl QueryArgs {
    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.limit.unwrap_or(10),
            include_entities: true,
            include_observations: self.include_observations.unwrap_or(true),
            entity_types: self.entity_types.clone(),
            time_range_hours: None,
        }
    }

    fn advanced_options(&self) -> AdvancedSearchOptions {
        AdvancedSearchOptions { base: self.search_options(), ..Default::default() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeArgs {
    action: String,
    start_id: Option<String>,
    entity_id: Option<String>,
    from_id: Option<String>,
    to_id: Option<String>,
    max_depth: Option<i64>,
    min_similarity: Option<f32>,
    since: Option<i64>,
    until: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManageArgs {
    action: String,
    earlier_id: Option<String>,
    later_id: Option<String>,
    confirm: Option<bool>,
    older_than_days: Option<i64>,
    max_observations: Option<usize>,
    min_entity_degree: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embeddings::NullEmbeddingProvider;
    use crate::janitor::ConcatenationSummarizer;

    fn memory() -> Memory {
        let config = Config::with_dimensions(8);
        let store = Arc::new(Store::open(None, config.clone()).unwrap());
        let embedder = Arc::new(Embedder::new(Box::new(NullEmbeddingProvider::new(8)), config.embedder.clone()));
        Memory::new(store, embedder, Box::new(ConcatenationSummarizer), config).unwrap()
    }

    #[tokio::test]
    async fn new_store_gets_global_user_profile() {
        let memory = memory();
        assert!(memory.store.get_entity(GLOBAL_USER_PROFILE_ID, None).unwrap().is_some());
    }

    #[tokio::test]
    async fn create_entity_then_entity_details_round_trips() {
        let memory = memory();
        let entity = memory.create_entity("Alice", "Person", None).await.unwrap();
        let fetched = memory.entity_details(&entity.id).unwrap();
        assert_eq!(fetched.name, "Alice");
        assert_eq!(fetched.entity_type, "Person");
    }

    #[tokio::test]
    async fn add_observation_dedup_flags_exact_repeat() {
        let memory = memory();
        let entity = memory.create_entity("Project X", "Project", None).await.unwrap();
        let first = memory.add_observation(&entity.id, "kickoff meeting notes", None, true).await.unwrap();
        assert!(!first.duplicate_detected);
        let second = memory.add_observation(&entity.id, "kickoff meeting notes", None, true).await.unwrap();
        assert!(second.duplicate_detected);
        assert_eq!(second.similarity, 1.0);
    }

    #[tokio::test]
    async fn create_relation_rejects_self_loop() {
        let memory = memory();
        let entity = memory.create_entity("X", "Project", None).await.unwrap();
        let err = memory.create_relation(&entity.id, &entity.id, "loops", None, None).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn ingest_file_markdown_dedup_is_idempotent_on_second_call() {
        let memory = memory();
        let entity = memory.create_entity("Notes", "Note", None).await.unwrap();
        let markdown = "first paragraph\n\nsecond paragraph".to_string();

        let first = memory
            .ingest_file(&entity.id, IngestContent::Markdown(markdown.clone()), true)
            .await
            .unwrap();
        assert_eq!(first.added, 2);
        assert_eq!(first.skipped, 0);

        let second = memory.ingest_file(&entity.id, IngestContent::Markdown(markdown), true).await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn clear_memory_requires_confirm() {
        let memory = memory();
        let err = memory.clear_memory(false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn clear_memory_wipes_entities_but_reinits_profile() {
        let memory = memory();
        memory.create_entity("Temp", "Note", None).await.unwrap();
        memory.clear_memory(true).unwrap();

        let (entities, _, _) = memory.store.counts().unwrap();
        assert_eq!(entities, 1);
        assert!(memory.store.get_entity(GLOBAL_USER_PROFILE_ID, None).unwrap().is_some());
    }

    #[tokio::test]
    async fn run_transaction_commits_every_step_together() {
        let memory = memory();
        let a = Entity::new("A", "Person");
        let b = Entity::new("B", "Person");
        let steps = vec![
            TransactionStep::CreateEntity(a.clone()),
            TransactionStep::CreateEntity(b.clone()),
            TransactionStep::CreateRelation(Relationship::new(&a.id, &b.id, "knows")),
        ];
        let outcomes = memory.run_transaction(steps).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(memory.store.get_entity(&a.id, None).unwrap().is_some());
        assert!(memory.store.get_entity(&b.id, None).unwrap().is_some());
    }

    #[tokio::test]
    async fn run_transaction_rejects_self_loop_without_partial_writes() {
        let memory = memory();
        let a = Entity::new("Solo", "Person");
        let steps = vec![
            TransactionStep::CreateEntity(a.clone()),
            TransactionStep::CreateRelation(Relationship::new(&a.id, &a.id, "loops")),
        ];
        let err = memory.run_transaction(steps).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(memory.store.get_entity(&a.id, None).unwrap().is_none());
    }

    #[tokio::test]
    async fn mutate_memory_dispatch_creates_entity() {
        let memory = memory();
        let result = memory
            .mutate_memory(serde_json::json!({"action": "create_entity", "name": "Dispatch", "entityType": "Note"}))
            .await
            .unwrap();
        assert_eq!(result["name"], "Dispatch");
    }
}
