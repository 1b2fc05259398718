//! Janitor
//!
//! Consolidates old, low-degree observations into hierarchical
//! `ExecutiveSummary` entities. Summarization is an external collaborator —
//! [`SummarizationProvider`] — wrapped the way [`crate::embeddings::Embedder`]
//! wraps [`crate::embeddings::EmbeddingProvider`]: the trait is the seam,
//! [`Janitor`] owns the timeout and the concatenation fallback.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{check_cancelled, Result};
use crate::model::{metadata::Value, Entity, Observation, Relationship};
use crate::storage::Store;

/// An external summarization callable. Implementations may call out to an
/// LLM; a runtime error or timeout falls back to [`concatenate`].
pub trait SummarizationProvider: Send + Sync {
    /// Summarize `fragments` (an entity's retracted observation texts) into
    /// a single executive summary. Returning the literal string `"DELETE"`
    /// signals the janitor to drop the group without creating a summary
    /// entity.
    fn summarize(&self, entity_name: &str, fragments: &[String]) -> Result<String>;
}

/// Joins fragments with blank lines; used when no provider is configured or
/// the configured one fails.
pub struct ConcatenationSummarizer;

impl SummarizationProvider for ConcatenationSummarizer {
    fn summarize(&self, _entity_name: &str, fragments: &[String]) -> Result<String> {
        Ok(fragments.join("\n\n"))
    }
}

fn concatenate(fragments: &[String]) -> String {
    fragments.join("\n\n")
}

/// Parameters for one janitor sweep.
#[derive(Debug, Clone)]
pub struct JanitorRequest {
    pub older_than_days: i64,
    pub max_observations: usize,
    pub min_entity_degree: i64,
    pub confirm: bool,
}

/// Per-entity outcome of a confirmed sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOutcome {
    pub entity_id: String,
    pub retracted_observation_ids: Vec<String>,
    pub executive_summary_id: Option<String>,
}

/// Result of a janitor sweep: either a dry-run candidate listing or the
/// confirmed outcomes, plus the unconditional cache-GC count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JanitorReport {
    pub dry_run: bool,
    pub cache_gc_count: usize,
    /// `entity_id -> candidate observation ids`, populated only on dry run.
    pub candidate_groups: HashMap<String, Vec<String>>,
    /// Populated only when `confirm = true`.
    pub outcomes: Vec<EntityOutcome>,
}

pub struct Janitor {
    store: Arc<Store>,
    summarizer: Box<dyn SummarizationProvider>,
    llm_timeout: std::time::Duration,
}

impl Janitor {
    pub fn new(
        store: Arc<Store>,
        summarizer: Box<dyn SummarizationProvider>,
        config: crate::config::JanitorConfig,
    ) -> Self {
        Self { store, summarizer, llm_timeout: config.llm_timeout }
    }

    /// Run one sweep. Cache GC always runs; candidate selection and (if
    /// `confirm`) consolidation into executive summaries follow. Polls
    /// `cancel` between groups and before each external summarizer call.
    pub async fn run(&self, req: JanitorRequest, cancel: &CancellationToken) -> Result<JanitorReport> {
        check_cancelled(cancel, "janitor")?;
        let oversample = req.max_observations.saturating_mul(5).max(req.max_observations);
        let raw = self.store.oldest_observations(req.older_than_days, oversample)?;

        let mut degree_cache: HashMap<String, i64> = HashMap::new();
        let mut kept: Vec<Observation> = Vec::new();
        for obs in raw {
            let degree = *degree_cache
                .entry(obs.entity_id.clone())
                .or_insert_with(|| self.store.entity_degree(&obs.entity_id, None).unwrap_or(i64::MAX));
            if degree < req.min_entity_degree {
                kept.push(obs);
                if kept.len() >= req.max_observations {
                    break;
                }
            }
        }

        let mut groups: HashMap<String, Vec<Observation>> = HashMap::new();
        for obs in kept {
            groups.entry(obs.entity_id.clone()).or_default().push(obs);
        }

        let now_seconds = Utc::now().timestamp();
        let cache_gc_count = self
            .store
            .cache_gc(now_seconds, req.older_than_days.saturating_mul(86400))
            .unwrap_or(0);

        if !req.confirm {
            let candidate_groups = groups
                .into_iter()
                .map(|(id, obs)| (id, obs.into_iter().map(|o| o.id).collect()))
                .collect();
            return Ok(JanitorReport { dry_run: true, cache_gc_count, candidate_groups, outcomes: vec![] });
        }

        let anchor = Entity::new("Janitor Run", "Summary");
        self.store.insert_entity(&anchor)?;

        let mut outcomes = Vec::with_capacity(groups.len());
        for (entity_id, observations) in &groups {
            check_cancelled(cancel, "janitor")?;
            let entity_name = self
                .store
                .get_entity(entity_id, None)?
                .map(|e| e.name)
                .unwrap_or_else(|| entity_id.clone());
            let level = self.next_summary_level(entity_id)?;
            let fragments: Vec<String> = observations.iter().map(|o| o.text.clone()).collect();

            check_cancelled(cancel, "janitor")?;
            let summary_text = match tokio::time::timeout(
                self.llm_timeout,
                std::future::ready(self.summarizer.summarize(&entity_name, &fragments)),
            )
            .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::warn!(entity = %entity_id, error = %e, "summarization provider failed, falling back to concatenation");
                    concatenate(&fragments)
                }
                Err(_) => {
                    tracing::warn!(entity = %entity_id, "summarization timed out, falling back to concatenation");
                    concatenate(&fragments)
                }
            };

            let executive_summary_id = if !summary_text.trim().is_empty() && summary_text.trim() != "DELETE" {
                let mut summary_entity = Entity::new(format!("{entity_name} summary"), "ExecutiveSummary");
                let mut janitor_meta = BTreeMap::new();
                janitor_meta.insert("level".to_string(), Value::Number(level));
                summary_entity.metadata.set("janitor", Value::Object(janitor_meta));
                self.store.insert_entity(&summary_entity)?;
                self.store
                    .insert_observation(&Observation::new(&summary_entity.id, summary_text))?;
                self.store.insert_relationship(&Relationship::new(
                    &summary_entity.id,
                    entity_id,
                    "summary_of",
                ))?;
                self.store
                    .insert_relationship(&Relationship::new(&anchor.id, &summary_entity.id, "generated"))?;
                Some(summary_entity.id)
            } else {
                None
            };

            let mut retracted_observation_ids = Vec::with_capacity(observations.len());
            for obs in observations {
                self.store.hard_remove_observation(&obs.id)?;
                retracted_observation_ids.push(obs.id.clone());
            }

            let mut provenance = Relationship::new(&anchor.id, entity_id, "summarizes");
            provenance
                .metadata
                .set("retracted_count", Value::Number(retracted_observation_ids.len() as f64));
            self.store.insert_relationship(&provenance)?;

            outcomes.push(EntityOutcome {
                entity_id: entity_id.clone(),
                retracted_observation_ids,
                executive_summary_id,
            });
        }

        Ok(JanitorReport { dry_run: false, cache_gc_count, candidate_groups: HashMap::new(), outcomes })
    }

    /// `1 + max(metadata.janitor.level)` over every `ExecutiveSummary`
    /// already pointing `summary_of` at `entity_id`, else `0`.
    fn next_summary_level(&self, entity_id: &str) -> Result<f64> {
        let mut max_level: Option<f64> = None;
        for rel in self.store.relationships_for_entity(entity_id, None)? {
            if rel.relation_type != "summary_of" || rel.to_id != entity_id {
                continue;
            }
            if let Some(summary_entity) = self.store.get_entity(&rel.from_id, None)? {
                if let Some(level) = summary_entity.metadata.janitor_level() {
                    max_level = Some(max_level.map_or(level, |m: f64| m.max(level)));
                }
            }
        }
        Ok(max_level.map(|l| l + 1.0).unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn janitor() -> (Janitor, Arc<Store>) {
        let config = Config::with_dimensions(8);
        let store = Arc::new(Store::open(None, config.clone()).unwrap());
        let janitor = Janitor::new(Arc::clone(&store), Box::new(ConcatenationSummarizer), config.janitor);
        (janitor, store)
    }

    fn aged_observation(entity_id: &str, text: &str, days_ago: i64) -> Observation {
        let mut obs = Observation::new(entity_id, text);
        obs.created_at = Utc::now() - chrono::Duration::days(days_ago);
        obs
    }

    #[tokio::test]
    async fn dry_run_reports_candidates_without_mutating_store() {
        let (janitor, store) = janitor();
        let entity = Entity::new("Orphan", "Note");
        store.insert_entity(&entity).unwrap();
        store.insert_observation(&aged_observation(&entity.id, "ancient note", 400)).unwrap();

        let report = janitor
            .run(
                JanitorRequest { older_than_days: 30, max_observations: 10, min_entity_degree: 1, confirm: false },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(report.dry_run);
        assert!(report.candidate_groups.contains_key(&entity.id));
        assert!(store.get_observation(&store.oldest_observations(30, 10).unwrap()[0].id, None).unwrap().is_some());
    }

    #[tokio::test]
    async fn high_degree_entities_are_never_retracted() {
        let (janitor, store) = janitor();
        let hub = Entity::new("Hub", "Project");
        let other = Entity::new("Other", "Project");
        store.insert_entity(&hub).unwrap();
        store.insert_entity(&other).unwrap();
        store.insert_relationship(&Relationship::new(&hub.id, &other.id, "refs")).unwrap();
        store.insert_observation(&aged_observation(&hub.id, "old note on a busy hub", 400)).unwrap();

        let report = janitor
            .run(
                JanitorRequest { older_than_days: 30, max_observations: 10, min_entity_degree: 1, confirm: false },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!report.candidate_groups.contains_key(&hub.id));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_sweep_before_it_runs() {
        let (janitor, store) = janitor();
        let entity = Entity::new("Orphan", "Note");
        store.insert_entity(&entity).unwrap();
        store.insert_observation(&aged_observation(&entity.id, "ancient note", 400)).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = janitor
            .run(
                JanitorRequest { older_than_days: 30, max_observations: 10, min_entity_degree: 1, confirm: false },
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Cancelled(_)));
    }

    #[tokio::test]
    async fn confirmed_run_creates_executive_summary_and_retracts_sources() {
        let (janitor, store) = janitor();
        let entity = Entity::new("Orphan", "Note");
        store.insert_entity(&entity).unwrap();
        let obs = aged_observation(&entity.id, "first ancient fragment", 400);
        store.insert_observation(&obs).unwrap();

        let report = janitor
            .run(
                JanitorRequest { older_than_days: 30, max_observations: 10, min_entity_degree: 1, confirm: true },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!report.dry_run);
        let outcome = report.outcomes.iter().find(|o| o.entity_id == entity.id).unwrap();
        assert!(outcome.executive_summary_id.is_some());
        assert!(store.get_observation(&obs.id, None).unwrap().is_none());
    }
}
