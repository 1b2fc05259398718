//! Conflict & Evolution
//!
//! Status-conflict detection over fixed, externalized word lists and
//! relation-evolution timelines reconstructed from the relationship
//! validity history — both read-only over the Store, no persistence of
//! their own.

use chrono::{DateTime, TimeZone, Utc};
use regex::RegexSet;
use serde::Serialize;

use crate::error::Result;
use crate::storage::Store;

const ACTIVE_WORDS: &[&str] = &["active", "ongoing", "in progress", "current", "live"];
const DISCONTINUED_WORDS: &[&str] =
    &["discontinued", "deprecated", "retired", "archived", "cancelled", "canceled", "ended"];

fn word_boundary_pattern(word: &str) -> String {
    format!(r"(?i)\b{}\b", regex::escape(word))
}

fn active_set() -> RegexSet {
    RegexSet::new(ACTIVE_WORDS.iter().map(|w| word_boundary_pattern(w))).expect("fixed pattern list")
}

fn discontinued_set() -> RegexSet {
    RegexSet::new(DISCONTINUED_WORDS.iter().map(|w| word_boundary_pattern(w))).expect("fixed pattern list")
}

/// A detected status conflict: an entity with a live "active"-worded
/// observation and a live "discontinued"-worded observation in the same
/// UTC year.
#[derive(Debug, Clone)]
pub struct StatusConflict {
    pub entity_id: String,
    pub active_observation_id: String,
    pub active_at: DateTime<Utc>,
    pub discontinued_observation_id: String,
    pub discontinued_at: DateTime<Utc>,
}

/// Find status conflicts among `entity_ids`: for each, the latest
/// observation matching an active word and the latest matching a
/// discontinued word, flagged iff both exist and fall in the same UTC year.
pub fn detect_status_conflicts(store: &Store, entity_ids: &[String]) -> Result<Vec<StatusConflict>> {
    let active = active_set();
    let discontinued = discontinued_set();

    let mut conflicts = Vec::new();
    for entity_id in entity_ids {
        let observations = store.list_observations_for_entity(entity_id, None)?;

        let latest_active = observations
            .iter()
            .filter(|o| active.is_match(&o.text))
            .max_by_key(|o| o.created_at);
        let latest_discontinued = observations
            .iter()
            .filter(|o| discontinued.is_match(&o.text))
            .max_by_key(|o| o.created_at);

        if let (Some(a), Some(d)) = (latest_active, latest_discontinued) {
            if a.created_at.date_naive().format("%Y").to_string() == d.created_at.date_naive().format("%Y").to_string() {
                conflicts.push(StatusConflict {
                    entity_id: entity_id.clone(),
                    active_observation_id: a.id.clone(),
                    active_at: a.created_at,
                    discontinued_observation_id: d.id.clone(),
                    discontinued_at: d.created_at,
                });
            }
        }
    }
    Ok(conflicts)
}

/// One point in a relationship's validity timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolutionKind {
    Asserted,
    Retracted,
}

#[derive(Debug, Clone)]
pub struct EvolutionEvent {
    pub to_id: String,
    pub relation_type: String,
    pub kind: EvolutionKind,
    pub at: DateTime<Utc>,
}

/// Summary of a relation's evolution over a window: relation types newly
/// asserted vs. ones ultimately retracted, by latest event.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Every assertion/retraction event of `from_id`'s outgoing relationships,
/// optionally narrowed to `to_id`, optionally windowed by `[since, until]`
/// microseconds, sorted ascending.
pub fn relation_evolution(
    store: &Store,
    from_id: &str,
    to_id: Option<&str>,
    since: Option<i64>,
    until: Option<i64>,
) -> Result<(Vec<EvolutionEvent>, EvolutionSummary)> {
    let mut events: Vec<EvolutionEvent> = store
        .all_relationship_events(from_id, to_id)?
        .into_iter()
        .filter(|rel| {
            since.is_none_or(|s| rel.validity.timestamp_micros >= s)
                && until.is_none_or(|u| rel.validity.timestamp_micros <= u)
        })
        .map(|rel| EvolutionEvent {
            to_id: rel.to_id,
            relation_type: rel.relation_type,
            kind: if rel.validity.asserted { EvolutionKind::Asserted } else { EvolutionKind::Retracted },
            at: micros_to_datetime(rel.validity.timestamp_micros),
        })
        .collect();
    events.sort_by_key(|e| e.at);

    let mut summary = EvolutionSummary::default();
    let mut latest_by_type: std::collections::HashMap<(String, String), EvolutionKind> = std::collections::HashMap::new();
    for event in &events {
        latest_by_type.insert((event.to_id.clone(), event.relation_type.clone()), event.kind);
    }
    for ((target, relation_type), kind) in latest_by_type {
        let label = format!("{relation_type}->{target}");
        match kind {
            EvolutionKind::Asserted => summary.added.push(label),
            EvolutionKind::Retracted => summary.removed.push(label),
        }
    }
    summary.added.sort();
    summary.removed.sort();

    Ok((events, summary))
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Entity, Observation, Relationship};

    fn fresh_store() -> Store {
        Store::open(None, Config::with_dimensions(8)).unwrap()
    }

    #[test]
    fn flags_conflict_when_active_and_discontinued_share_a_year() {
        let store = fresh_store();
        let entity = Entity::new("Project X", "Project");
        store.insert_entity(&entity).unwrap();
        store.insert_observation(&Observation::new(&entity.id, "Project X is currently active")).unwrap();
        store.insert_observation(&Observation::new(&entity.id, "Project X was discontinued this month")).unwrap();

        let conflicts = detect_status_conflicts(&store, &[entity.id.clone()]).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_id, entity.id);
    }

    #[test]
    fn no_conflict_without_both_words() {
        let store = fresh_store();
        let entity = Entity::new("Project Y", "Project");
        store.insert_entity(&entity).unwrap();
        store.insert_observation(&Observation::new(&entity.id, "Project Y is ongoing")).unwrap();

        assert!(detect_status_conflicts(&store, &[entity.id]).unwrap().is_empty());
    }

    #[test]
    fn evolution_reports_assert_then_retract() {
        let store = fresh_store();
        let a = Entity::new("A", "Person");
        let b = Entity::new("B", "Person");
        store.insert_entity(&a).unwrap();
        store.insert_entity(&b).unwrap();
        store.insert_relationship(&Relationship::new(&a.id, &b.id, "knows")).unwrap();
        store.retract_relationship(&a.id, &b.id, "knows").unwrap();

        let (events, summary) = relation_evolution(&store, &a.id, None, None, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EvolutionKind::Asserted);
        assert_eq!(events[1].kind, EvolutionKind::Retracted);
        assert!(summary.added.is_empty());
        assert_eq!(summary.removed, vec!["knows->".to_string() + &b.id]);
    }
}
