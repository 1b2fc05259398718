//! The Store: the sole owner of every persisted record
//!
//! One SQLite connection pair (`writer`/`reader`, each `Mutex`-guarded),
//! typed methods instead of a generic query interpreter, and — when the
//! `vector-search` feature is enabled — a [`VectorIndexSet`] kept in
//! lockstep with the rows that own each embedding.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::model::{
    Entity, InferenceRule, Metadata, Observation, Relationship, SearchCacheEntry, Validity,
};
use crate::storage::lsh::{LshCandidate, MinHashSignature};
use crate::storage::migrations;

#[cfg(feature = "vector-search")]
use crate::storage::vector::VectorIndexSet;

/// One step of an atomic multi-op write, for `Store::run_transaction`.
#[derive(Debug, Clone)]
pub enum TransactionStep {
    CreateEntity(Entity),
    AddObservation(Observation),
    CreateRelation(Relationship),
}

/// What `Store::run_transaction` created for the matching [`TransactionStep`].
#[derive(Debug, Clone)]
pub enum TransactionStepOutcome {
    EntityCreated(String),
    ObservationAdded(String),
    RelationCreated { from_id: String, to_id: String, relation_type: String },
}

/// The sole owner of every persisted record.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    #[cfg(feature = "vector-search")]
    vectors: Mutex<VectorIndexSet>,
    config: Config,
}

fn poisoned(what: &str) -> CoreError {
    CoreError::Fatal(format!("{what} lock poisoned"))
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

impl Store {
    /// Open (creating if absent) the store at `path`, or an in-memory store
    /// when `path` is `None` — used by tests and by callers that only need
    /// a process-local scratch store.
    pub fn open(path: Option<PathBuf>, config: Config) -> Result<Self> {
        let writer_conn = match &path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = match &path {
            Some(p) => Connection::open(p)?,
            None => {
                // An in-memory writer's schema is private to that connection;
                // mirror it onto a second in-memory connection for parity
                // with the on-disk reader/writer split.
                let reader = Connection::open_in_memory()?;
                configure_connection(&reader)?;
                migrations::apply_migrations(&reader)?;
                return Ok(Self::assemble(writer_conn, reader, config)?);
            }
        };
        configure_connection(&reader_conn)?;

        Self::assemble(writer_conn, reader_conn, config)
    }

    #[cfg(feature = "vector-search")]
    fn assemble(writer: Connection, reader: Connection, config: Config) -> Result<Self> {
        let vectors = VectorIndexSet::new(config.hnsw.clone())
            .map_err(|e| CoreError::Fatal(format!("vector index init failed: {e}")))?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            vectors: Mutex::new(vectors),
            config,
        })
    }

    #[cfg(not(feature = "vector-search"))]
    fn assemble(writer: Connection, reader: Connection, config: Config) -> Result<Self> {
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a closure inside one transaction on the writer connection: every
    /// statement it issues commits together, or none do.
    pub fn transaction<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock().map_err(|_| poisoned("writer"))?;
        let tx = conn.transaction().map_err(CoreError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(CoreError::from)?;
        Ok(result)
    }

    fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.writer.lock().map_err(|_| poisoned("writer"))?;
        f(&conn).map_err(CoreError::from)
    }

    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.reader.lock().map_err(|_| poisoned("reader"))?;
        f(&conn).map_err(CoreError::from)
    }

    // ---------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------

    /// Insert `entity` as a new asserted row, enforcing the data model's
    /// name-uniqueness and status-exclusivity invariants against the
    /// *current* live set.
    pub fn insert_entity(&self, entity: &Entity) -> Result<()> {
        if entity.name.trim().is_empty() || entity.entity_type.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "entity name and type must be non-empty".into(),
            ));
        }
        if entity.is_active_status() && entity.is_discontinued_status() {
            return Err(CoreError::Conflict(
                "entity metadata.status cannot be both active and discontinued".into(),
            ));
        }
        if let Some(existing) = self.get_entity_by_name(&entity.name, None)? {
            if existing.id != entity.id {
                return Err(CoreError::Conflict(format!(
                    "entity name '{}' already in use by live entity {}",
                    entity.name, existing.id
                )));
            }
        }

        let metadata_json = serde_json::to_string(&Into::<serde_json::Value>::into(
            entity.metadata.clone(),
        ))
        .map_err(|e| CoreError::InvalidInput(format!("invalid metadata: {e}")))?;

        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO entities (id, name, type, metadata, content_embedding,
                    name_embedding, valid_ts_micros, valid_asserted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entity.id,
                    entity.name,
                    entity.entity_type,
                    metadata_json,
                    entity.content_embedding.as_ref().map(|v| f32_blob(v)),
                    entity.name_embedding.as_ref().map(|v| f32_blob(v)),
                    entity.validity.timestamp_micros,
                    entity.validity.asserted as i64,
                    entity.created_at.to_rfc3339(),
                    entity.updated_at.to_rfc3339(),
                ],
            )?;
            conn.execute(
                "INSERT INTO entities_fts (id, name) VALUES (?1, ?2)",
                params![entity.id, entity.name],
            )?;
            Ok(())
        })?;

        #[cfg(feature = "vector-search")]
        {
            if let Some(v) = &entity.content_embedding {
                self.upsert_vector_entity_content(&entity.entity_type, &entity.id, v)?;
            }
            if let Some(v) = &entity.name_embedding {
                self.upsert_vector(crate::storage::vector::ENTITY_NAME, &entity.id, v)?;
            }
        }

        Ok(())
    }

    /// Append a retracting stamp for `id`, leaving prior asserted rows
    /// intact (bitemporal history is never overwritten).
    pub fn retract_entity(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO entities (id, name, type, metadata, content_embedding,
                    name_embedding, valid_ts_micros, valid_asserted, created_at, updated_at)
                 SELECT id, name, type, metadata, content_embedding, name_embedding,
                    ?2, 0, created_at, ?3
                 FROM entities WHERE id = ?1
                 ORDER BY valid_ts_micros DESC LIMIT 1",
                params![id, Validity::retracted_now().timestamp_micros, now.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Latest row for `id` live at `at` (default: now).
    pub fn get_entity(&self, id: &str, at: Option<i64>) -> Result<Option<Entity>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        let row = self.with_reader(|conn| {
            conn.query_row(
                "SELECT id, name, type, metadata, content_embedding, name_embedding,
                    valid_ts_micros, valid_asserted, created_at, updated_at
                 FROM entities WHERE id = ?1 AND valid_ts_micros <= ?2
                 ORDER BY valid_ts_micros DESC LIMIT 1",
                params![id, at],
                row_to_entity,
            )
            .optional()
        })?;
        Ok(row.filter(|e| e.validity.asserted))
    }

    /// The live entity (if any) whose name matches `name` case-insensitively,
    /// excluding nothing — used for the uniqueness check on insert.
    pub fn get_entity_by_name(&self, name: &str, at: Option<i64>) -> Result<Option<Entity>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        let candidate_ids: Vec<String> = self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT id FROM entities WHERE name = ?1 COLLATE NOCASE",
            )?;
            stmt.query_map(params![name], |row| row.get(0))?
                .collect()
        })?;
        for id in candidate_ids {
            if let Some(entity) = self.get_entity(&id, Some(at))? {
                if entity.name.eq_ignore_ascii_case(name) {
                    return Ok(Some(entity));
                }
            }
        }
        Ok(None)
    }

    /// Every live entity at `at`, optionally restricted to `entity_type`.
    pub fn list_entities(&self, entity_type: Option<&str>, at: Option<i64>) -> Result<Vec<Entity>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        let rows: Vec<Entity> = self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.name, e.type, e.metadata, e.content_embedding, e.name_embedding,
                    e.valid_ts_micros, e.valid_asserted, e.created_at, e.updated_at
                 FROM entities e
                 INNER JOIN (
                     SELECT id, MAX(valid_ts_micros) AS max_ts FROM entities
                     WHERE valid_ts_micros <= ?1 GROUP BY id
                 ) latest ON e.id = latest.id AND e.valid_ts_micros = latest.max_ts
                 WHERE e.valid_asserted = 1",
            )?;
            stmt.query_map(params![at], row_to_entity)?.collect()
        })?;
        Ok(match entity_type {
            Some(t) => rows.into_iter().filter(|e| e.entity_type == t).collect(),
            None => rows,
        })
    }

    // ---------------------------------------------------------------
    // Observations
    // ---------------------------------------------------------------

    pub fn insert_observation(&self, obs: &Observation) -> Result<()> {
        if obs.text.trim().is_empty() {
            return Err(CoreError::InvalidInput("observation text must be non-empty".into()));
        }
        let metadata_json = serde_json::to_string(&Into::<serde_json::Value>::into(
            obs.metadata.clone(),
        ))
        .map_err(|e| CoreError::InvalidInput(format!("invalid metadata: {e}")))?;

        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO observations (id, entity_id, text, embedding, metadata,
                    valid_ts_micros, valid_asserted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    obs.id,
                    obs.entity_id,
                    obs.text,
                    obs.embedding.as_ref().map(|v| f32_blob(v)),
                    metadata_json,
                    obs.validity.timestamp_micros,
                    obs.validity.asserted as i64,
                    obs.created_at.to_rfc3339(),
                    obs.updated_at.to_rfc3339(),
                ],
            )?;
            conn.execute(
                "INSERT INTO observations_fts (id, text) VALUES (?1, ?2)",
                params![obs.id, obs.text],
            )?;
            Ok(())
        })?;

        #[cfg(feature = "vector-search")]
        if let Some(v) = &obs.embedding {
            self.upsert_vector(crate::storage::vector::OBSERVATION_CONTENT, &obs.id, v)?;
        }

        Ok(())
    }

    pub fn get_observation(&self, id: &str, at: Option<i64>) -> Result<Option<Observation>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        let row = self.with_reader(|conn| {
            conn.query_row(
                "SELECT id, entity_id, text, embedding, metadata,
                    valid_ts_micros, valid_asserted, created_at, updated_at
                 FROM observations WHERE id = ?1 AND valid_ts_micros <= ?2
                 ORDER BY valid_ts_micros DESC LIMIT 1",
                params![id, at],
                row_to_observation,
            )
            .optional()
        })?;
        Ok(row.filter(|o| o.validity.asserted))
    }

    /// Every live observation of `entity_id` at `at`.
    pub fn list_observations_for_entity(
        &self,
        entity_id: &str,
        at: Option<i64>,
    ) -> Result<Vec<Observation>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT o.id, o.entity_id, o.text, o.embedding, o.metadata,
                    o.valid_ts_micros, o.valid_asserted, o.created_at, o.updated_at
                 FROM observations o
                 INNER JOIN (
                     SELECT id, MAX(valid_ts_micros) AS max_ts FROM observations
                     WHERE valid_ts_micros <= ?1 GROUP BY id
                 ) latest ON o.id = latest.id AND o.valid_ts_micros = latest.max_ts
                 WHERE o.valid_asserted = 1 AND o.entity_id = ?2",
            )?;
            stmt.query_map(params![at, entity_id], row_to_observation)?
                .collect()
        })
    }

    /// All observations created before `now_seconds - older_than_days *
    /// 86400`, oldest-first, up to `limit`. Feeds the janitor's candidate
    /// scan.
    pub fn oldest_observations(&self, older_than_days: i64, limit: usize) -> Result<Vec<Observation>> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT o.id, o.entity_id, o.text, o.embedding, o.metadata,
                    o.valid_ts_micros, o.valid_asserted, o.created_at, o.updated_at
                 FROM observations o
                 INNER JOIN (
                     SELECT id, MAX(valid_ts_micros) AS max_ts FROM observations GROUP BY id
                 ) latest ON o.id = latest.id AND o.valid_ts_micros = latest.max_ts
                 WHERE o.valid_asserted = 1 AND o.created_at < ?1
                 ORDER BY o.created_at ASC LIMIT ?2",
            )?;
            stmt.query_map(params![cutoff.to_rfc3339(), limit as i64], row_to_observation)?
                .collect()
        })
    }

    pub fn retract_observation(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO observations (id, entity_id, text, embedding, metadata,
                    valid_ts_micros, valid_asserted, created_at, updated_at)
                 SELECT id, entity_id, text, embedding, metadata, ?2, 0, created_at, ?3
                 FROM observations WHERE id = ?1 ORDER BY valid_ts_micros DESC LIMIT 1",
                params![id, Validity::retracted_now().timestamp_micros, now.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Hard-remove every validity row for `(id)` — used by the janitor,
    /// which retracts source observations outright rather than leaving a
    /// retraction stamp behind.
    pub fn hard_remove_observation(&self, id: &str) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute("DELETE FROM observations WHERE id = ?1", params![id])?;
            conn.execute("DELETE FROM observations_fts WHERE id = ?1", params![id])?;
            Ok(())
        })?;
        #[cfg(feature = "vector-search")]
        self.remove_vector(crate::storage::vector::OBSERVATION_CONTENT, id)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Relationships
    // ---------------------------------------------------------------

    pub fn insert_relationship(&self, rel: &Relationship) -> Result<()> {
        if rel.is_self_loop() {
            return Err(CoreError::Conflict("relationship cannot be a self-loop".into()));
        }
        let metadata_json = serde_json::to_string(&Into::<serde_json::Value>::into(
            rel.metadata.clone(),
        ))
        .map_err(|e| CoreError::InvalidInput(format!("invalid metadata: {e}")))?;

        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO relationships (from_id, to_id, relation_type, strength, metadata,
                    valid_ts_micros, valid_asserted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rel.from_id,
                    rel.to_id,
                    rel.relation_type,
                    rel.strength,
                    metadata_json,
                    rel.validity.timestamp_micros,
                    rel.validity.asserted as i64,
                    rel.created_at.to_rfc3339(),
                    rel.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn retract_relationship(&self, from_id: &str, to_id: &str, relation_type: &str) -> Result<()> {
        let now = Utc::now();
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO relationships (from_id, to_id, relation_type, strength, metadata,
                    valid_ts_micros, valid_asserted, created_at, updated_at)
                 SELECT from_id, to_id, relation_type, strength, metadata, ?4, 0, created_at, ?5
                 FROM relationships
                 WHERE from_id = ?1 AND to_id = ?2 AND relation_type = ?3
                 ORDER BY valid_ts_micros DESC LIMIT 1",
                params![
                    from_id,
                    to_id,
                    relation_type,
                    Validity::retracted_now().timestamp_micros,
                    now.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    /// Every live relationship, either direction, touching `entity_id`.
    pub fn relationships_for_entity(&self, entity_id: &str, at: Option<i64>) -> Result<Vec<Relationship>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.from_id, r.to_id, r.relation_type, r.strength, r.metadata,
                    r.valid_ts_micros, r.valid_asserted, r.created_at, r.updated_at
                 FROM relationships r
                 INNER JOIN (
                     SELECT from_id, to_id, relation_type, MAX(valid_ts_micros) AS max_ts
                     FROM relationships WHERE valid_ts_micros <= ?1
                     GROUP BY from_id, to_id, relation_type
                 ) latest ON r.from_id = latest.from_id AND r.to_id = latest.to_id
                     AND r.relation_type = latest.relation_type AND r.valid_ts_micros = latest.max_ts
                 WHERE r.valid_asserted = 1 AND (r.from_id = ?2 OR r.to_id = ?2)",
            )?;
            stmt.query_map(params![at, entity_id], row_to_relationship)?
                .collect()
        })
    }

    /// Every live relationship in the graph, for `GraphAnalytics`.
    pub fn all_live_relationships(&self, at: Option<i64>) -> Result<Vec<Relationship>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.from_id, r.to_id, r.relation_type, r.strength, r.metadata,
                    r.valid_ts_micros, r.valid_asserted, r.created_at, r.updated_at
                 FROM relationships r
                 INNER JOIN (
                     SELECT from_id, to_id, relation_type, MAX(valid_ts_micros) AS max_ts
                     FROM relationships WHERE valid_ts_micros <= ?1
                     GROUP BY from_id, to_id, relation_type
                 ) latest ON r.from_id = latest.from_id AND r.to_id = latest.to_id
                     AND r.relation_type = latest.relation_type AND r.valid_ts_micros = latest.max_ts
                 WHERE r.valid_asserted = 1",
            )?;
            stmt.query_map(params![at], row_to_relationship)?.collect()
        })
    }

    pub fn all_relationship_events(
        &self,
        from_id: &str,
        to_id: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_id, to_id, relation_type, strength, metadata,
                    valid_ts_micros, valid_asserted, created_at, updated_at
                 FROM relationships
                 WHERE from_id = ?1 AND (?2 IS NULL OR to_id = ?2)
                 ORDER BY valid_ts_micros ASC",
            )?;
            stmt.query_map(params![from_id, to_id], row_to_relationship)?
                .collect()
        })
    }

    /// Count of live outgoing + incoming relationships for `entity_id`.
    pub fn entity_degree(&self, entity_id: &str, at: Option<i64>) -> Result<i64> {
        Ok(self.relationships_for_entity(entity_id, at)?.len() as i64)
    }

    /// Graph join via recursive CTE: every entity reachable from
    /// `start_id` over live relationships (either direction) within
    /// `max_depth` hops, paired with the shortest depth at which it was
    /// reached. Satisfies the "equivalent to Datalog or CTE recursion"
    /// requirement for graph joins.
    pub fn neighbors(&self, start_id: &str, max_depth: i64, at: Option<i64>) -> Result<Vec<(String, i64)>> {
        let at = at.unwrap_or_else(crate::model::validity::now_micros);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "WITH RECURSIVE live_rel AS (
                    SELECT r.from_id, r.to_id FROM relationships r
                    INNER JOIN (
                        SELECT from_id, to_id, relation_type, MAX(valid_ts_micros) AS max_ts
                        FROM relationships WHERE valid_ts_micros <= ?1
                        GROUP BY from_id, to_id, relation_type
                    ) latest ON r.from_id = latest.from_id AND r.to_id = latest.to_id
                        AND r.relation_type = latest.relation_type AND r.valid_ts_micros = latest.max_ts
                    WHERE r.valid_asserted = 1
                 ),
                 walk(id, depth) AS (
                    SELECT ?2, 0
                    UNION
                    SELECT
                        CASE WHEN lr.from_id = walk.id THEN lr.to_id ELSE lr.from_id END,
                        walk.depth + 1
                    FROM walk JOIN live_rel lr ON (lr.from_id = walk.id OR lr.to_id = walk.id)
                    WHERE walk.depth < ?3
                 )
                 SELECT id, MIN(depth) AS depth FROM walk WHERE id != ?2 GROUP BY id",
            )?;
            stmt.query_map(params![at, start_id, max_depth], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect()
        })
    }

    // ---------------------------------------------------------------
    // Vector search
    // ---------------------------------------------------------------

    #[cfg(feature = "vector-search")]
    pub fn upsert_vector(&self, index: &str, key: &str, vector: &[f32]) -> Result<()> {
        let mut vectors = self.vectors.lock().map_err(|_| poisoned("vectors"))?;
        vectors
            .upsert(index, key, vector)
            .map_err(|e| CoreError::store(format!("upsert_vector({index})"), e))
    }

    #[cfg(feature = "vector-search")]
    pub fn upsert_vector_entity_content(&self, entity_type: &str, key: &str, vector: &[f32]) -> Result<()> {
        let mut vectors = self.vectors.lock().map_err(|_| poisoned("vectors"))?;
        vectors
            .upsert_entity_content(entity_type, key, vector)
            .map_err(|e| CoreError::store("upsert_vector_entity_content", e))
    }

    #[cfg(feature = "vector-search")]
    pub fn remove_vector(&self, index: &str, key: &str) -> Result<()> {
        let mut vectors = self.vectors.lock().map_err(|_| poisoned("vectors"))?;
        vectors
            .remove(index, key)
            .map(|_| ())
            .map_err(|e| CoreError::store(format!("remove_vector({index})"), e))
    }

    /// Top-`limit` nearest keys on the named index.
    #[cfg(feature = "vector-search")]
    pub fn ann_search(&self, index: &str, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        let vectors = self.vectors.lock().map_err(|_| poisoned("vectors"))?;
        vectors
            .search(index, query, limit)
            .map_err(|e| CoreError::store(format!("ann_search({index})"), e))
    }

    #[cfg(not(feature = "vector-search"))]
    pub fn ann_search(&self, _index: &str, _query: &[f32], _limit: usize) -> Result<Vec<(String, f32)>> {
        Ok(vec![])
    }

    // ---------------------------------------------------------------
    // Full-text search
    // ---------------------------------------------------------------

    /// Tokenize → lowercase → stem (FTS5 `porter` tokenizer) → rank by
    /// BM25, folded into a `(0, 1]` similarity-like score.
    pub fn fts_search_entities(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bm25(entities_fts) AS rank FROM entities_fts
                 WHERE entities_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )?;
            stmt.query_map(params![fts_query(query), limit as i64], |row| {
                let rank: f64 = row.get(1)?;
                Ok((row.get::<_, String>(0)?, 1.0 / (1.0 + rank.abs()) as f32))
            })?
            .collect()
        })
    }

    /// Same as [`Store::fts_search_entities`] but over observation text,
    /// returning the owning `entity_id` rather than the observation id.
    pub fn fts_search_observations(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT o.entity_id, bm25(observations_fts) AS rank
                 FROM observations_fts
                 JOIN observations o ON o.id = observations_fts.id
                 WHERE observations_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )?;
            stmt.query_map(params![fts_query(query), limit as i64], |row| {
                let rank: f64 = row.get(1)?;
                Ok((row.get::<_, String>(0)?, 1.0 / (1.0 + rank.abs()) as f32))
            })?
            .collect()
        })
    }

    // ---------------------------------------------------------------
    // MinHash LSH
    // ---------------------------------------------------------------

    pub fn upsert_minhash(
        &self,
        scope: &str,
        record_id: &str,
        entity_id: Option<&str>,
        signature: &MinHashSignature,
    ) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO minhash_signatures (scope, record_id, entity_id, signature)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scope, record_id) DO UPDATE SET
                    entity_id = excluded.entity_id, signature = excluded.signature",
                params![scope, record_id, entity_id, signature.to_bytes()],
            )?;
            Ok(())
        })
    }

    /// LSH candidates within `scope`, optionally restricted to `entity_id`
    /// (the dedup-on-`add_observation` use case scopes to one entity).
    pub fn lsh_candidates(
        &self,
        scope: &str,
        entity_id: Option<&str>,
        query: &MinHashSignature,
        config: &crate::config::LshConfig,
    ) -> Result<Vec<LshCandidate>> {
        let rows: Vec<(String, MinHashSignature)> = self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT record_id, signature FROM minhash_signatures
                 WHERE scope = ?1 AND (?2 IS NULL OR entity_id = ?2)",
            )?;
            stmt.query_map(params![scope, entity_id], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, String>(0)?, MinHashSignature::from_bytes(&bytes)))
            })?
            .collect()
        })?;
        Ok(crate::storage::lsh::rank_candidates(query, &rows, config))
    }

    // ---------------------------------------------------------------
    // Search cache
    // ---------------------------------------------------------------

    pub fn cache_get(&self, query_hash: &str) -> Result<Option<SearchCacheEntry>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT query_hash, query_text, results, options, query_embedding, created_at
                 FROM search_cache WHERE query_hash = ?1",
                params![query_hash],
                row_to_cache_entry,
            )
            .optional()
        })
    }

    /// Cache-store is best-effort: write failures are swallowed by the
    /// caller, not propagated, per the retriever's failure contract.
    pub fn cache_put(&self, entry: &SearchCacheEntry) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO search_cache (query_hash, query_text, results, options,
                    query_embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(query_hash) DO UPDATE SET
                    query_text = excluded.query_text, results = excluded.results,
                    options = excluded.options, query_embedding = excluded.query_embedding,
                    created_at = excluded.created_at",
                params![
                    entry.query_hash,
                    entry.query_text,
                    entry.results.to_string(),
                    entry.options.to_string(),
                    f32_blob(&entry.query_embedding),
                    entry.created_at,
                ],
            )?;
            Ok(())
        })?;
        #[cfg(feature = "vector-search")]
        self.upsert_vector(
            crate::storage::vector::SEARCH_CACHE,
            &entry.query_hash,
            &entry.query_embedding,
        )?;
        Ok(())
    }

    /// Delete cache rows older than `now_seconds - ttl_seconds`; runs
    /// unconditionally as part of janitor sweeps.
    pub fn cache_gc(&self, now_seconds: i64, ttl_seconds: i64) -> Result<usize> {
        let cutoff = now_seconds - ttl_seconds;
        let ids: Vec<String> = self.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT query_hash FROM search_cache WHERE created_at < ?1")?;
            stmt.query_map(params![cutoff], |row| row.get(0))?.collect()
        })?;
        self.with_writer(|conn| {
            conn.execute("DELETE FROM search_cache WHERE created_at < ?1", params![cutoff])
        })?;
        #[cfg(feature = "vector-search")]
        for id in &ids {
            let _ = self.remove_vector(crate::storage::vector::SEARCH_CACHE, id);
        }
        Ok(ids.len())
    }

    // ---------------------------------------------------------------
    // Graph analytics persistence
    // ---------------------------------------------------------------

    pub fn get_entity_rank(&self, entity_id: &str) -> Result<Option<f64>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT pagerank FROM entity_rank WHERE entity_id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Wholesale rewrite: concurrent retrievals see either the prior or new
    /// snapshot but never a mixture.
    pub fn set_entity_ranks(&self, ranks: &[(String, f64)]) -> Result<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM entity_rank", [])?;
            for (id, rank) in ranks {
                tx.execute(
                    "INSERT INTO entity_rank (entity_id, pagerank) VALUES (?1, ?2)",
                    params![id, rank],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_entity_community(&self, entity_id: &str) -> Result<Option<i64>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT community_id FROM entity_community WHERE entity_id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn set_entity_communities(&self, communities: &[(String, i64)]) -> Result<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM entity_community", [])?;
            for (id, community) in communities {
                tx.execute(
                    "INSERT INTO entity_community (entity_id, community_id) VALUES (?1, ?2)",
                    params![id, community],
                )?;
            }
            Ok(())
        })
    }

    pub fn all_communities(&self) -> Result<Vec<(String, i64)>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT entity_id, community_id FROM entity_community")?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect()
        })
    }

    // ---------------------------------------------------------------
    // Inference rules
    // ---------------------------------------------------------------

    /// Validates the rule's result shape is exactly `(from_id, to_id,
    /// relation_type, confidence, reason)` before persisting it.
    pub fn insert_inference_rule(&self, rule: &InferenceRule) -> Result<()> {
        let column_count = self.with_reader(|conn| {
            let sql = rule.datalog.replace("$id", "?1");
            let stmt = conn.prepare(&sql)?;
            Ok(stmt.column_count())
        })?;
        if column_count != crate::model::RULE_RESULT_COLUMNS.len() {
            return Err(CoreError::InvalidInput(format!(
                "rule '{}' must return exactly {:?}, got {} columns",
                rule.name,
                crate::model::RULE_RESULT_COLUMNS,
                column_count
            )));
        }

        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO inference_rule (id, name, datalog, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![rule.id, rule.name, rule.datalog, rule.created_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn list_inference_rules(&self) -> Result<Vec<InferenceRule>> {
        self.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, datalog, created_at FROM inference_rule")?;
            stmt.query_map([], |row| {
                let created_at: String = row.get(3)?;
                Ok(InferenceRule {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    datalog: row.get(2)?,
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect()
        })
    }

    /// Run a custom rule's SQL (the `datalog` text, bound with `$id`) and
    /// validate the returned shape is exactly `(from_id, to_id,
    /// relation_type, confidence, reason)`.
    pub fn run_inference_rule(&self, rule: &InferenceRule, entity_id: &str) -> Result<Vec<(String, String, String, f64, String)>> {
        self.with_reader(|conn| {
            let sql = rule.datalog.replace("$id", "?1");
            let mut stmt = conn.prepare(&sql)?;
            let column_count = stmt.column_count();
            if column_count != 5 {
                return Err(rusqlite::Error::InvalidColumnIndex(column_count));
            }
            stmt.query_map(params![entity_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect()
        })
    }

    // ---------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------

    pub fn counts(&self) -> Result<(i64, i64, i64)> {
        self.with_reader(|conn| {
            let entities: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT id) FROM entities e WHERE valid_asserted = 1
                 AND valid_ts_micros = (SELECT MAX(valid_ts_micros) FROM entities WHERE id = e.id)",
                [],
                |row| row.get(0),
            )?;
            let observations: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT id) FROM observations o WHERE valid_asserted = 1
                 AND valid_ts_micros = (SELECT MAX(valid_ts_micros) FROM observations WHERE id = o.id)",
                [],
                |row| row.get(0),
            )?;
            let relationships: i64 = conn.query_row(
                "SELECT COUNT(*) FROM relationships r WHERE valid_asserted = 1
                 AND valid_ts_micros = (SELECT MAX(valid_ts_micros) FROM relationships
                    WHERE from_id = r.from_id AND to_id = r.to_id AND relation_type = r.relation_type)",
                [],
                |row| row.get(0),
            )?;
            Ok((entities, observations, relationships))
        })
    }

    /// Run every step as one atomic SQL transaction — every statement
    /// commits or none do — for `mutate_memory`'s `run_transaction` action.
    ///
    /// Name-uniqueness/self-loop/empty-text validation happens before the
    /// transaction opens, the same benign-race tradeoff `insert_entity`
    /// already makes against `self.reader` rather than holding the writer
    /// lock across a read-then-write. Vector-index upserts happen after
    /// commit, mirroring `insert_entity`/`insert_observation`'s existing
    /// split between the SQL write and the separately-locked HNSW index.
    pub fn run_transaction(
        &self,
        steps: &[TransactionStep],
    ) -> Result<Vec<TransactionStepOutcome>> {
        for step in steps {
            match step {
                TransactionStep::CreateEntity(e) => {
                    if e.name.trim().is_empty() || e.entity_type.trim().is_empty() {
                        return Err(CoreError::InvalidInput(
                            "entity name and type must be non-empty".into(),
                        ));
                    }
                    if e.is_active_status() && e.is_discontinued_status() {
                        return Err(CoreError::Conflict(
                            "entity metadata.status cannot be both active and discontinued".into(),
                        ));
                    }
                    if let Some(existing) = self.get_entity_by_name(&e.name, None)? {
                        if existing.id != e.id {
                            return Err(CoreError::Conflict(format!(
                                "entity name '{}' already in use by live entity {}",
                                e.name, existing.id
                            )));
                        }
                    }
                }
                TransactionStep::AddObservation(o) => {
                    if o.text.trim().is_empty() {
                        return Err(CoreError::InvalidInput(
                            "observation text must be non-empty".into(),
                        ));
                    }
                }
                TransactionStep::CreateRelation(r) => {
                    if r.is_self_loop() {
                        return Err(CoreError::Conflict(
                            "relationship cannot be a self-loop".into(),
                        ));
                    }
                }
            }
        }

        let outcomes = self.transaction(|tx| {
            let mut outcomes = Vec::with_capacity(steps.len());
            for step in steps {
                match step {
                    TransactionStep::CreateEntity(e) => {
                        let metadata_json = serde_json::to_string(&Into::<serde_json::Value>::into(
                            e.metadata.clone(),
                        ))
                        .map_err(|err| CoreError::InvalidInput(format!("invalid metadata: {err}")))?;
                        tx.execute(
                            "INSERT INTO entities (id, name, type, metadata, content_embedding,
                                name_embedding, valid_ts_micros, valid_asserted, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                            params![
                                e.id,
                                e.name,
                                e.entity_type,
                                metadata_json,
                                e.content_embedding.as_ref().map(|v| f32_blob(v)),
                                e.name_embedding.as_ref().map(|v| f32_blob(v)),
                                e.validity.timestamp_micros,
                                e.validity.asserted as i64,
                                e.created_at.to_rfc3339(),
                                e.updated_at.to_rfc3339(),
                            ],
                        )?;
                        tx.execute(
                            "INSERT INTO entities_fts (id, name) VALUES (?1, ?2)",
                            params![e.id, e.name],
                        )?;
                        outcomes.push(TransactionStepOutcome::EntityCreated(e.id.clone()));
                    }
                    TransactionStep::AddObservation(o) => {
                        let metadata_json = serde_json::to_string(&Into::<serde_json::Value>::into(
                            o.metadata.clone(),
                        ))
                        .map_err(|err| CoreError::InvalidInput(format!("invalid metadata: {err}")))?;
                        tx.execute(
                            "INSERT INTO observations (id, entity_id, text, embedding, metadata,
                                valid_ts_micros, valid_asserted, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                            params![
                                o.id,
                                o.entity_id,
                                o.text,
                                o.embedding.as_ref().map(|v| f32_blob(v)),
                                metadata_json,
                                o.validity.timestamp_micros,
                                o.validity.asserted as i64,
                                o.created_at.to_rfc3339(),
                                o.updated_at.to_rfc3339(),
                            ],
                        )?;
                        tx.execute(
                            "INSERT INTO observations_fts (id, text) VALUES (?1, ?2)",
                            params![o.id, o.text],
                        )?;
                        outcomes.push(TransactionStepOutcome::ObservationAdded(o.id.clone()));
                    }
                    TransactionStep::CreateRelation(r) => {
                        let metadata_json = serde_json::to_string(&Into::<serde_json::Value>::into(
                            r.metadata.clone(),
                        ))
                        .map_err(|err| CoreError::InvalidInput(format!("invalid metadata: {err}")))?;
                        tx.execute(
                            "INSERT INTO relationships (from_id, to_id, relation_type, strength,
                                metadata, valid_ts_micros, valid_asserted, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                            params![
                                r.from_id,
                                r.to_id,
                                r.relation_type,
                                r.strength,
                                metadata_json,
                                r.validity.timestamp_micros,
                                r.validity.asserted as i64,
                                r.created_at.to_rfc3339(),
                                r.updated_at.to_rfc3339(),
                            ],
                        )?;
                        outcomes.push(TransactionStepOutcome::RelationCreated {
                            from_id: r.from_id.clone(),
                            to_id: r.to_id.clone(),
                            relation_type: r.relation_type.clone(),
                        });
                    }
                }
            }
            Ok(outcomes)
        })?;

        #[cfg(feature = "vector-search")]
        for step in steps {
            match step {
                TransactionStep::CreateEntity(e) => {
                    if let Some(v) = &e.content_embedding {
                        self.upsert_vector_entity_content(&e.entity_type, &e.id, v)?;
                    }
                    if let Some(v) = &e.name_embedding {
                        self.upsert_vector(crate::storage::vector::ENTITY_NAME, &e.id, v)?;
                    }
                }
                TransactionStep::AddObservation(o) => {
                    if let Some(v) = &o.embedding {
                        self.upsert_vector(crate::storage::vector::OBSERVATION_CONTENT, &o.id, v)?;
                    }
                }
                TransactionStep::CreateRelation(_) => {}
            }
        }

        Ok(outcomes)
    }

    /// Wipe every user-visible relation and sidecar index, for
    /// `manage_system`'s `clear_memory` action. The schema itself (tables,
    /// FTS shadow tables) is left in place.
    pub fn clear_all(&self) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute_batch(
                "DELETE FROM entities;
                 DELETE FROM observations;
                 DELETE FROM relationships;
                 DELETE FROM entity_community;
                 DELETE FROM entity_rank;
                 DELETE FROM inference_rule;
                 DELETE FROM search_cache;
                 DELETE FROM minhash_signatures;
                 DELETE FROM memory_snapshot;
                 DELETE FROM entities_fts;
                 DELETE FROM observations_fts;",
            )?;
            Ok(())
        })?;

        #[cfg(feature = "vector-search")]
        {
            let mut vectors = self.vectors.lock().map_err(|_| poisoned("vector index"))?;
            *vectors = VectorIndexSet::new(self.config.hnsw.clone())
                .map_err(|e| CoreError::Fatal(format!("failed to rebuild vector indexes: {e}")))?;
        }

        Ok(())
    }

    pub fn insert_snapshot(&self, snapshot: &crate::model::MemorySnapshot) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO memory_snapshot (id, entity_count, observation_count,
                    relationship_count, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.id,
                    snapshot.entity_count,
                    snapshot.observation_count,
                    snapshot.relationship_count,
                    serde_json::Value::from(snapshot.metadata.clone()).to_string(),
                    snapshot.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_snapshots(&self) -> Result<Vec<crate::model::MemorySnapshot>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_count, observation_count, relationship_count, metadata, created_at
                 FROM memory_snapshot ORDER BY created_at ASC",
            )?;
            stmt.query_map([], row_to_snapshot)?.collect()
        })
    }

    pub fn get_snapshot(&self, id: &str) -> Result<Option<crate::model::MemorySnapshot>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT id, entity_count, observation_count, relationship_count, metadata, created_at
                 FROM memory_snapshot WHERE id = ?1",
                params![id],
                row_to_snapshot,
            )
            .optional()
        })
    }
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<crate::model::MemorySnapshot> {
    let metadata_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(crate::model::MemorySnapshot {
        id: row.get(0)?,
        entity_count: row.get(1)?,
        observation_count: row.get(2)?,
        relationship_count: row.get(3)?,
        metadata: parse_metadata(&metadata_json),
        created_at: parse_rfc3339(&created_at),
    })
}

fn fts_query(query: &str) -> String {
    // Quote the raw query so FTS5 special characters in user input (", *,
    // NEAR, column filters) are treated as literal text, not query syntax.
    format!("\"{}\"", query.replace('"', "\"\""))
}

fn f32_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn parse_metadata(json_text: &str) -> Metadata {
    serde_json::from_str::<serde_json::Value>(json_text)
        .map(Metadata::from)
        .unwrap_or_default()
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let metadata_json: String = row.get(3)?;
    let content_embedding: Option<Vec<u8>> = row.get(4)?;
    let name_embedding: Option<Vec<u8>> = row.get(5)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        metadata: parse_metadata(&metadata_json),
        content_embedding: content_embedding.map(|b| blob_to_f32(&b)),
        name_embedding: name_embedding.map(|b| blob_to_f32(&b)),
        validity: Validity {
            timestamp_micros: row.get(6)?,
            asserted: row.get::<_, i64>(7)? != 0,
        },
        created_at: parse_rfc3339(&row.get::<_, String>(8)?),
        updated_at: parse_rfc3339(&row.get::<_, String>(9)?),
    })
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    let embedding: Option<Vec<u8>> = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    Ok(Observation {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        text: row.get(2)?,
        embedding: embedding.map(|b| blob_to_f32(&b)),
        metadata: parse_metadata(&metadata_json),
        validity: Validity {
            timestamp_micros: row.get(5)?,
            asserted: row.get::<_, i64>(6)? != 0,
        },
        created_at: parse_rfc3339(&row.get::<_, String>(7)?),
        updated_at: parse_rfc3339(&row.get::<_, String>(8)?),
    })
}

fn row_to_relationship(row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
    let metadata_json: String = row.get(4)?;
    Ok(Relationship {
        from_id: row.get(0)?,
        to_id: row.get(1)?,
        relation_type: row.get(2)?,
        strength: row.get(3)?,
        metadata: parse_metadata(&metadata_json),
        validity: Validity {
            timestamp_micros: row.get(5)?,
            asserted: row.get::<_, i64>(6)? != 0,
        },
        created_at: parse_rfc3339(&row.get::<_, String>(7)?),
        updated_at: parse_rfc3339(&row.get::<_, String>(8)?),
    })
}

fn row_to_cache_entry(row: &rusqlite::Row) -> rusqlite::Result<SearchCacheEntry> {
    let results: String = row.get(2)?;
    let options: String = row.get(3)?;
    let embedding: Option<Vec<u8>> = row.get(4)?;
    Ok(SearchCacheEntry {
        query_hash: row.get(0)?,
        query_text: row.get(1)?,
        results: serde_json::from_str(&results).unwrap_or(serde_json::Value::Null),
        options: serde_json::from_str(&options).unwrap_or(serde_json::Value::Null),
        query_embedding: embedding.map(|b| blob_to_f32(&b)).unwrap_or_default(),
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open(None, Config::with_dimensions(8)).unwrap()
    }

    #[test]
    fn insert_and_get_entity_roundtrips() {
        let s = store();
        let e = Entity::new("Alice", "Person");
        s.insert_entity(&e).unwrap();
        let fetched = s.get_entity(&e.id, None).unwrap().unwrap();
        assert_eq!(fetched.name, "Alice");
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let s = store();
        s.insert_entity(&Entity::new("Bob", "Person")).unwrap();
        let dup = Entity::new("bob", "Person");
        let err = s.insert_entity(&dup).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn retracted_entity_is_not_live() {
        let s = store();
        let e = Entity::new("Carol", "Person");
        s.insert_entity(&e).unwrap();
        s.retract_entity(&e.id).unwrap();
        assert!(s.get_entity(&e.id, None).unwrap().is_none());
    }

    #[test]
    fn self_loop_relationship_is_rejected() {
        let s = store();
        let e = Entity::new("Dana", "Person");
        s.insert_entity(&e).unwrap();
        let rel = Relationship::new(&e.id, &e.id, "knows");
        let err = s.insert_relationship(&rel).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn neighbors_finds_one_hop_relation() {
        let s = store();
        let a = Entity::new("A", "Person");
        let b = Entity::new("B", "Person");
        s.insert_entity(&a).unwrap();
        s.insert_entity(&b).unwrap();
        s.insert_relationship(&Relationship::new(&a.id, &b.id, "knows"))
            .unwrap();
        let neighbors = s.neighbors(&a.id, 1, None).unwrap();
        assert!(neighbors.iter().any(|(id, depth)| id == &b.id && *depth == 1));
    }

    #[test]
    fn fts_search_finds_entity_by_name() {
        let s = store();
        let e = Entity::new("Quantum Rollout", "Project");
        s.insert_entity(&e).unwrap();
        let hits = s.fts_search_entities("quantum", 10).unwrap();
        assert!(hits.iter().any(|(id, _)| id == &e.id));
    }

    #[test]
    fn cache_gc_evicts_expired_entries() {
        let s = store();
        let entry = SearchCacheEntry::new(
            "hash1",
            "query",
            serde_json::json!([]),
            serde_json::json!({}),
            vec![0.0; 8],
            100,
        );
        s.cache_put(&entry).unwrap();
        let evicted = s.cache_gc(1_000_000, 10).unwrap();
        assert_eq!(evicted, 1);
        assert!(s.cache_get("hash1").unwrap().is_none());
    }
}
