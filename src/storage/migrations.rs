//! Database migrations
//!
//! Versioned, idempotent schema for the core's six user-visible tables plus
//! the inference-rule and search-cache sidecars. Every statement uses `IF
//! NOT EXISTS` so re-declaring the same schema is a no-op, per the Store's
//! contract that schema operations never fail on "already exists".

/// Ordered migration list. Applied in order above whatever version is
/// already recorded in `schema_version`.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: entities, observations, relationships",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Graph analytics sidecars: entity_community, entity_rank",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Inference rules, search cache, memory snapshots",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "FTS5 virtual tables on entity.name and observation.text",
        up: MIGRATION_V4_UP,
    },
    Migration {
        version: 5,
        description: "MinHash LSH signature table for near-duplicate detection",
        up: MIGRATION_V5_UP,
    },
];

/// A single schema migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    content_embedding BLOB,
    name_embedding BLOB,
    valid_ts_micros INTEGER NOT NULL,
    valid_asserted INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (id, valid_ts_micros)
);

CREATE INDEX IF NOT EXISTS idx_entities_id ON entities(id);
CREATE INDEX IF NOT EXISTS idx_entities_name_lower ON entities(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type);

CREATE TABLE IF NOT EXISTS observations (
    id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB,
    metadata TEXT NOT NULL DEFAULT '{}',
    valid_ts_micros INTEGER NOT NULL,
    valid_asserted INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (id, valid_ts_micros)
);

CREATE INDEX IF NOT EXISTS idx_observations_id ON observations(id);
CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(entity_id);
CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at);

CREATE TABLE IF NOT EXISTS relationships (
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 1.0,
    metadata TEXT NOT NULL DEFAULT '{}',
    valid_ts_micros INTEGER NOT NULL,
    valid_asserted INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, relation_type, valid_ts_micros)
);

CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_id);
CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_id);
CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(relation_type);

UPDATE schema_version SET version = 1, applied_at = datetime('now')
WHERE version < 1;
INSERT INTO schema_version (version)
SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS entity_community (
    entity_id TEXT PRIMARY KEY,
    community_id INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entity_community_community ON entity_community(community_id);

CREATE TABLE IF NOT EXISTS entity_rank (
    entity_id TEXT PRIMARY KEY,
    pagerank REAL NOT NULL DEFAULT 0.0
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS inference_rule (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    datalog TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search_cache (
    query_hash TEXT PRIMARY KEY,
    query_text TEXT NOT NULL,
    results TEXT NOT NULL,
    options TEXT NOT NULL,
    query_embedding BLOB,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_search_cache_created ON search_cache(created_at);

CREATE TABLE IF NOT EXISTS memory_snapshot (
    id TEXT PRIMARY KEY,
    entity_count INTEGER NOT NULL,
    observation_count INTEGER NOT NULL,
    relationship_count INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

const MIGRATION_V4_UP: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
    id UNINDEXED,
    name,
    tokenize = 'porter unicode61'
);

CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
    id UNINDEXED,
    text,
    tokenize = 'porter unicode61'
);

UPDATE schema_version SET version = 4, applied_at = datetime('now');
"#;

const MIGRATION_V5_UP: &str = r#"
CREATE TABLE IF NOT EXISTS minhash_signatures (
    scope TEXT NOT NULL,
    record_id TEXT NOT NULL,
    entity_id TEXT,
    signature BLOB NOT NULL,
    PRIMARY KEY (scope, record_id)
);

CREATE INDEX IF NOT EXISTS idx_minhash_scope_entity ON minhash_signatures(scope, entity_id);

UPDATE schema_version SET version = 5, applied_at = datetime('now');
"#;

/// Current schema version recorded in `schema_version`, or 0 if unset.
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply every migration newer than the current recorded version.
///
/// Migrations run inside `execute_batch`, which tolerates multi-statement
/// SQL. A migration that only adds `IF NOT EXISTS` objects to an
/// already-current schema is a no-op other than the version bump.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> rusqlite::Connection {
        rusqlite::Connection::open_in_memory().unwrap()
    }

    #[test]
    fn applies_every_migration_from_scratch() {
        let conn = open();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len() as u32);
        assert_eq!(get_current_version(&conn).unwrap(), 5);
    }

    #[test]
    fn reapplying_is_a_noop() {
        let conn = open();
        apply_migrations(&conn).unwrap();
        let applied_again = apply_migrations(&conn).unwrap();
        assert_eq!(applied_again, 0);
    }
}
