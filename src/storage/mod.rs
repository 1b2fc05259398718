//! Storage
//!
//! The Store is the sole owner of every persisted record: point/range scans
//! with a validity predicate, ANN search over named HNSW indexes, FTS
//! search, MinHash LSH candidates, and recursive graph joins, all over one
//! SQLite connection pair.

pub mod lsh;
pub mod migrations;
pub mod store;

#[cfg(feature = "vector-search")]
pub mod vector;

pub use store::{Store, TransactionStep, TransactionStepOutcome};

// Named vector indexes, re-exported at the module's top level so callers
// (the retriever's candidate sources) can name an index without depending on
// the `vector-search` feature being enabled — `Store::ann_search` already
// degrades to an empty result set when it isn't.
#[cfg(feature = "vector-search")]
pub use vector::{ENTITY_CONTENT, ENTITY_NAME, OBSERVATION_CONTENT, SEARCH_CACHE};

#[cfg(not(feature = "vector-search"))]
pub const ENTITY_CONTENT: &str = "entity.embedding";
#[cfg(not(feature = "vector-search"))]
pub const ENTITY_NAME: &str = "entity.name_embedding";
#[cfg(not(feature = "vector-search"))]
pub const OBSERVATION_CONTENT: &str = "observation.embedding";
#[cfg(not(feature = "vector-search"))]
pub const SEARCH_CACHE: &str = "search_cache.embedding";
