//! # synapstore-core
//!
//! A bitemporal temporal knowledge graph and hybrid retrieval engine for
//! agentic memory. Entities, observations, and relationships are never
//! overwritten in place — every mutation appends a new validity-stamped row,
//! so the store can answer "what did we believe as of time T" as readily as
//! "what do we believe now."
//!
//! The crate is organized around one collaborator per concern, composed by
//! the [`api::Memory`] façade:
//!
//! - [`storage`] — the sole owner of persisted state: SQLite point/range
//!   scans with a validity predicate, FTS5 lexical search, MinHash LSH
//!   candidates, and (with `vector-search`) per-field HNSW ANN indexes.
//! - [`embeddings`] — the `EmbeddingProvider` seam and its caching wrapper,
//!   [`embeddings::Embedder`].
//! - [`retriever`] — RRF fusion of dense, lexical, and graph candidate
//!   sources behind a two-tier result cache, plus graph-RAG and
//!   similarity-guided graph walks.
//! - [`inference`] — relation inference strategies, HNSW-adjacent entity
//!   clustering, and semantic graph walking.
//! - [`analytics`] — PageRank, community detection, shortest paths,
//!   betweenness centrality, HITS, connected components, and bridges over
//!   the live relationship graph.
//! - [`janitor`] — age/degree-based consolidation of old, low-degree
//!   observations into hierarchical `ExecutiveSummary` entities.
//! - [`conflict`] — status-conflict detection and relation-evolution
//!   timelines, both read-only over the store.
//! - [`api`] — [`api::Memory`], the façade composing all of the above into
//!   the four action groups (`mutate_memory`, `query_memory`,
//!   `analyze_graph`, `manage_system`) an agent harness calls as tools.
//!
//! ## Feature Flags
//!
//! - `vector-search` (default): per-field HNSW ANN indexes via `usearch`.
//!   Disabled, the retriever and inference engine fall back to lexical and
//!   graph candidate sources only.
//! - `bundled-sqlite` (default): link a bundled SQLite rather than requiring
//!   one on the host system.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod config;
pub mod model;
pub mod storage;
pub mod embeddings;
pub mod retriever;
pub mod inference;
pub mod analytics;
pub mod janitor;
pub mod conflict;
pub mod api;

pub use error::{CoreError, Result};
pub use config::Config;
pub use api::Memory;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::api::{Memory, GLOBAL_USER_PROFILE_ID};
    pub use crate::config::Config;
    pub use crate::embeddings::{Embedder, EmbeddingProvider};
    pub use crate::error::{CoreError, Result};
    pub use crate::inference::InferenceEngine;
    pub use crate::janitor::{ConcatenationSummarizer, Janitor, JanitorRequest, SummarizationProvider};
    pub use crate::model::{Entity, Metadata, Observation, Relationship};
    pub use crate::retriever::{Retriever, SearchOptions};
    pub use crate::storage::Store;
}
