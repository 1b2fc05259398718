//! Data model
//!
//! The record types the Store persists and every other component consumes
//! through it. All records carry a [`validity::Validity`] stamp; the
//! invariants named for each type (name uniqueness, self-loop rejection,
//! status exclusivity) are enforced by `storage::Store`'s insert path, not
//! by construction here — construction stays a plain data builder that
//! doesn't consult the rest of the store.

pub mod cache;
pub mod community;
pub mod entity;
pub mod metadata;
pub mod observation;
pub mod relationship;
pub mod rules;
pub mod snapshot;
pub mod validity;

pub use cache::SearchCacheEntry;
pub use community::{EntityCommunity, EntityRank};
pub use entity::Entity;
pub use metadata::Value as Metadata;
pub use observation::Observation;
pub use relationship::Relationship;
pub use rules::{InferenceRule, RULE_RESULT_COLUMNS};
pub use snapshot::{MemorySnapshot, SnapshotDiff};
pub use validity::Validity;

/// Entity types with a dedicated type-filtered HNSW partition on
/// `entity.embedding`.
pub const VECTOR_PARTITIONED_TYPES: [&str; 4] = ["Person", "Project", "Task", "Note"];
