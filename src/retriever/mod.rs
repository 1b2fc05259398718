//! Hybrid retrieval: dense vectors, lexical search, graph expansion, and
//! PageRank priors fused by Reciprocal Rank Fusion, sitting behind a
//! two-tier result cache.

pub mod cache;
pub mod pipeline;
pub mod rrf;

pub use pipeline::{
    AdvancedSearchOptions, GraphConstraints, Retriever, SearchOptions, SearchResultRow, Source,
};
