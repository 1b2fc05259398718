//! Top-level configuration
//!
//! One small `Default`-impl struct per component, composed into [`Config`]
//! rather than one monolithic settings blob.

use std::time::Duration;

/// HNSW parameters shared by every named vector index.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Vector dimensionality. Must match whatever the embedding provider
    /// produces; fixed at Store construction.
    pub dimensions: usize,
    /// HNSW connectivity (`m`).
    pub m: usize,
    /// Expansion factor while building the index.
    pub ef_construction: usize,
    /// Default expansion factor while searching (queries may override).
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimensions: 1024,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Lexical full-text search configuration.
#[derive(Debug, Clone)]
pub struct FtsConfig {
    /// Tokenizer language. Only `"english"` is implemented; externalized so
    /// a future vocabulary can be swapped in without touching call sites.
    pub language: String,
}

impl Default for FtsConfig {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
        }
    }
}

/// MinHash LSH configuration for near-duplicate detection.
#[derive(Debug, Clone)]
pub struct LshConfig {
    /// Shingle size in characters.
    pub n_gram: usize,
    /// Number of hash permutations (MinHash signature length).
    pub n_perm: usize,
    /// Target Jaccard similarity threshold for a duplicate flag.
    pub jaccard_threshold: f64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            n_gram: 3,
            n_perm: 200,
            jaccard_threshold: 0.5,
        }
    }
}

/// Embedding cache and serialization configuration.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Maximum number of cached embeddings.
    pub cache_size: usize,
    /// Cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Timeout for a single `embed` call.
    pub timeout: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            cache_ttl: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result-cache TTL and RRF fusion weights.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Result cache time-to-live.
    pub cache_ttl: Duration,
    /// Exact-cache-miss semantic probe similarity threshold.
    pub semantic_cache_threshold: f32,
    /// RRF fusion constant `k`.
    pub rrf_k: f32,
    /// Per-source RRF weights, summing to 1.0 by default.
    pub weights: RrfWeights,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 24 * 3600),
            semantic_cache_threshold: 0.95,
            rrf_k: 60.0,
            weights: RrfWeights::default(),
        }
    }
}

/// Per-source RRF weights. Defaults sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct RrfWeights {
    pub dense_content: f32,
    pub dense_name: f32,
    pub fts_entity: f32,
    pub fts_observation: f32,
    pub dense_observation: f32,
    pub graph: f32,
}

impl Default for RrfWeights {
    fn default() -> Self {
        Self {
            dense_content: 0.3,
            dense_name: 0.2,
            fts_entity: 0.2,
            fts_observation: 0.15,
            dense_observation: 0.1,
            graph: 0.05,
        }
    }
}

/// Janitor (memory consolidation) defaults.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// LLM summarization timeout.
    pub llm_timeout: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(120),
        }
    }
}

/// Graph analytics defaults.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// PageRank damping factor.
    pub pagerank_damping: f64,
    /// Maximum iterations for any fixed-point algorithm (PageRank, HITS,
    /// label propagation).
    pub max_iterations: usize,
    /// Convergence tolerance for fixed-point algorithms.
    pub tolerance: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            pagerank_damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Top-level configuration composing every component's settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub hnsw: HnswConfig,
    pub fts: FtsConfig,
    pub lsh: LshConfig,
    pub embedder: EmbedderConfig,
    pub retriever: RetrieverConfig,
    pub janitor: JanitorConfig,
    pub analytics: AnalyticsConfig,
}

impl Config {
    /// Construct with a specific embedding dimension, leaving the rest at
    /// their documented defaults.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            hnsw: HnswConfig {
                dimensions,
                ..HnswConfig::default()
            },
            ..Self::default()
        }
    }
}
