//! Embedder
//!
//! The embedding model itself is an external collaborator; the core
//! defines the contract — [`EmbeddingProvider`] — and wraps any
//! implementation with the serialization, caching, and pooling-strategy
//! selection a real model needs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use lru::LruCache;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::EmbedderConfig;
use crate::error::{CoreError, Result};

/// An external text-to-vector callable. Implementations must return a unit
/// (L2-normalized) vector of a fixed dimension for every call.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`. Implementations should return the zero vector rather
    /// than erroring on genuinely empty input; [`Embedder::embed`] already
    /// short-circuits on an empty string before calling through.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The provider's output dimensionality.
    fn dimensions(&self) -> usize;

    /// A stable identifier for the underlying model, consulted to select a
    /// pooling strategy (e.g. containing `"Qwen3-Embedding"`).
    fn model_id(&self) -> &str;
}

/// Pooling strategy, selected from the provider's `model_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Mean pooling with attention-mask weighting — the default for
    /// non-instruction-tuned embedding models.
    MeanAttentionWeighted,
    /// Last-valid-token pooling, used for instruction-tuned models (model
    /// id containing `Qwen3-Embedding`).
    LastToken,
}

impl Pooling {
    /// Select a pooling strategy from a model id.
    pub fn for_model(model_id: &str) -> Self {
        if model_id.contains("Qwen3-Embedding") {
            Pooling::LastToken
        } else {
            Pooling::MeanAttentionWeighted
        }
    }
}

struct CachedVector {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Wraps an [`EmbeddingProvider`] with a serialized FIFO queue, an LRU+TTL
/// cache, and pooling-strategy selection.
pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    pooling: Pooling,
    config: EmbedderConfig,
    /// Single-flight queue: only one `embed` call proceeds at a time, since
    /// most providers wrap a single model instance that isn't safely
    /// reentrant.
    queue: AsyncMutex<()>,
    cache: StdMutex<LruCache<String, CachedVector>>,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>, config: EmbedderConfig) -> Self {
        let pooling = Pooling::for_model(provider.model_id());
        let capacity = NonZeroUsize::new(config.cache_size.max(1)).expect("cache_size clamped to >=1 above");
        Self {
            provider,
            pooling,
            config,
            queue: AsyncMutex::new(()),
            cache: StdMutex::new(LruCache::new(capacity)),
        }
    }

    pub fn pooling(&self) -> Pooling {
        self.pooling
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed `text`, using the LRU+TTL cache on hit, serializing through the
    /// FIFO queue on miss. Returns the zero vector for empty text or a
    /// failing provider call, so downstream cosine-similarity math stays
    /// total.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        if text.trim().is_empty() {
            return vec![0.0; self.dimensions()];
        }

        if let Some(cached) = self.cache_get(text) {
            return cached;
        }

        let _permit = self.queue.lock().await;
        // Re-check: another task may have populated the cache while we
        // waited for the queue.
        if let Some(cached) = self.cache_get(text) {
            return cached;
        }

        match self.provider.embed(text) {
            Ok(vector) => {
                let normalized = l2_normalize(vector);
                self.cache_put(text, normalized.clone());
                normalized
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding provider call failed, returning zero vector");
                vec![0.0; self.dimensions()]
            }
        }
    }

    /// Sequential calls through the same queue.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await);
        }
        out
    }

    fn cache_get(&self, text: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock().ok()?;
        let entry = cache.get(text)?;
        if entry.inserted_at.elapsed() < self.config.cache_ttl {
            Some(entry.vector.clone())
        } else {
            cache.pop(text);
            None
        }
    }

    fn cache_put(&self, text: &str, vector: Vec<f32>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                text.to_string(),
                CachedVector {
                    vector,
                    inserted_at: Instant::now(),
                },
            );
        }
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity between two unit vectors (undefined pairs return 0.0).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// A deterministic, hash-based embedding provider used for tests and as the
/// safe default when no production provider is wired — a stand-in for the
/// external callable boundary that doesn't require a ready model.
pub struct NullEmbeddingProvider {
    dimensions: usize,
}

impl NullEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for NullEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        let vector = (0..self.dimensions)
            .map(|i| {
                let mut h = DefaultHasher::new();
                (seed, i).hash(&mut h);
                (h.finish() as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0
            })
            .collect();
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "null-embedding-provider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> Embedder {
        Embedder::new(Box::new(NullEmbeddingProvider::new(16)), EmbedderConfig::default())
    }

    #[tokio::test]
    async fn empty_text_returns_zero_vector() {
        let e = embedder();
        let v = e.embed("").await;
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let e = embedder();
        let a = e.embed("hello world").await;
        let b = e.embed("hello world").await;
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn different_text_yields_different_vectors() {
        let e = embedder();
        let a = e.embed("alpha").await;
        let b = e.embed("beta").await;
        assert_ne!(a, b);
    }

    #[test]
    fn pooling_selects_last_token_for_qwen3() {
        assert_eq!(Pooling::for_model("Qwen3-Embedding-0.6B"), Pooling::LastToken);
        assert_eq!(
            Pooling::for_model("bge-large-en-v1.5"),
            Pooling::MeanAttentionWeighted
        );
    }

    #[test]
    fn cosine_similarity_of_identical_unit_vectors_is_one() {
        let v = l2_normalize(vec![1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }
}
