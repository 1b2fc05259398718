//! MinHash LSH near-duplicate detection
//!
//! Candidates-only near-duplicate detection over character n-grams,
//! hand-rolled since no off-the-shelf crate fits this exact scheme.

use std::collections::HashSet;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand::Rng;

use crate::config::LshConfig;

/// A MinHash signature: one minimum hash value per permutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature(pub Vec<u64>);

impl MinHashSignature {
    /// Estimated Jaccard similarity between two signatures of equal length,
    /// computed as the fraction of permutations where the two minima agree.
    pub fn estimated_jaccard(&self, other: &MinHashSignature) -> f64 {
        if self.0.is_empty() || self.0.len() != other.0.len() {
            return 0.0;
        }
        let agree = self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a == b)
            .count();
        agree as f64 / self.0.len() as f64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        MinHashSignature(
            bytes
                .chunks_exact(8)
                .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
                .collect(),
        )
    }
}

/// A deterministic family of permutation hash functions, seeded once so the
/// same text always yields the same signature within a process.
pub struct MinHasher {
    n_gram: usize,
    /// `(a, b)` coefficients for `hash'(x) = (a * x + b) mod PRIME`.
    coefficients: Vec<(u64, u64)>,
}

/// A large prime above `u32::MAX`, used as the MinHash modulus.
const MERSENNE_PRIME: u64 = (1u64 << 61) - 1;

impl MinHasher {
    pub fn new(config: &LshConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5357_5349); // fixed seed: deterministic signatures
        let coefficients = (0..config.n_perm)
            .map(|_| (rng.gen_range(1..MERSENNE_PRIME), rng.gen_range(0..MERSENNE_PRIME)))
            .collect();
        Self {
            n_gram: config.n_gram,
            coefficients,
        }
    }

    fn shingles(&self, text: &str) -> HashSet<u64> {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.len() < self.n_gram {
            return std::iter::once(hash_str(&chars.iter().collect::<String>())).collect();
        }
        chars
            .windows(self.n_gram)
            .map(|w| hash_str(&w.iter().collect::<String>()))
            .collect()
    }

    /// Compute the MinHash signature of `text`.
    pub fn signature(&self, text: &str) -> MinHashSignature {
        let shingles = self.shingles(text);
        let values = self
            .coefficients
            .iter()
            .map(|&(a, b)| {
                shingles
                    .iter()
                    .map(|&shingle| {
                        ((a.wrapping_mul(shingle).wrapping_add(b)) % MERSENNE_PRIME) as u64
                    })
                    .min()
                    .unwrap_or(0)
            })
            .collect();
        MinHashSignature(values)
    }
}

fn hash_str(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// A stored signature plus its owning record id, as the Store would return
/// candidates from `minhash_signatures`.
#[derive(Debug, Clone)]
pub struct LshCandidate {
    pub record_id: String,
    pub estimated_jaccard: f64,
}

/// Rank `candidates` by estimated Jaccard similarity against `query`,
/// keeping only those at or above `config.jaccard_threshold`.
pub fn rank_candidates(
    query: &MinHashSignature,
    candidates: &[(String, MinHashSignature)],
    config: &LshConfig,
) -> Vec<LshCandidate> {
    let mut out: Vec<LshCandidate> = candidates
        .iter()
        .map(|(id, sig)| LshCandidate {
            record_id: id.clone(),
            estimated_jaccard: query.estimated_jaccard(sig),
        })
        .filter(|c| c.estimated_jaccard >= config.jaccard_threshold)
        .collect();
    out.sort_by(|a, b| b.estimated_jaccard.total_cmp(&a.estimated_jaccard));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LshConfig {
        LshConfig {
            n_gram: 3,
            n_perm: 64,
            jaccard_threshold: 0.5,
        }
    }

    #[test]
    fn identical_text_has_identical_signature() {
        let hasher = MinHasher::new(&config());
        let a = hasher.signature("the quick brown fox");
        let b = hasher.signature("the quick brown fox");
        assert_eq!(a, b);
        assert_eq!(a.estimated_jaccard(&b), 1.0);
    }

    #[test]
    fn near_duplicate_text_scores_high_similarity() {
        let hasher = MinHasher::new(&config());
        let a = hasher.signature("met with bob about the q3 rollout plan");
        let b = hasher.signature("met with bob about the q3 rollout plans");
        assert!(a.estimated_jaccard(&b) > 0.8);
    }

    #[test]
    fn unrelated_text_scores_low_similarity() {
        let hasher = MinHasher::new(&config());
        let a = hasher.signature("met with bob about the q3 rollout plan");
        let b = hasher.signature("the weather in lisbon is unusually cold this week");
        assert!(a.estimated_jaccard(&b) < 0.3);
    }

    #[test]
    fn signature_roundtrips_through_bytes() {
        let hasher = MinHasher::new(&config());
        let sig = hasher.signature("roundtrip me");
        let bytes = sig.to_bytes();
        assert_eq!(MinHashSignature::from_bytes(&bytes), sig);
    }

    #[test]
    fn rank_candidates_filters_below_threshold() {
        let hasher = MinHasher::new(&config());
        let query = hasher.signature("met with bob about the rollout");
        let candidates = vec![
            ("near".to_string(), hasher.signature("met with bob about the rollouts")),
            ("far".to_string(), hasher.signature("completely different text entirely")),
        ];
        let ranked = rank_candidates(&query, &candidates, &config());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record_id, "near");
    }
}
