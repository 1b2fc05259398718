//! Reciprocal Rank Fusion
//!
//! N weighted sources, each contributing `w_s / (k + rank_s)` per
//! candidate, summed across sources, with provenance recorded for each id.

use std::collections::HashMap;

/// One named candidate source's ranked results, going into fusion.
pub struct RankedSource<'a> {
    pub name: &'a str,
    pub weight: f32,
    /// Results in rank order (rank 0 is the top hit).
    pub results: &'a [(String, f32)],
}

/// A fused candidate: summed RRF score plus which sources contributed.
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub id: String,
    pub score: f32,
    pub sources: Vec<String>,
}

/// Fuse N weighted ranked sources via RRF (`k` is the fusion constant, 60
/// by default). Results are sorted by descending score;
/// callers apply their own tie-break (e.g. by `created_at`) afterward since
/// this function has no access to record metadata.
pub fn reciprocal_rank_fusion(sources: &[RankedSource], k: f32) -> Vec<FusedResult> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut provenance: HashMap<String, Vec<String>> = HashMap::new();

    for source in sources {
        for (rank, (id, _source_score)) in source.results.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += source.weight / (k + rank as f32);
            provenance
                .entry(id.clone())
                .or_default()
                .push(source.name.to_string());
        }
    }

    let mut fused: Vec<FusedResult> = scores
        .into_iter()
        .map(|(id, score)| FusedResult {
            sources: provenance.remove(&id).unwrap_or_default(),
            id,
            score,
        })
        .collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_in_multiple_sources_outranks_single_source_hit() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.8)];
        let fts = vec![("a".to_string(), 5.0)];
        let sources = vec![
            RankedSource { name: "dense", weight: 0.5, results: &dense },
            RankedSource { name: "fts", weight: 0.5, results: &fts },
        ];
        let fused = reciprocal_rank_fusion(&sources, 60.0);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[0].sources.len(), 2);
    }

    #[test]
    fn empty_sources_yield_empty_result() {
        let fused = reciprocal_rank_fusion(&[], 60.0);
        assert!(fused.is_empty());
    }
}
