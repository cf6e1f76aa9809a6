//! Maximal-marginal-relevance selection over the fused ranking.
//!
//! Greedy MMR: each round picks the remaining candidate maximizing
//! `lambda * relevance - (1 - lambda) * max_similarity(candidate, selected)`,
//! with relevance the fused score normalized to [0, 1]. Candidates whose
//! similarity to an already-selected chunk exceeds the redundancy threshold
//! are deferred, and only re-admitted if honoring the threshold would leave
//! fewer than the requested number of results.

use std::collections::HashMap;

use crate::embeddings::cosine_similarity;
use crate::retrieval::fusion::FusedResult;
use crate::store::Chunk;

#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    pub lambda: f32,
    pub sim_threshold: f32,
}

/// Pairwise similarity: cosine when both chunks carry embeddings, token
/// overlap otherwise. Clamped to [0, 1] so dissimilarity never inflates the
/// marginal score.
fn chunk_similarity(a: Option<&Chunk>, b: Option<&Chunk>) -> f32 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let sim = match (a.embedding.as_deref(), b.embedding.as_deref()) {
        (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
        _ => crate::text::lexical_overlap(&a.text, &b.text),
    };
    sim.clamp(0.0, 1.0)
}

/// Select up to `k` chunks from the fused ranking. The first pick is always
/// the top fused candidate; output order is the selection order.
/// Deterministic for deterministic inputs.
pub fn select_diverse(
    fused: &[FusedResult],
    chunks: &HashMap<String, Chunk>,
    k: usize,
    params: &MmrParams,
) -> Vec<FusedResult> {
    if fused.is_empty() || k == 0 {
        return Vec::new();
    }
    if fused.len() == 1 {
        return vec![fused[0].clone()];
    }

    let (min, max) = fused
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), r| {
            (lo.min(r.score), hi.max(r.score))
        });
    let range = max - min;
    let relevance: Vec<f32> = fused
        .iter()
        .map(|r| if range > 0.0 { (r.score - min) / range } else { 1.0 })
        .collect();

    let chunk_of = |idx: usize| chunks.get(&fused[idx].id);

    let mut selected: Vec<usize> = vec![0];
    let mut remaining: Vec<usize> = (1..fused.len()).collect();
    let mut deferred: Vec<usize> = Vec::new();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos: Option<usize> = None;
        let mut best_score = f32::NEG_INFINITY;

        let mut i = 0;
        while i < remaining.len() {
            let cand = remaining[i];
            let max_sim = selected
                .iter()
                .map(|s| chunk_similarity(chunk_of(cand), chunk_of(*s)))
                .fold(0.0f32, f32::max);

            // max_sim only grows as the selection grows, so an
            // over-threshold candidate can be parked permanently.
            if max_sim > params.sim_threshold {
                deferred.push(cand);
                remaining.remove(i);
                continue;
            }

            let marginal = params.lambda * relevance[cand] - (1.0 - params.lambda) * max_sim;
            if marginal > best_score {
                best_score = marginal;
                best_pos = Some(i);
            }
            i += 1;
        }

        match best_pos {
            Some(pos) => selected.push(remaining.remove(pos)),
            None => break,
        }
    }

    // Too few survivors: re-admit deferred candidates in fused order.
    deferred.sort_unstable();
    for cand in deferred {
        if selected.len() >= k {
            break;
        }
        selected.push(cand);
    }

    selected.into_iter().map(|i| fused[i].clone()).collect()
}
