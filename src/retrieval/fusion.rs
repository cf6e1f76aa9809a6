//! Reciprocal-rank fusion of per-signal candidate lists.
//!
//! Dense and sparse raw scores are not comparable, so fusion works on ranks
//! alone: a chunk at 1-based rank `r` in a signal list contributes
//! `w / (K + r)`, and contributions sum across every list the chunk appears
//! in. Chunks found by several independent signals therefore rise above
//! chunks found by one.

use std::collections::HashMap;

use crate::store::ScoredId;

pub const DEFAULT_RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Dense,
    Sparse,
    Graph,
}

/// One ranked candidate list entering fusion. Store-reported order is
/// authoritative; the position in `hits` is the rank.
#[derive(Debug, Clone)]
pub struct SignalList {
    pub kind: SignalKind,
    /// Stable name such as `dense:0` or `graph`, kept for provenance.
    pub label: String,
    pub weight: f32,
    pub hits: Vec<ScoredId>,
}

impl SignalList {
    pub fn new(kind: SignalKind, label: impl Into<String>, weight: f32, hits: Vec<ScoredId>) -> Self {
        Self {
            kind,
            label: label.into(),
            weight,
            hits,
        }
    }
}

/// Where a fused chunk's contributions came from.
#[derive(Debug, Clone)]
pub struct SignalRank {
    pub label: String,
    pub rank: usize,
    pub raw_score: f32,
}

#[derive(Debug, Clone)]
pub struct FusedResult {
    pub id: String,
    pub score: f32,
    /// Highest raw store score across contributing signals. First tie-break
    /// key; never mixed into `score`.
    pub best_raw_score: f32,
    pub provenance: Vec<SignalRank>,
}

/// Merge ranked signal lists into one descending ranking. Ties are broken by
/// highest single-signal raw score, then by chunk id, so the output order is
/// fully deterministic.
pub fn fuse(signals: &[SignalList], rrf_k: f32) -> Vec<FusedResult> {
    let mut fused: HashMap<String, FusedResult> = HashMap::new();

    for signal in signals {
        for (index, hit) in signal.hits.iter().enumerate() {
            let rank = index + 1;
            let contribution = signal.weight / (rrf_k + rank as f32);
            let entry = fused.entry(hit.id.clone()).or_insert_with(|| FusedResult {
                id: hit.id.clone(),
                score: 0.0,
                best_raw_score: f32::NEG_INFINITY,
                provenance: Vec::new(),
            });
            entry.score += contribution;
            entry.best_raw_score = entry.best_raw_score.max(hit.score);
            entry.provenance.push(SignalRank {
                label: signal.label.clone(),
                rank,
                raw_score: hit.score,
            });
        }
    }

    let mut results: Vec<FusedResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.best_raw_score.total_cmp(&a.best_raw_score))
            .then_with(|| a.id.cmp(&b.id))
    });
    results
}
