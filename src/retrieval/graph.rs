//! Bounded graph expansion around the top fused candidates.
//!
//! Walks the store's relationship graph outward from the highest-ranked
//! fused chunks, breadth-first per seed, bounded by a hop limit and a total
//! node cap so cyclic graphs always terminate. Discovered chunks come back
//! as one extra fusion signal with a deliberately low weight, so a
//! graph-only neighbor can never outrank a direct match by default.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::retrieval::fusion::{FusedResult, SignalKind, SignalList};
use crate::store::{ChunkStore, ScoredId};

pub const GRAPH_SIGNAL_LABEL: &str = "graph";

pub struct GraphExpander {
    store: Arc<dyn ChunkStore>,
    metrics: Arc<MetricsRegistry>,
    enabled: bool,
    max_hops: usize,
    max_nodes: usize,
    seeds: usize,
    signal_weight: f32,
    timeout: Duration,
}

impl GraphExpander {
    pub fn new(
        config: &Config,
        store: Arc<dyn ChunkStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            metrics,
            enabled: config.graph_enabled,
            max_hops: config.graph_max_hops,
            max_nodes: config.graph_max_nodes,
            seeds: config.graph_seeds,
            signal_weight: config.graph_signal_weight,
            timeout: Duration::from_millis(config.graph_timeout_ms),
        }
    }

    /// Expand around the provisional fused ranking. Returns `None` when
    /// expansion is disabled, unsupported, or produced nothing.
    pub async fn expand(&self, fused: &[FusedResult], requested: bool) -> Option<SignalList> {
        if !self.enabled || !requested || fused.is_empty() || !self.store.supports_graph() {
            return None;
        }

        let seeds: Vec<String> = fused
            .iter()
            .take(self.seeds)
            .map(|r| r.id.clone())
            .collect();

        let hits = match tokio::time::timeout(self.timeout, self.walk(&seeds)).await {
            Ok(hits) => hits,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "graph expansion timed out"
                );
                self.metrics.signal_timeouts_total.inc();
                return None;
            }
        };

        if hits.is_empty() {
            return None;
        }
        tracing::debug!(expanded = hits.len(), seeds = seeds.len(), "graph expansion added candidates");
        Some(SignalList::new(
            SignalKind::Graph,
            GRAPH_SIGNAL_LABEL.to_string(),
            self.signal_weight,
            hits,
        ))
    }

    /// Breadth-first walk per seed, in seed-rank order, with a shared
    /// visited set. A lookup failure stops the walk and keeps what was
    /// already found.
    async fn walk(&self, seeds: &[String]) -> Vec<ScoredId> {
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut hits: Vec<ScoredId> = Vec::new();

        'seeds: for seed in seeds {
            let mut frontier = vec![seed.clone()];
            for hop in 1..=self.max_hops {
                let mut next = Vec::new();
                for node in &frontier {
                    let neighbors = match self.store.graph_neighbors(node).await {
                        Ok(neighbors) => neighbors,
                        Err(err) => {
                            tracing::warn!(chunk = %node, error = %err, "graph neighbor lookup failed");
                            self.metrics.signal_errors_total.inc();
                            break 'seeds;
                        }
                    };
                    for neighbor in neighbors {
                        if !visited.insert(neighbor.clone()) {
                            continue;
                        }
                        hits.push(ScoredId {
                            id: neighbor.clone(),
                            score: 1.0 / hop as f32,
                        });
                        next.push(neighbor);
                        if hits.len() >= self.max_nodes {
                            break 'seeds;
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }
        hits
    }
}
