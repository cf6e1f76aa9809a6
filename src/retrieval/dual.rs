//! Concurrent dense and sparse retrieval across the expanded query set.
//!
//! Every expanded query fans out to the store once per signal kind, with an
//! independent timeout on each call. A signal that times out or errors
//! degrades to an empty hit list so the remaining signals still fuse.
//! Hypothetical documents run dense-only: their prose is embedding material,
//! not keyword material.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::Future;

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::metrics::MetricsRegistry;
use crate::retrieval::fusion::{SignalKind, SignalList};
use crate::retrieval::planner::{ExpandedQuery, QueryOrigin};
use crate::store::{ChunkStore, ScoredId, StoreFilters};

pub struct DualRetriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    metrics: Arc<MetricsRegistry>,
    signal_timeout: Duration,
    oversample_factor: usize,
}

impl DualRetriever {
    pub fn new(
        config: &Config,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            embedder,
            metrics,
            signal_timeout: Duration::from_millis(config.signal_timeout_ms),
            oversample_factor: config.oversample_factor,
        }
    }

    /// Run all signals for the plan and return their hit lists in a stable
    /// order: per query, dense first, then sparse.
    pub async fn run(
        &self,
        plan: &[ExpandedQuery],
        k: usize,
        filters: &StoreFilters,
    ) -> Vec<SignalList> {
        // Oversample so fusion and diversification have headroom beyond k.
        let fetch_k = k.saturating_mul(self.oversample_factor).max(k);

        let mut tasks: Vec<BoxFuture<'_, SignalList>> = Vec::new();
        for (idx, query) in plan.iter().enumerate() {
            let label_suffix = signal_suffix(query, idx);

            match self.embedder.embed(&query.text) {
                Ok(vector) => {
                    let store = Arc::clone(&self.store);
                    let filters = filters.clone();
                    let label = format!("dense:{label_suffix}");
                    tasks.push(Box::pin(run_signal(
                        SignalKind::Dense,
                        label,
                        self.signal_timeout,
                        Arc::clone(&self.metrics),
                        async move { store.dense_query(&vector, fetch_k, &filters).await },
                    )));
                }
                Err(err) => {
                    tracing::warn!(origin = query.origin.label(), error = %err, "query embedding failed");
                }
            }

            if query.origin != QueryOrigin::Hypothetical {
                let store = Arc::clone(&self.store);
                let filters = filters.clone();
                let text = query.text.clone();
                let label = format!("sparse:{label_suffix}");
                tasks.push(Box::pin(run_signal(
                    SignalKind::Sparse,
                    label,
                    self.signal_timeout,
                    Arc::clone(&self.metrics),
                    async move { store.sparse_query(&text, fetch_k, &filters).await },
                )));
            }
        }

        futures::future::join_all(tasks).await
    }
}

fn signal_suffix(query: &ExpandedQuery, idx: usize) -> String {
    match query.origin {
        QueryOrigin::Original => "original".to_string(),
        _ => format!("{}:{idx}", query.origin.label()),
    }
}

async fn run_signal(
    kind: SignalKind,
    label: String,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    query: impl Future<Output = anyhow::Result<Vec<ScoredId>>> + Send,
) -> SignalList {
    let hits = match tokio::time::timeout(timeout, query).await {
        Ok(Ok(hits)) => hits,
        Ok(Err(err)) => {
            tracing::warn!(signal = %label, error = %err, "retrieval signal failed");
            metrics.signal_errors_total.inc();
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(
                signal = %label,
                timeout_ms = timeout.as_millis() as u64,
                "retrieval signal timed out"
            );
            metrics.signal_timeouts_total.inc();
            Vec::new()
        }
    };
    SignalList::new(kind, label, 1.0, hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::embeddings::HashEmbedder;
    use crate::store::Chunk;

    /// Store double that records requested depths and serves fixed hits,
    /// optionally sleeping first.
    #[derive(Default)]
    struct ScriptedStore {
        dense_hits: Vec<ScoredId>,
        sparse_hits: Vec<ScoredId>,
        dense_delay: Option<Duration>,
        fail_sparse: bool,
        requested_depths: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChunkStore for ScriptedStore {
        async fn dense_query(
            &self,
            _vector: &[f32],
            k: usize,
            _filters: &StoreFilters,
        ) -> Result<Vec<ScoredId>> {
            self.requested_depths.lock().unwrap().push(k);
            if let Some(delay) = self.dense_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.dense_hits.clone())
        }

        async fn sparse_query(
            &self,
            _text: &str,
            k: usize,
            _filters: &StoreFilters,
        ) -> Result<Vec<ScoredId>> {
            self.requested_depths.lock().unwrap().push(k);
            if self.fail_sparse {
                anyhow::bail!("index unavailable");
            }
            Ok(self.sparse_hits.clone())
        }

        async fn fetch_chunks(&self, _ids: &[String]) -> Result<HashMap<String, Chunk>> {
            Ok(HashMap::new())
        }

        async fn graph_neighbors(&self, _chunk_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn hit(id: &str, score: f32) -> ScoredId {
        ScoredId {
            id: id.to_string(),
            score,
        }
    }

    fn plan(queries: &[(&str, QueryOrigin)]) -> Vec<ExpandedQuery> {
        queries
            .iter()
            .map(|(text, origin)| ExpandedQuery {
                text: text.to_string(),
                origin: *origin,
            })
            .collect()
    }

    fn retriever(store: Arc<dyn ChunkStore>, timeout_ms: u64, oversample: usize) -> DualRetriever {
        DualRetriever {
            store,
            embedder: Arc::new(HashEmbedder::new(32)),
            metrics: Arc::new(MetricsRegistry::new().unwrap()),
            signal_timeout: Duration::from_millis(timeout_ms),
            oversample_factor: oversample,
        }
    }

    #[tokio::test]
    async fn each_query_fans_out_to_both_signals() {
        let store = Arc::new(ScriptedStore {
            dense_hits: vec![hit("a", 0.9)],
            sparse_hits: vec![hit("b", 0.8)],
            ..ScriptedStore::default()
        });
        let retriever = retriever(store, 1_000, 2);
        let plan = plan(&[
            ("main query", QueryOrigin::Original),
            ("sub one", QueryOrigin::SubQuestion),
        ]);

        let signals = retriever.run(&plan, 10, &StoreFilters::default()).await;
        let labels: Vec<&str> = signals.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "dense:original",
                "sparse:original",
                "dense:sub_question:1",
                "sparse:sub_question:1",
            ]
        );
        assert!(signals.iter().all(|s| !s.hits.is_empty()));
    }

    #[tokio::test]
    async fn hypothetical_documents_run_dense_only() {
        let store = Arc::new(ScriptedStore::default());
        let retriever = retriever(store, 1_000, 2);
        let plan = plan(&[
            ("main query", QueryOrigin::Original),
            ("a plausible passage", QueryOrigin::Hypothetical),
        ]);

        let signals = retriever.run(&plan, 10, &StoreFilters::default()).await;
        let labels: Vec<&str> = signals.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["dense:original", "sparse:original", "dense:hypothetical:1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dense_signal_degrades_to_empty_without_stalling_sparse() {
        let store = Arc::new(ScriptedStore {
            dense_hits: vec![hit("a", 0.9)],
            sparse_hits: vec![hit("x", 0.8), hit("y", 0.7)],
            dense_delay: Some(Duration::from_secs(30)),
            ..ScriptedStore::default()
        });
        let retriever = retriever(store, 50, 2);
        let plan = plan(&[("main query", QueryOrigin::Original)]);

        let signals = retriever.run(&plan, 10, &StoreFilters::default()).await;
        assert_eq!(signals.len(), 2);
        assert!(signals[0].hits.is_empty(), "dense should have timed out");
        assert_eq!(signals[1].hits.len(), 2);
        assert_eq!(retriever.metrics.signal_timeouts_total.get(), 1.0);
    }

    #[tokio::test]
    async fn failing_signal_degrades_to_empty() {
        let store = Arc::new(ScriptedStore {
            dense_hits: vec![hit("a", 0.9)],
            fail_sparse: true,
            ..ScriptedStore::default()
        });
        let retriever = retriever(store, 1_000, 2);
        let plan = plan(&[("main query", QueryOrigin::Original)]);

        let signals = retriever.run(&plan, 10, &StoreFilters::default()).await;
        assert_eq!(signals[0].hits.len(), 1);
        assert!(signals[1].hits.is_empty());
    }

    #[tokio::test]
    async fn store_is_queried_at_oversampled_depth() {
        let store = Arc::new(ScriptedStore::default());
        let retriever = retriever(Arc::clone(&store) as Arc<dyn ChunkStore>, 1_000, 3);
        let plan = plan(&[("main query", QueryOrigin::Original)]);

        retriever.run(&plan, 10, &StoreFilters::default()).await;
        let depths = store.requested_depths.lock().unwrap().clone();
        assert_eq!(depths, vec![30, 30]);
    }
}
