//! Test helper functions and store doubles for integration tests
//!
//! This module provides scripted `ChunkStore` implementations for failure
//! and timing scenarios, plus builders for common test wiring. These are
//! not rstest fixtures; call them directly.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use context_retrieval_server::{
    config::Config,
    embeddings::HashEmbedder,
    llm::LlmClient,
    metrics::MetricsRegistry,
    retrieval::{RetrievalPipeline, RetrievalRequest},
    store::{Chunk, ChunkStore, ScoredId, StoreFilters},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Build a chunk with the common test defaults
///
/// Line range is fixed; callers that care about citation values should set
/// the fields explicitly instead.
#[allow(dead_code)]
pub fn chunk(id: &str, path: &str, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        path: path.to_string(),
        start_line: 1,
        end_line: 10,
        text: text.to_string(),
        embedding: None,
        route: None,
        collection: None,
    }
}

/// Shorthand for a store hit
#[allow(dead_code)]
pub fn scored(id: &str, score: f32) -> ScoredId {
    ScoredId {
        id: id.to_string(),
        score,
    }
}

/// Wire a pipeline over the given store and LLM with a fresh registry
///
/// Returns the registry alongside the pipeline so tests can assert on
/// counters after driving a request.
pub fn build_pipeline(
    config: &Config,
    store: Arc<dyn ChunkStore>,
    llm: Arc<dyn LlmClient>,
) -> (RetrievalPipeline, Arc<MetricsRegistry>) {
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let embedder = Arc::new(HashEmbedder::new(config.embedding_dim));
    let pipeline = RetrievalPipeline::new(config, store, embedder, llm, Arc::clone(&metrics));
    (pipeline, metrics)
}

/// A pipeline request with every optional stage requested
#[allow(dead_code)]
pub fn request(query: &str, k: usize) -> RetrievalRequest {
    RetrievalRequest {
        query: query.to_string(),
        k,
        filters: StoreFilters::default(),
        rerank: true,
        expand_graph: true,
    }
}

/// A store that answers from fixed hit lists, with optional per-signal
/// delays and an optional scripted sparse failure
///
/// `dense_started` flips as soon as a dense query begins, which lets
/// cancellation tests prove the query was genuinely in flight when the
/// session was torn down.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedStore {
    pub chunks: HashMap<String, Chunk>,
    pub dense_hits: Vec<ScoredId>,
    pub sparse_hits: Vec<ScoredId>,
    pub dense_delay: Option<Duration>,
    pub sparse_delay: Option<Duration>,
    pub fail_sparse: bool,
    pub dense_started: Arc<AtomicBool>,
}

impl ScriptedStore {
    #[allow(dead_code)]
    pub fn insert_chunk(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.id.clone(), chunk);
    }
}

#[async_trait]
impl ChunkStore for ScriptedStore {
    async fn dense_query(
        &self,
        _vector: &[f32],
        k: usize,
        _filters: &StoreFilters,
    ) -> Result<Vec<ScoredId>> {
        self.dense_started.store(true, Ordering::SeqCst);
        if let Some(delay) = self.dense_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.dense_hits.iter().take(k).cloned().collect())
    }

    async fn sparse_query(
        &self,
        _text: &str,
        k: usize,
        _filters: &StoreFilters,
    ) -> Result<Vec<ScoredId>> {
        if let Some(delay) = self.sparse_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sparse {
            return Err(anyhow!("sparse index unavailable"));
        }
        Ok(self.sparse_hits.iter().take(k).cloned().collect())
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<HashMap<String, Chunk>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.chunks.get(id).map(|c| (id.clone(), c.clone())))
            .collect())
    }

    async fn graph_neighbors(&self, _chunk_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
