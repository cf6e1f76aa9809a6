//! rstest fixtures for integration tests
//!
//! This module provides reusable rstest fixtures for constructing the
//! pipeline and its dependencies in integration tests. Fixtures use
//! dependency injection to automatically provide required dependencies.
//!
//! # Usage
//!
//! ```rust
//! use crate::support::fixtures::*;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn my_test(test_config: Config, corpus_store: MemoryChunkStore) {
//!     // both arguments are constructed by their fixtures
//!     assert!(!corpus_store.is_empty());
//! }
//! ```

use context_retrieval_server::{
    config::{Config, LlmBackend},
    embeddings::{Embedder, HashEmbedder},
    metrics::MetricsRegistry,
    store::memory::MemoryChunkStore,
    store::Chunk,
};
use rstest::*;
use std::sync::Arc;

/// Creates a test configuration with every external integration disabled
///
/// All optional stages (query expansion, graph expansion, rerank, answer
/// generation, metrics export) start disabled so each test enables exactly
/// what it exercises. Timeouts are short enough for paused-clock tests to
/// advance past quickly.
#[fixture]
pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        rrf_k: 60.0,
        mmr_lambda: 0.7,
        mmr_sim_threshold: 0.95,
        default_k: 10,
        max_k: 50,
        oversample_factor: 2,
        signal_timeout_ms: 2_000,
        graph_enabled: false,
        graph_max_hops: 2,
        graph_max_nodes: 64,
        graph_seeds: 5,
        graph_signal_weight: 0.4,
        graph_timeout_ms: 1_000,
        rerank_enabled: false,
        rerank_depth: 20,
        rerank_timeout_ms: 4_000,
        context_token_budget: 4_000,
        token_encoding: "o200k_base".to_string(),
        expansion_enabled: false,
        max_sub_questions: 3,
        expansion_timeout_ms: 3_000,
        generation_enabled: false,
        generation_timeout_ms: 30_000,
        llm_backend: LlmBackend::Mock,
        llm_base_url: "http://127.0.0.1:0".to_string(),
        llm_api_key: None,
        llm_model: "test-model".to_string(),
        llm_max_tokens: 256,
        llm_temperature: 0.0,
        embedding_dim: 64,
        corpus_path: None,
        metrics_enabled: false,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
    }
}

/// Creates a MetricsRegistry for collecting telemetry
///
/// Each test gets its own registry so counter assertions stay isolated.
#[fixture]
pub fn metrics() -> Arc<MetricsRegistry> {
    Arc::new(MetricsRegistry::new().unwrap())
}

/// Creates a small embedded corpus covering distinct topics
///
/// Three documentation chunks with disjoint vocabulary, all embedded with
/// the hash embedder at the `test_config` dimension, plus one relationship
/// edge (`ingest -> fuse`) so graph expansion has something to walk.
#[fixture]
pub fn corpus_store(test_config: Config) -> MemoryChunkStore {
    let embedder = HashEmbedder::new(test_config.embedding_dim);
    let mut store = MemoryChunkStore::new();

    for (id, path, route, text) in [
        (
            "ingest",
            "docs/ingestion.md",
            Some("/docs/ingestion"),
            "documents are chunked and embedded during ingestion",
        ),
        (
            "fuse",
            "docs/fusion.md",
            Some("/docs/fusion"),
            "dense and sparse rankings are merged with reciprocal rank fusion",
        ),
        (
            "budget",
            "docs/budget.md",
            None,
            "context packing stops when the token budget would be exceeded",
        ),
    ] {
        store.insert_chunk(Chunk {
            id: id.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 14,
            text: text.to_string(),
            embedding: Some(embedder.embed(text).unwrap()),
            route: route.map(str::to_string),
            collection: None,
        });
    }
    store.add_neighbor("ingest", "fuse");
    store
}
