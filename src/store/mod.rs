pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable unit of evidence produced by ingestion. Retrieval only reads
/// and scores chunks; the identifier and citation fields are authoritative
/// as recorded at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// Scope restrictions applied inside the store. Unknown request filter keys
/// are dropped before this struct is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl StoreFilters {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match &self.collection {
            Some(wanted) => chunk.collection.as_deref() == Some(wanted.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// Read-only accessor over the dense and sparse indexes. One shared handle
/// serves all sessions concurrently; pooling and caching are the
/// implementation's concern.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Nearest neighbors by vector similarity, best first.
    async fn dense_query(
        &self,
        vector: &[f32],
        k: usize,
        filters: &StoreFilters,
    ) -> Result<Vec<ScoredId>>;

    /// Lexical matches by keyword score, best first.
    async fn sparse_query(
        &self,
        text: &str,
        k: usize,
        filters: &StoreFilters,
    ) -> Result<Vec<ScoredId>>;

    /// Resolve identifiers to full chunks. Unknown ids are absent from the
    /// returned map rather than an error.
    async fn fetch_chunks(&self, ids: &[String]) -> Result<HashMap<String, Chunk>>;

    /// One hop of relationship neighbors. Stores without a graph return an
    /// empty list.
    async fn graph_neighbors(&self, chunk_id: &str) -> Result<Vec<String>>;

    fn supports_graph(&self) -> bool {
        false
    }
}
