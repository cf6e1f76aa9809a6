use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::embeddings::{cosine_similarity, Embedder};
use crate::store::{Chunk, ChunkStore, ScoredId, StoreFilters};
use crate::text::tokenize;

/// Brute-force in-process store. Serves tests, keyless local runs, and the
/// demo corpus; production deployments put real indexes behind the same
/// trait.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: HashMap<String, Chunk>,
    // Insertion order, so equal-score results tie-break reproducibly.
    order: Vec<String>,
    neighbors: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CorpusEntry {
    id: String,
    path: String,
    start_line: u32,
    end_line: u32,
    text: String,
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    neighbors: Vec<String>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON corpus file (an array of chunk entries) and embed each
    /// chunk's text with the given embedder, standing in for the embeddings
    /// ingestion would normally have attached.
    pub fn from_corpus_file(path: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
        let entries: Vec<CorpusEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid corpus JSON: {}", path.display()))?;

        let mut store = Self::new();
        for entry in entries {
            let embedding = embedder.embed(&entry.text)?;
            store.insert_chunk(Chunk {
                id: entry.id.clone(),
                path: entry.path,
                start_line: entry.start_line,
                end_line: entry.end_line,
                text: entry.text,
                embedding: Some(embedding),
                route: entry.route,
                collection: entry.collection,
            });
            for neighbor in entry.neighbors {
                store.add_neighbor(&entry.id, &neighbor);
            }
        }
        Ok(store)
    }

    pub fn insert_chunk(&mut self, chunk: Chunk) {
        if !self.chunks.contains_key(&chunk.id) {
            self.order.push(chunk.id.clone());
        }
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    /// Record a directed relationship edge.
    pub fn add_neighbor(&mut self, from: &str, to: &str) {
        let entry = self.neighbors.entry(from.to_string()).or_default();
        if !entry.iter().any(|n| n == to) {
            entry.push(to.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn ranked(&self, mut scored: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);
        scored
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn dense_query(
        &self,
        vector: &[f32],
        k: usize,
        filters: &StoreFilters,
    ) -> Result<Vec<ScoredId>> {
        let mut scored = Vec::new();
        for id in &self.order {
            let chunk = &self.chunks[id];
            if !filters.matches(chunk) {
                continue;
            }
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(vector, embedding);
            if score > 0.0 {
                scored.push(ScoredId {
                    id: id.clone(),
                    score,
                });
            }
        }
        Ok(self.ranked(scored, k))
    }

    async fn sparse_query(
        &self,
        text: &str,
        k: usize,
        filters: &StoreFilters,
    ) -> Result<Vec<ScoredId>> {
        let query_tokens: Vec<String> = tokenize(text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        for id in &self.order {
            let chunk = &self.chunks[id];
            if !filters.matches(chunk) {
                continue;
            }
            let chunk_tokens: HashSet<String> = tokenize(&chunk.text).into_iter().collect();
            let hits = query_tokens
                .iter()
                .filter(|t| chunk_tokens.contains(*t))
                .count();
            if hits > 0 {
                scored.push(ScoredId {
                    id: id.clone(),
                    score: hits as f32 / query_tokens.len() as f32,
                });
            }
        }
        Ok(self.ranked(scored, k))
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<HashMap<String, Chunk>> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(chunk) = self.chunks.get(id) {
                out.insert(id.clone(), chunk.clone());
            }
        }
        Ok(out)
    }

    async fn graph_neighbors(&self, chunk_id: &str) -> Result<Vec<String>> {
        Ok(self.neighbors.get(chunk_id).cloned().unwrap_or_default())
    }

    fn supports_graph(&self) -> bool {
        !self.neighbors.is_empty()
    }
}
