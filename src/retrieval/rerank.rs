//! Reranking of the diversified head of the ranking.
//!
//! The adapter rescores only the top `RERANK_DEPTH` candidates and keeps the
//! tail untouched. Reranking is strictly an enhancement: on timeout, error,
//! disabled configuration, or an invalid model response, the input order is
//! returned unchanged. The candidate set is never altered, only the order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;
use crate::llm::{CompletionRequest, LlmClient};
use crate::metrics::MetricsRegistry;
use crate::retrieval::fusion::FusedResult;
use crate::store::Chunk;
use crate::text;

const PREVIEW_CHARS: usize = 300;

/// Trait for rescoring candidates against a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return the preferred order as indices into `documents`. A subset is
    /// acceptable; unlisted documents keep their relative order after the
    /// listed ones.
    async fn rerank(&self, query: &str, documents: &[RerankDocument]) -> Result<Vec<usize>>;
}

/// Document representation handed to a reranker backend.
#[derive(Debug, Clone, Default)]
pub struct RerankDocument {
    pub id: String,
    pub path: String,
    pub text: String,
}

/// Create a reranker based on config.
pub fn create_reranker(config: &Config, llm: Arc<dyn LlmClient>) -> Option<Arc<dyn Reranker>> {
    if !config.rerank_enabled {
        tracing::info!("reranking disabled by configuration");
        return None;
    }
    Some(Arc::new(LlmReranker {
        llm,
        max_tokens: config.llm_max_tokens,
    }))
}

/// Reranker that asks the LLM for a relevance ordering.
pub struct LlmReranker {
    llm: Arc<dyn LlmClient>,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    indices: Vec<usize>,
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(&self, query: &str, documents: &[RerankDocument]) -> Result<Vec<usize>> {
        let items: Vec<String> = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[{i}] {}: {}", doc.path, doc.text))
            .collect();

        let request = CompletionRequest {
            system: Some(
                "You are a search relevance expert. Rank the following passages by how well \
                 they answer the user query.\n\
                 Return a JSON object with a list \"indices\" holding the passage indices in \
                 order of relevance.\n\
                 Example: {\"indices\": [2, 0, 1]}"
                    .to_string(),
            ),
            prompt: format!(
                "Query: {query}\n\nPassages:\n{}\n\nRank them.",
                items.join("\n")
            ),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = self.llm.complete(&request).await?;
        let body = text::strip_code_fences(&response);
        let parsed: RerankResponse =
            serde_json::from_str(&body).context("reranker returned unparseable output")?;
        Ok(parsed.indices)
    }
}

pub struct RerankAdapter {
    reranker: Option<Arc<dyn Reranker>>,
    metrics: Arc<MetricsRegistry>,
    depth: usize,
    timeout: Duration,
}

impl RerankAdapter {
    pub fn new(
        config: &Config,
        reranker: Option<Arc<dyn Reranker>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            reranker,
            metrics,
            depth: config.rerank_depth,
            timeout: Duration::from_millis(config.rerank_timeout_ms),
        }
    }

    /// Reorder the head of `ranking`. Always returns a permutation of the
    /// input.
    pub async fn apply(
        &self,
        query: &str,
        ranking: Vec<FusedResult>,
        chunks: &HashMap<String, Chunk>,
        requested: bool,
    ) -> Vec<FusedResult> {
        let Some(reranker) = &self.reranker else {
            return ranking;
        };
        if !requested || ranking.len() < 2 {
            return ranking;
        }

        let depth = self.depth.min(ranking.len());
        let head = &ranking[..depth];
        let documents: Vec<RerankDocument> = head
            .iter()
            .map(|result| match chunks.get(&result.id) {
                Some(chunk) => RerankDocument {
                    id: result.id.clone(),
                    path: chunk.path.clone(),
                    text: preview(&chunk.text),
                },
                None => RerankDocument {
                    id: result.id.clone(),
                    ..RerankDocument::default()
                },
            })
            .collect();

        let _timer = self.metrics.rerank_duration.start_timer();
        match tokio::time::timeout(self.timeout, reranker.rerank(query, &documents)).await {
            Ok(Ok(order)) => match reorder(head, &order) {
                Some(mut reordered) => {
                    reordered.extend_from_slice(&ranking[depth..]);
                    reordered
                }
                None => {
                    tracing::warn!("reranker returned out-of-range or duplicate indices");
                    self.metrics.rerank_fallbacks_total.inc();
                    ranking
                }
            },
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "rerank failed, keeping fused order");
                self.metrics.rerank_fallbacks_total.inc();
                ranking
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "rerank timed out, keeping fused order"
                );
                self.metrics.rerank_fallbacks_total.inc();
                ranking
            }
        }
    }
}

fn preview(chunk_text: &str) -> String {
    chunk_text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(PREVIEW_CHARS)
        .collect()
}

/// Apply `order` to `head`. Unlisted entries follow in their original
/// relative order. Any out-of-range or duplicate index invalidates the
/// whole ordering.
fn reorder(head: &[FusedResult], order: &[usize]) -> Option<Vec<FusedResult>> {
    let mut taken = vec![false; head.len()];
    let mut out = Vec::with_capacity(head.len());
    for &idx in order {
        if idx >= head.len() || taken[idx] {
            return None;
        }
        taken[idx] = true;
        out.push(head[idx].clone());
    }
    for (idx, result) in head.iter().enumerate() {
        if !taken[idx] {
            out.push(result.clone());
        }
    }
    Some(out)
}
