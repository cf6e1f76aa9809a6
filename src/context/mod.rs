//! Token-budgeted context assembly with exact citations.
//!
//! Chunks are packed in ranking order until the next chunk would exceed the
//! budget, then packing stops. A chunk is included whole or not at all, so a
//! citation's line range always matches the stored chunk exactly. Citations
//! are emitted only for packed chunks and copied verbatim from the chunk.

pub mod tokens;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::PipelineError;
use crate::metrics::MetricsRegistry;
use crate::retrieval::fusion::FusedResult;
use crate::store::Chunk;
use tokens::TokenCounter;

/// Source locator for one packed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// One chunk selected into the final context. Serializes with the citation
/// fields inline, so every wire-format item carries its own path and line
/// range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub chunk_id: String,
    pub text: String,
    pub tokens: usize,
    pub score: f32,
    #[serde(flatten)]
    pub citation: Citation,
}

/// The packed context for one query.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub items: Vec<ContextItem>,
    pub total_tokens: usize,
    /// Headered chunk blocks, ready to splice into a generation prompt.
    pub context_text: String,
}

impl AssembledContext {
    pub fn citations(&self) -> Vec<Citation> {
        self.items.iter().map(|item| item.citation.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub struct ContextAssembler {
    counter: &'static TokenCounter,
    metrics: Arc<MetricsRegistry>,
    budget: usize,
}

impl ContextAssembler {
    pub fn new(config: &Config, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            counter: tokens::shared_counter(&config.token_encoding),
            metrics,
            budget: config.context_token_budget,
        }
    }

    /// Pack the ranking into the token budget. An empty ranking packs to an
    /// empty context; a non-empty ranking that fits nothing is an error.
    pub fn assemble(
        &self,
        ranking: &[FusedResult],
        chunks: &HashMap<String, Chunk>,
    ) -> Result<AssembledContext, PipelineError> {
        let mut items: Vec<ContextItem> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();
        let mut used = 0usize;
        let mut hydrated = 0usize;

        for result in ranking {
            let Some(chunk) = chunks.get(&result.id) else {
                tracing::debug!(chunk = %result.id, "candidate missing from store, skipping");
                continue;
            };
            hydrated += 1;

            let block = block_text(chunk);
            let cost = self.counter.count(&block);
            if used + cost > self.budget {
                break;
            }

            used += cost;
            blocks.push(block);
            items.push(ContextItem {
                chunk_id: chunk.id.clone(),
                text: chunk.text.clone(),
                tokens: cost,
                score: result.score,
                citation: Citation {
                    path: chunk.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    route: chunk.route.clone(),
                },
            });
        }

        if items.is_empty() && hydrated > 0 {
            // Nothing fit; report the cheapest candidate so the operator can
            // see how far off the budget is.
            let smallest = ranking
                .iter()
                .filter_map(|r| chunks.get(&r.id))
                .map(|chunk| self.counter.count(&block_text(chunk)))
                .min()
                .unwrap_or(0);
            return Err(PipelineError::ContextOverflow {
                budget: self.budget,
                smallest,
            });
        }

        self.metrics.context_tokens.observe(used as f64);
        Ok(AssembledContext {
            items,
            total_tokens: used,
            context_text: blocks.join("\n"),
        })
    }
}

fn block_text(chunk: &Chunk) -> String {
    format!(
        "--- File: {} ({}-{}) ---\n{}\n",
        chunk.path, chunk.start_line, chunk.end_line, chunk.text
    )
}
