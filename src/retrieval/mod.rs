//! The retrieval pipeline: plan, fan out, fuse, select, rerank, pack.

pub mod diversify;
pub mod dual;
pub mod fusion;
pub mod graph;
pub mod planner;
pub mod rerank;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::config::Config;
use crate::context::{AssembledContext, ContextAssembler};
use crate::embeddings::Embedder;
use crate::error::PipelineError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::metrics::MetricsRegistry;
use crate::store::{ChunkStore, StoreFilters};
use crate::stream::{EventSink, StreamEvent};
use diversify::MmrParams;
use dual::DualRetriever;
use graph::GraphExpander;
use planner::QueryPlanner;
use rerank::RerankAdapter;

const ANSWER_SYSTEM_PROMPT: &str =
    "You are a research assistant answering from retrieved documents. \
     Use the provided context to answer the user's question. \
     Cite your sources using [file:start_line-end_line] format. \
     If the context is insufficient, say so. \
     Be concise.";

/// One query as the pipeline sees it, after server-side validation.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub k: usize,
    pub filters: StoreFilters,
    pub rerank: bool,
    pub expand_graph: bool,
}

/// What a completed retrieval hands to the response layer.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub context: AssembledContext,
    pub expanded_queries: usize,
    pub fused_candidates: usize,
}

pub struct RetrievalPipeline {
    store: Arc<dyn ChunkStore>,
    llm: Arc<dyn LlmClient>,
    metrics: Arc<MetricsRegistry>,
    planner: QueryPlanner,
    retriever: DualRetriever,
    graph: GraphExpander,
    rerank: RerankAdapter,
    assembler: ContextAssembler,
    rrf_k: f32,
    mmr: MmrParams,
    fetch_timeout: Duration,
    generation_enabled: bool,
    generation_timeout: Duration,
    llm_max_tokens: usize,
    llm_temperature: f32,
}

impl RetrievalPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let planner = QueryPlanner::new(config, Arc::clone(&llm));
        let retriever = DualRetriever::new(
            config,
            Arc::clone(&store),
            embedder,
            Arc::clone(&metrics),
        );
        let graph = GraphExpander::new(config, Arc::clone(&store), Arc::clone(&metrics));
        let reranker = rerank::create_reranker(config, Arc::clone(&llm));
        let rerank = RerankAdapter::new(config, reranker, Arc::clone(&metrics));
        let assembler = ContextAssembler::new(config, Arc::clone(&metrics));

        Self {
            store,
            llm,
            metrics,
            planner,
            retriever,
            graph,
            rerank,
            assembler,
            rrf_k: config.rrf_k,
            mmr: MmrParams {
                lambda: config.mmr_lambda,
                sim_threshold: config.mmr_sim_threshold,
            },
            fetch_timeout: Duration::from_millis(config.signal_timeout_ms),
            generation_enabled: config.generation_enabled,
            generation_timeout: Duration::from_millis(config.generation_timeout_ms),
            llm_max_tokens: config.llm_max_tokens,
            llm_temperature: config.llm_temperature,
        }
    }

    /// Run retrieval through context assembly. An empty candidate pool is a
    /// successful empty outcome, not an error.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<RetrievalOutcome, PipelineError> {
        self.metrics.queries_total.inc();
        let _timer = self.metrics.query_duration.start_timer();

        let result = self.retrieve_inner(request).await;
        if result.is_err() {
            self.metrics.query_errors_total.inc();
        }
        result
    }

    async fn retrieve_inner(
        &self,
        request: &RetrievalRequest,
    ) -> Result<RetrievalOutcome, PipelineError> {
        let plan = self.planner.plan(&request.query).await?;
        tracing::debug!(expansions = plan.len(), k = request.k, "query plan built");

        let retrieval_timer = self.metrics.retrieval_duration.start_timer();
        let mut signals = self
            .retriever
            .run(&plan, request.k, &request.filters)
            .await;
        let provisional = fusion::fuse(&signals, self.rrf_k);
        let fused = match self.graph.expand(&provisional, request.expand_graph).await {
            Some(graph_signal) => {
                signals.push(graph_signal);
                fusion::fuse(&signals, self.rrf_k)
            }
            None => provisional,
        };
        retrieval_timer.observe_duration();

        if fused.is_empty() {
            tracing::info!(query = %request.query, "no candidates from any signal");
            self.metrics.empty_results_total.inc();
            return Ok(RetrievalOutcome {
                context: AssembledContext::default(),
                expanded_queries: plan.len(),
                fused_candidates: 0,
            });
        }

        let ids: Vec<String> = fused.iter().map(|r| r.id.clone()).collect();
        let chunks = match tokio::time::timeout(self.fetch_timeout, self.store.fetch_chunks(&ids))
            .await
        {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(err)) => {
                return Err(PipelineError::SignalError {
                    signal: "fetch_chunks".to_string(),
                    message: err.to_string(),
                })
            }
            Err(_) => {
                return Err(PipelineError::SignalTimeout {
                    signal: "fetch_chunks".to_string(),
                    timeout_ms: self.fetch_timeout.as_millis() as u64,
                })
            }
        };

        let selected = diversify::select_diverse(&fused, &chunks, request.k, &self.mmr);
        let reranked = self
            .rerank
            .apply(&request.query, selected, &chunks, request.rerank)
            .await;
        let context = self.assembler.assemble(&reranked, &chunks)?;
        if context.is_empty() {
            self.metrics.empty_results_total.inc();
        }

        Ok(RetrievalOutcome {
            context,
            expanded_queries: plan.len(),
            fused_candidates: fused.len(),
        })
    }

    /// Drive one streaming session to its terminal event. A disconnected
    /// client cancels the in-flight stage via the select below.
    pub async fn run_session(&self, request: RetrievalRequest, sink: EventSink) {
        let result = tokio::select! {
            result = self.session_inner(&request, &sink) => result,
            _ = sink.closed() => Err(PipelineError::ClientDisconnected),
        };

        match result {
            Ok(()) => {}
            Err(PipelineError::ClientDisconnected) => {
                self.metrics.stream_disconnects_total.inc();
                tracing::info!("client disconnected, session cancelled");
            }
            Err(err) => {
                tracing::warn!(error = %err, "session ended with error");
                let _ = sink.emit(StreamEvent::error(&err)).await;
            }
        }
    }

    async fn session_inner(
        &self,
        request: &RetrievalRequest,
        sink: &EventSink,
    ) -> Result<(), PipelineError> {
        sink.emit(StreamEvent::RetrievalStart {
            query: request.query.clone(),
        })
        .await?;

        let outcome = self.retrieve(request).await?;
        sink.emit(StreamEvent::RetrievalResult {
            results: outcome.context.items.clone(),
            total_tokens: outcome.context.total_tokens,
        })
        .await?;

        let citations = outcome.context.citations();
        let answer = if self.generation_enabled && !outcome.context.is_empty() {
            self.stream_answer(&request.query, &outcome.context, sink)
                .await?
        } else {
            None
        };

        sink.emit(StreamEvent::Done { answer, citations }).await?;
        Ok(())
    }

    /// Non-streaming answer over an assembled context. Returns `None` when
    /// generation is disabled, the context is empty, or the model call
    /// fails; the evidence set is the response either way.
    pub async fn answer(&self, query: &str, context: &AssembledContext) -> Option<String> {
        if !self.generation_enabled || context.is_empty() {
            return None;
        }

        let request = self.answer_request(query, context);
        match tokio::time::timeout(self.generation_timeout, self.llm.complete(&request)).await {
            Ok(Ok(answer)) => {
                let answer = answer.trim().to_string();
                if answer.is_empty() {
                    None
                } else {
                    Some(answer)
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "answer generation failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.generation_timeout.as_millis() as u64,
                    "answer generation timed out"
                );
                None
            }
        }
    }

    fn answer_request(&self, query: &str, context: &AssembledContext) -> CompletionRequest {
        CompletionRequest {
            system: Some(ANSWER_SYSTEM_PROMPT.to_string()),
            prompt: format!(
                "Question: {query}\n\nContext:\n{}\n\nAnswer:",
                context.context_text
            ),
            max_tokens: self.llm_max_tokens,
            temperature: self.llm_temperature,
        }
    }

    /// Stream the answer, forwarding deltas as they arrive. Generation
    /// failures are absorbed: the evidence set already went out, so the
    /// session still finishes with whatever answer text accumulated.
    async fn stream_answer(
        &self,
        query: &str,
        context: &AssembledContext,
        sink: &EventSink,
    ) -> Result<Option<String>, PipelineError> {
        let request = self.answer_request(query, context);
        let deadline = tokio::time::Instant::now() + self.generation_timeout;
        let mut stream =
            match tokio::time::timeout_at(deadline, self.llm.complete_stream(&request)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "answer generation failed to start");
                    return Ok(None);
                }
                Err(_) => {
                    tracing::warn!("answer generation timed out before the first delta");
                    return Ok(None);
                }
            };

        let mut answer = String::new();
        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(delta))) => {
                    answer.push_str(&delta);
                    sink.emit(StreamEvent::GenerationChunk { delta }).await?;
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "answer stream failed mid-generation");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.generation_timeout.as_millis() as u64,
                        "answer generation timed out"
                    );
                    break;
                }
            }
        }

        Ok(if answer.is_empty() { None } else { Some(answer) })
    }
}
