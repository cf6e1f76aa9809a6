use prometheus::{Counter, Gauge, Histogram, Registry};

pub mod server;

pub use server::{spawn_metrics_server, MetricsState};

pub struct MetricsRegistry {
    pub registry: Registry,

    // Query metrics
    pub queries_total: Counter,
    pub query_errors_total: Counter,
    pub query_duration: Histogram,
    pub retrieval_duration: Histogram,
    pub rerank_duration: Histogram,

    // Degradation metrics
    pub signal_timeouts_total: Counter,
    pub signal_errors_total: Counter,
    pub rerank_fallbacks_total: Counter,
    pub empty_results_total: Counter,
    pub stream_disconnects_total: Counter,

    // Context metrics
    pub context_tokens: Histogram,
    pub corpus_chunks: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = Counter::new(
            "queries_total",
            "Total number of queries handled"
        )?;

        let query_errors_total = Counter::new(
            "query_errors_total",
            "Total number of queries that ended in an error"
        )?;

        // Query duration histogram (1ms to 30 seconds)
        let query_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "query_duration_seconds",
                "End-to-end query duration in seconds"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
        )?;

        // Retrieval stage histogram (1ms to 5 seconds)
        let retrieval_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "retrieval_duration_seconds",
                "Dense, sparse, and graph retrieval duration in seconds"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
        )?;

        let rerank_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "rerank_duration_seconds",
                "Rerank stage duration in seconds"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
        )?;

        let signal_timeouts_total = Counter::new(
            "signal_timeouts_total",
            "Total number of retrieval signals that timed out"
        )?;

        let signal_errors_total = Counter::new(
            "signal_errors_total",
            "Total number of retrieval signals that failed"
        )?;

        let rerank_fallbacks_total = Counter::new(
            "rerank_fallbacks_total",
            "Total number of rerank calls that fell back to fused order"
        )?;

        let empty_results_total = Counter::new(
            "empty_results_total",
            "Total number of queries that produced no candidates"
        )?;

        let stream_disconnects_total = Counter::new(
            "stream_disconnects_total",
            "Total number of clients that disconnected mid-stream"
        )?;

        // Packed context size histogram (tokens)
        let context_tokens = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "context_tokens",
                "Tokens packed into the final context"
            )
            .buckets(vec![64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0])
        )?;

        let corpus_chunks = Gauge::new(
            "corpus_chunks",
            "Current number of chunks in the store"
        )?;

        // Register all metrics
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_errors_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(retrieval_duration.clone()))?;
        registry.register(Box::new(rerank_duration.clone()))?;
        registry.register(Box::new(signal_timeouts_total.clone()))?;
        registry.register(Box::new(signal_errors_total.clone()))?;
        registry.register(Box::new(rerank_fallbacks_total.clone()))?;
        registry.register(Box::new(empty_results_total.clone()))?;
        registry.register(Box::new(stream_disconnects_total.clone()))?;
        registry.register(Box::new(context_tokens.clone()))?;
        registry.register(Box::new(corpus_chunks.clone()))?;

        Ok(Self {
            registry,
            queries_total,
            query_errors_total,
            query_duration,
            retrieval_duration,
            rerank_duration,
            signal_timeouts_total,
            signal_errors_total,
            rerank_fallbacks_total,
            empty_results_total,
            stream_disconnects_total,
            context_tokens,
            corpus_chunks,
        })
    }
}
