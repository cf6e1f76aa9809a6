use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use context_retrieval_server::cli::{print_help, print_version, wants_help, wants_version};
use context_retrieval_server::config::Config;
use context_retrieval_server::embeddings::HashEmbedder;
use context_retrieval_server::llm::build_llm_client;
use context_retrieval_server::metrics::{spawn_metrics_server, MetricsRegistry};
use context_retrieval_server::retrieval::RetrievalPipeline;
use context_retrieval_server::server::{serve, AppState};
use context_retrieval_server::store::memory::MemoryChunkStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().collect::<Vec<_>>();
    if wants_help(&args) {
        print_help();
        return Ok(());
    }
    if wants_version(&args) {
        print_version();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting context-retrieval-server"
    );

    if let Err(err) = run().await {
        error!(error = %err, "Server exited with error");
        return Err(err);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let metrics = Arc::new(MetricsRegistry::new()?);

    let embedder = Arc::new(HashEmbedder::new(config.embedding_dim));

    let store = match &config.corpus_path {
        Some(path) => {
            let store = MemoryChunkStore::from_corpus_file(path, embedder.as_ref())?;
            info!(chunks = store.len(), corpus = %path.display(), "Loaded corpus");
            metrics.corpus_chunks.set(store.len() as f64);
            store
        }
        None => {
            warn!("CORPUS_PATH not set, serving an empty corpus");
            MemoryChunkStore::new()
        }
    };

    let llm = build_llm_client(&config);
    info!(backend = llm.name(), "LLM client ready");

    if config.metrics_enabled {
        spawn_metrics_server(Arc::clone(&metrics), config.metrics_addr).await?;
    }

    let config = Arc::new(config);
    let pipeline = RetrievalPipeline::new(
        &config,
        Arc::new(store),
        embedder,
        llm,
        Arc::clone(&metrics),
    );

    let state = Arc::new(AppState {
        config,
        pipeline: Arc::new(pipeline),
    });
    serve(state).await
}
