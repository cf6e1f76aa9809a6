//! CLI argument parsing and help text

pub fn wants_help(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .any(|a| a == "-h" || a == "--help" || a == "help")
}

pub fn wants_version(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .any(|a| a == "-V" || a == "--version" || a == "version")
}

pub fn print_help() {
    println!("context-retrieval-server");
    println!();
    println!("HTTP server for hybrid retrieval and token-budgeted context assembly.");
    println!();
    println!("Usage:");
    println!("  context-retrieval-server");
    println!("  context-retrieval-server --help");
    println!("  context-retrieval-server --version");
    println!();
    println!("Common env (defaults shown):");
    println!("  BIND_ADDR=127.0.0.1:8080");
    println!("  CORPUS_PATH=/path/to/corpus.json      (optional; server starts empty without it)");
    println!("  DEFAULT_K=10");
    println!("  MAX_K=50");
    println!("  RRF_K=60.0");
    println!("  MMR_LAMBDA=0.7");
    println!("  CONTEXT_TOKEN_BUDGET=4000");
    println!("  TOKENIZER_ENCODING=o200k_base");
    println!("  SIGNAL_TIMEOUT_MS=2000");
    println!("  GRAPH_ENABLED=true  GRAPH_MAX_HOPS=2  GRAPH_MAX_NODES=64");
    println!("  RERANK_ENABLED=true  RERANK_DEPTH=20  RERANK_TIMEOUT_MS=4000");
    println!("  EXPANSION_ENABLED=false  MAX_SUB_QUESTIONS=3");
    println!("  GENERATION_ENABLED=false  GENERATION_TIMEOUT_MS=30000");
    println!("  LLM_BACKEND=openai|mock              (default: mock)");
    println!("  LLM_BASE_URL=https://api.openai.com/v1");
    println!("  LLM_API_KEY=sk-...                   (optional for local gateways)");
    println!("  LLM_MODEL=gpt-4o-mini");
    println!("  METRICS_ENABLED=false  METRICS_ADDR=127.0.0.1:9091");
    println!();
    println!("Endpoints:");
    println!("  POST /query   retrieval (JSON) or retrieval+generation stream (NDJSON)");
    println!("  GET  /health  liveness probe");
}

pub fn print_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}
