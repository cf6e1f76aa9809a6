use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{env, net::SocketAddr, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    OpenAi,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: SocketAddr,

    // Fusion and selection
    pub rrf_k: f32,
    pub mmr_lambda: f32,
    pub mmr_sim_threshold: f32,
    pub default_k: usize,
    pub max_k: usize,
    pub oversample_factor: usize,
    pub signal_timeout_ms: u64,

    // Graph expansion
    pub graph_enabled: bool,
    pub graph_max_hops: usize,
    pub graph_max_nodes: usize,
    pub graph_seeds: usize,
    pub graph_signal_weight: f32,
    pub graph_timeout_ms: u64,

    // Rerank
    pub rerank_enabled: bool,
    pub rerank_depth: usize,
    pub rerank_timeout_ms: u64,

    // Context assembly
    pub context_token_budget: usize,
    pub token_encoding: String,

    // Query expansion
    pub expansion_enabled: bool,
    pub max_sub_questions: usize,
    pub expansion_timeout_ms: u64,

    // Answer generation
    pub generation_enabled: bool,
    pub generation_timeout_ms: u64,

    // LLM provider
    pub llm_backend: LlmBackend,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_max_tokens: usize,
    pub llm_temperature: f32,

    // Store
    pub embedding_dim: usize,
    pub corpus_path: Option<PathBuf>,

    // Metrics
    pub metrics_enabled: bool,
    pub metrics_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = optional_env("BIND_ADDR")
            .as_deref()
            .map(parse_addr)
            .transpose()?
            .unwrap_or_else(default_bind_addr);

        let rrf_k = optional_env("RRF_K")
            .as_deref()
            .map(parse_positive_f32)
            .transpose()?
            .unwrap_or(60.0);

        let mmr_lambda = optional_env("MMR_LAMBDA")
            .as_deref()
            .map(parse_unit_f32)
            .transpose()?
            .unwrap_or(0.7);

        let mmr_sim_threshold = optional_env("MMR_SIM_THRESHOLD")
            .as_deref()
            .map(parse_unit_f32)
            .transpose()?
            .unwrap_or(0.95);

        let default_k = optional_env("DEFAULT_K")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(10);

        let max_k = optional_env("MAX_K")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(50);

        if default_k == 0 || max_k == 0 {
            return Err(anyhow!("DEFAULT_K and MAX_K must be at least 1"));
        }

        let oversample_factor = optional_env("OVERSAMPLE_FACTOR")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(2)
            .max(1);

        let signal_timeout_ms = optional_env("SIGNAL_TIMEOUT_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(2_000);

        let graph_enabled = optional_env("GRAPH_ENABLED")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(true);

        let graph_max_hops = optional_env("GRAPH_MAX_HOPS")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(2);

        let graph_max_nodes = optional_env("GRAPH_MAX_NODES")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(64);

        let graph_seeds = optional_env("GRAPH_SEEDS")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(5);

        let graph_signal_weight = optional_env("GRAPH_SIGNAL_WEIGHT")
            .as_deref()
            .map(parse_unit_f32)
            .transpose()?
            .unwrap_or(0.4);

        let graph_timeout_ms = optional_env("GRAPH_TIMEOUT_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(1_000);

        let rerank_enabled = optional_env("RERANK_ENABLED")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(true);

        let rerank_depth = optional_env("RERANK_DEPTH")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(20);

        let rerank_timeout_ms = optional_env("RERANK_TIMEOUT_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(4_000);

        let context_token_budget = optional_env("CONTEXT_TOKEN_BUDGET")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(4_000);

        let token_encoding =
            optional_env("TOKENIZER_ENCODING").unwrap_or_else(|| "o200k_base".to_string());

        let expansion_enabled = optional_env("EXPANSION_ENABLED")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(false);

        let max_sub_questions = optional_env("MAX_SUB_QUESTIONS")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(3);

        let expansion_timeout_ms = optional_env("EXPANSION_TIMEOUT_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(3_000);

        let generation_enabled = optional_env("GENERATION_ENABLED")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(false);

        let generation_timeout_ms = optional_env("GENERATION_TIMEOUT_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(30_000);

        let llm_backend = optional_env("LLM_BACKEND")
            .as_deref()
            .map(parse_llm_backend)
            .transpose()?
            .unwrap_or(LlmBackend::Mock);

        let llm_base_url = optional_env("LLM_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let llm_api_key = optional_env("LLM_API_KEY");
        let llm_model = optional_env("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        let llm_max_tokens = optional_env("LLM_MAX_TOKENS")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(1_024);

        let llm_temperature = optional_env("LLM_TEMPERATURE")
            .as_deref()
            .map(parse_any_f32)
            .transpose()?
            .unwrap_or(0.0);

        let embedding_dim = optional_env("EMBEDDING_DIM")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(256);

        let corpus_path = optional_env("CORPUS_PATH").map(PathBuf::from);

        let metrics_enabled = optional_env("METRICS_ENABLED")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(false);

        let metrics_addr = optional_env("METRICS_ADDR")
            .as_deref()
            .map(parse_addr)
            .transpose()?
            .unwrap_or_else(default_metrics_addr);

        Ok(Self {
            bind_addr,
            rrf_k,
            mmr_lambda,
            mmr_sim_threshold,
            default_k,
            max_k,
            oversample_factor,
            signal_timeout_ms,
            graph_enabled,
            graph_max_hops,
            graph_max_nodes,
            graph_seeds,
            graph_signal_weight,
            graph_timeout_ms,
            rerank_enabled,
            rerank_depth,
            rerank_timeout_ms,
            context_token_budget,
            token_encoding,
            expansion_enabled,
            max_sub_questions,
            expansion_timeout_ms,
            generation_enabled,
            generation_timeout_ms,
            llm_backend,
            llm_base_url,
            llm_api_key,
            llm_model,
            llm_max_tokens,
            llm_temperature,
            embedding_dim,
            corpus_path,
            metrics_enabled,
            metrics_addr,
        })
    }

    /// Clamp a requested result limit into `[1, max_k]`, falling back to
    /// `default_k` when absent.
    pub fn clamp_k(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_k).clamp(1, self.max_k)
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap_or_else(|_| unreachable!())
}

fn default_metrics_addr() -> SocketAddr {
    "127.0.0.1:9091".parse().unwrap_or_else(|_| unreachable!())
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

fn parse_addr(value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse::<SocketAddr>()
        .map_err(|err| anyhow!("Invalid socket address '{value}': {err}"))
}

fn parse_llm_backend(value: &str) -> Result<LlmBackend> {
    match value.trim().to_lowercase().as_str() {
        "openai" => Ok(LlmBackend::OpenAi),
        "mock" => Ok(LlmBackend::Mock),
        other => Err(anyhow!(
            "Invalid LLM_BACKEND: {other} (expected openai or mock)"
        )),
    }
}

fn parse_usize(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_unit_f32(value: &str) -> Result<f32> {
    let v = parse_any_f32(value)?;
    if !(0.0..=1.0).contains(&v) {
        return Err(anyhow!("Value must be in 0..=1, got {v}"));
    }
    Ok(v)
}

fn parse_positive_f32(value: &str) -> Result<f32> {
    let v = parse_any_f32(value)?;
    if v <= 0.0 {
        return Err(anyhow!("Value must be positive, got {v}"));
    }
    Ok(v)
}

fn parse_any_f32(value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|err| anyhow!("Invalid float '{value}': {err}"))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(anyhow!("Invalid boolean '{other}'")),
    }
}
