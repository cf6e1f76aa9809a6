//! Hybrid retrieval and context assembly engine.
//!
//! One query flows through planning (optional expansion), parallel dense and
//! sparse retrieval, optional graph expansion, reciprocal-rank fusion, MMR
//! diversity selection, optional reranking, and token-budgeted context
//! packing, then out as an ordered stream of events or a single JSON body.

pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod stream;
pub mod text;

pub mod cli;
