//! HTTP query surface: validation, dispatch, and response shaping.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::context::{Citation, ContextItem};
use crate::error::PipelineError;
use crate::retrieval::{RetrievalPipeline, RetrievalRequest};
use crate::store::StoreFilters;
use crate::stream::{ndjson_line, session_channel};

pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<RetrievalPipeline>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub filters: RequestFilters,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default = "default_true")]
    pub expand_graph: bool,
}

/// Recognized filter keys. Unknown keys in the request's `filters` object
/// are dropped, not rejected.
#[derive(Debug, Default, Deserialize)]
pub struct RequestFilters {
    #[serde(default)]
    pub collection: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<ContextItem>,
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "query server listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    let pipeline_request = match to_pipeline_request(&state.config, &request) {
        Ok(r) => r,
        Err(err) => return err.into_response(),
    };

    if request.stream {
        return stream_response(&state, pipeline_request);
    }

    match state.pipeline.retrieve(&pipeline_request).await {
        Ok(outcome) => {
            let answer = state
                .pipeline
                .answer(&pipeline_request.query, &outcome.context)
                .await;
            Json(QueryResponse {
                citations: outcome.context.citations(),
                results: outcome.context.items,
                answer,
            })
            .into_response()
        }
        Err(err) => err.into_response(),
    }
}

fn to_pipeline_request(
    config: &Config,
    request: &QueryRequest,
) -> Result<RetrievalRequest, PipelineError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(PipelineError::InvalidRequest {
            message: "query must not be empty".to_string(),
        });
    }

    Ok(RetrievalRequest {
        query: query.to_string(),
        k: config.clamp_k(request.k),
        filters: StoreFilters {
            collection: request.filters.collection.clone(),
        },
        rerank: request.rerank,
        expand_graph: request.expand_graph,
    })
}

/// NDJSON response backed by one session task. Dropping the connection
/// drops the receiver, which cancels the session.
fn stream_response(state: &Arc<AppState>, request: RetrievalRequest) -> Response {
    let (sink, rx) = session_channel();
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        pipeline.run_session(request, sink).await;
    });

    let body = Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(ndjson_line(&event)), rx))
    }));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .unwrap()
}
