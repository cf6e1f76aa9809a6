//! Stream event vocabulary and the producer-side sink.
//!
//! One query session emits events strictly in the order
//! `retrieval_start → retrieval_result → generation_chunk* → done`, or ends
//! early with `error`. Events travel through a bounded channel from the
//! pipeline to the HTTP emitter; when the client goes away the emitter drops
//! the receiver, the next `emit` fails, and the session unwinds, cancelling
//! whatever work was still in flight.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::{Citation, ContextItem};
use crate::error::PipelineError;

/// Default bound for the session event channel. Small on purpose: the
/// producer should feel backpressure from a slow consumer instead of
/// buffering a whole answer.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    RetrievalStart {
        query: String,
    },
    RetrievalResult {
        results: Vec<ContextItem>,
        total_tokens: usize,
    },
    GenerationChunk {
        delta: String,
    },
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
        citations: Vec<Citation>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl StreamEvent {
    pub fn error(err: &PipelineError) -> Self {
        StreamEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// Serialize one event as a newline-delimited JSON line.
pub fn ndjson_line(event: &StreamEvent) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_else(|err| {
        // Only reachable if an event ever carries a non-serializable value.
        tracing::error!(error = %err, "failed to serialize stream event");
        r#"{"type":"error","code":"INTERNAL","message":"event serialization failed"}"#.to_string()
    });
    line.push('\n');
    line
}

/// Producer handle for one session's event sequence.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Deliver an event to the emitter. Fails with `ClientDisconnected` once
    /// the consumer is gone, which is the session's cancellation signal.
    pub async fn emit(&self, event: StreamEvent) -> Result<(), PipelineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::ClientDisconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer is gone. Raced against pipeline stages so
    /// a disconnect cancels in-flight work instead of letting it run out.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

pub fn session_channel() -> (EventSink, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSink { tx }, rx)
}
