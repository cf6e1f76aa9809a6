//! LLM client used for query expansion, reranking, and answer generation.
//!
//! Two backends: an OpenAI-compatible HTTP client (works with any server
//! exposing the `/chat/completions` shape) and a deterministic mock for
//! offline runs and tests. Pipeline stages that call the LLM wrap these
//! calls in their own timeouts, so the client itself stays timeout-free.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::{Config, LlmBackend};

/// Stream of answer text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-shot completion. Used for expansion and reranking.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Streaming completion yielding text deltas as they arrive.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TextStream>;

    fn name(&self) -> &'static str;
}

pub fn build_llm_client(config: &Config) -> Arc<dyn LlmClient> {
    match config.llm_backend {
        LlmBackend::OpenAi => Arc::new(OpenAiClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        )),
        LlmBackend::Mock => Arc::new(MockLlm::new()),
    }
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("API key is not a valid header value")?,
            );
        }
        Ok(headers)
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self
            .client
            .post(self.completions_url())
            .headers(self.build_headers()?)
            .json(&self.build_body(request, false))
            .send()
            .await
            .context("chat completion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("chat completion returned {status}: {body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to decode chat completion response")?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let response = self
            .client
            .post(self.completions_url())
            .headers(self.build_headers()?)
            .json(&self.build_body(request, true))
            .send()
            .await
            .context("streaming chat completion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("streaming chat completion returned {status}: {body}");
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream())))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Find the end of the first complete SSE message, returning the offset of
/// the blank-line delimiter and its length. Handles LF and CRLF framing.
fn find_message_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_sse_message(message: &str) -> SseEvent {
    for line in message.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return SseEvent::Done;
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                if let Some(content) = chunk
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.as_ref())
                {
                    if !content.is_empty() {
                        return SseEvent::Delta(content.clone());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed stream chunk");
            }
        }
    }
    SseEvent::Skip
}

/// Turn the raw byte stream of an SSE response into a stream of text deltas.
/// Only complete messages are decoded, so multi-byte characters split across
/// network reads are reassembled before parsing.
fn parse_sse_stream<S>(stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (stream, Vec::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                // Drain buffered messages before reading more bytes.
                if let Some((pos, delim)) = find_message_boundary(&buffer) {
                    let message: Vec<u8> = buffer.drain(..pos + delim).collect();
                    let text = String::from_utf8_lossy(&message[..pos]).into_owned();
                    match parse_sse_message(&text) {
                        SseEvent::Delta(delta) => return Some((Ok(delta), (stream, buffer))),
                        SseEvent::Done => return None,
                        SseEvent::Skip => continue,
                    }
                }
                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(err)) => {
                        let err = anyhow::Error::new(err).context("answer stream interrupted");
                        return Some((Err(err), (stream, buffer)));
                    }
                    None => return None,
                }
            }
        },
    )
}

const DEFAULT_MOCK_RESPONSE: &str = "Simulated model response.";

/// Deterministic in-process backend. Serves scripted responses in FIFO order
/// when any are queued, a canned line otherwise.
#[derive(Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I>(responses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.lock_queue().push_back(response.into());
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_response(&self) -> String {
        self.lock_queue()
            .pop_front()
            .unwrap_or_else(|| DEFAULT_MOCK_RESPONSE.to_string())
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(self.next_response())
    }

    async fn complete_stream(&self, _request: &CompletionRequest) -> Result<TextStream> {
        let response = self.next_response();
        // Split into word-sized deltas that reassemble to the full response.
        let mut deltas = Vec::new();
        let mut rest = response.as_str();
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(rest.len());
            deltas.push(Ok(rest[..cut].to_string()));
            rest = &rest[cut..];
        }
        Ok(Box::pin(futures::stream::iter(deltas)))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system: None,
            prompt: prompt.to_string(),
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn mock_serves_scripted_responses_in_order() {
        let llm = MockLlm::with_responses(["first", "second"]);
        assert_eq!(llm.complete(&request("a")).await.unwrap(), "first");
        assert_eq!(llm.complete(&request("b")).await.unwrap(), "second");
        assert_eq!(llm.complete(&request("c")).await.unwrap(), DEFAULT_MOCK_RESPONSE);
    }

    #[tokio::test]
    async fn mock_stream_reassembles_to_the_full_response() {
        let llm = MockLlm::with_responses(["alpha beta  gamma"]);
        let mut stream = llm.complete_stream(&request("q")).await.unwrap();
        let mut assembled = String::new();
        let mut deltas = 0;
        while let Some(delta) = stream.next().await {
            assembled.push_str(&delta.unwrap());
            deltas += 1;
        }
        assert_eq!(assembled, "alpha beta  gamma");
        assert!(deltas > 1);
    }

    #[test]
    fn sse_message_with_delta_content() {
        let message = r#"data: {"choices":[{"delta":{"content":"hello"}}]}"#;
        match parse_sse_message(message) {
            SseEvent::Delta(text) => assert_eq!(text, "hello"),
            _ => panic!("expected a delta"),
        }
    }

    #[test]
    fn sse_done_marker_ends_the_stream() {
        assert!(matches!(parse_sse_message("data: [DONE]"), SseEvent::Done));
    }

    #[test]
    fn malformed_sse_payloads_are_skipped() {
        assert!(matches!(parse_sse_message("data: {not json"), SseEvent::Skip));
        assert!(matches!(parse_sse_message(": keep-alive"), SseEvent::Skip));
        let empty = r#"data: {"choices":[{"delta":{}}]}"#;
        assert!(matches!(parse_sse_message(empty), SseEvent::Skip));
    }

    #[test]
    fn message_boundary_handles_lf_and_crlf() {
        assert_eq!(find_message_boundary(b"data: a\n\ndata: b"), Some((7, 2)));
        assert_eq!(find_message_boundary(b"data: a\r\n\r\nrest"), Some((7, 4)));
        assert_eq!(find_message_boundary(b"data: partial"), None);
    }

    #[tokio::test]
    async fn byte_stream_parsing_splits_messages_across_reads() {
        let frames: Vec<std::result::Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"he",
            )),
            Ok(bytes::Bytes::from_static(b"llo\"}}]}\n\ndata: [DONE]\n\n")),
        ];
        let mut stream = Box::pin(parse_sse_stream(futures::stream::iter(frames)));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "hello");
        assert!(stream.next().await.is_none());
    }
}
