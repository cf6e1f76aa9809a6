//! Query planning: normalization plus optional LLM expansion.
//!
//! The plan always contains the normalized original query. When expansion is
//! enabled it may add atomic sub-questions and one hypothetical document,
//! both produced by the LLM. Expansion is best-effort: a failure or timeout
//! on either call degrades to whatever the other produced, never to an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;
use crate::error::PipelineError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrigin {
    Original,
    SubQuestion,
    Hypothetical,
}

impl QueryOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            QueryOrigin::Original => "original",
            QueryOrigin::SubQuestion => "sub_question",
            QueryOrigin::Hypothetical => "hypothetical",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    pub text: String,
    pub origin: QueryOrigin,
}

pub struct QueryPlanner {
    llm: Arc<dyn LlmClient>,
    enabled: bool,
    max_sub_questions: usize,
    timeout: Duration,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct DecomposeResponse {
    #[serde(default)]
    questions: Vec<String>,
}

impl QueryPlanner {
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            enabled: config.expansion_enabled,
            max_sub_questions: config.max_sub_questions,
            timeout: Duration::from_millis(config.expansion_timeout_ms),
            max_tokens: config.llm_max_tokens,
        }
    }

    /// Build the expansion set for a raw user query.
    pub async fn plan(&self, query: &str) -> Result<Vec<ExpandedQuery>, PipelineError> {
        let normalized = text::normalize_query(query);
        if normalized.is_empty() {
            return Err(PipelineError::PlanningFailed {
                message: "query is empty after normalization".to_string(),
            });
        }

        let mut queries = vec![ExpandedQuery {
            text: normalized.clone(),
            origin: QueryOrigin::Original,
        }];
        if !self.enabled {
            return Ok(queries);
        }

        let (sub_questions, hypothetical) = tokio::join!(
            self.decompose(&normalized),
            self.hypothetical_document(&normalized),
        );

        for question in sub_questions {
            if queries.iter().any(|q| q.text == question) {
                continue;
            }
            queries.push(ExpandedQuery {
                text: question,
                origin: QueryOrigin::SubQuestion,
            });
        }
        if let Some(doc) = hypothetical {
            queries.push(ExpandedQuery {
                text: doc,
                origin: QueryOrigin::Hypothetical,
            });
        }
        Ok(queries)
    }

    async fn decompose(&self, query: &str) -> Vec<String> {
        let request = CompletionRequest {
            system: Some("You are a query planning assistant.".to_string()),
            prompt: format!(
                "Decompose this question into at most {} atomic sub-questions.\n\
                 Question: {query}\n\n\
                 Return JSON: {{\"questions\": [\"...\"]}}",
                self.max_sub_questions
            ),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = match tokio::time::timeout(self.timeout, self.llm.complete(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "query decomposition failed");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "query decomposition timed out");
                return Vec::new();
            }
        };

        let body = text::strip_code_fences(&response);
        let parsed: DecomposeResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "query decomposition returned unparseable output");
                return Vec::new();
            }
        };

        let mut questions = Vec::new();
        for raw in parsed.questions {
            let question = text::normalize_query(&raw);
            if question.is_empty() || questions.contains(&question) {
                continue;
            }
            questions.push(question);
            if questions.len() >= self.max_sub_questions {
                break;
            }
        }
        questions
    }

    async fn hypothetical_document(&self, query: &str) -> Option<String> {
        let request = CompletionRequest {
            system: None,
            prompt: format!(
                "Write a short hypothetical passage that would answer this question:\n\
                 Question: {query}\n\n\
                 Passage:"
            ),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = match tokio::time::timeout(self.timeout, self.llm.complete(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "hypothetical document generation failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "hypothetical document generation timed out");
                return None;
            }
        };

        let doc = text::strip_code_fences(response.trim()).trim().to_string();
        if doc.is_empty() {
            None
        } else {
            Some(doc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn planner_with(llm: Arc<dyn LlmClient>, enabled: bool, max_sub_questions: usize) -> QueryPlanner {
        QueryPlanner {
            llm,
            enabled,
            max_sub_questions,
            timeout: Duration::from_millis(200),
            max_tokens: 128,
        }
    }

    #[tokio::test]
    async fn empty_query_is_a_planning_error() {
        let planner = planner_with(Arc::new(MockLlm::new()), false, 3);
        let err = planner.plan("   \t  ").await.unwrap_err();
        assert!(matches!(err, PipelineError::PlanningFailed { .. }));
    }

    #[tokio::test]
    async fn disabled_expansion_yields_only_the_normalized_original() {
        let planner = planner_with(Arc::new(MockLlm::new()), false, 3);
        let plan = planner.plan("  how   does\tcompaction work ").await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].text, "how does compaction work");
        assert_eq!(plan[0].origin, QueryOrigin::Original);
    }

    #[tokio::test]
    async fn expansion_adds_sub_questions_and_hypothetical_document() {
        // MockLlm serves FIFO: decomposition is awaited first, then HyDE.
        let llm = MockLlm::with_responses([
            r#"{"questions": ["what is a memtable", "when does a flush trigger"]}"#,
            "A memtable is the in-memory write buffer that is flushed to disk.",
        ]);
        let planner = planner_with(Arc::new(llm), true, 3);
        let plan = planner.plan("how does compaction work").await.unwrap();

        let origins: Vec<QueryOrigin> = plan.iter().map(|q| q.origin).collect();
        assert_eq!(
            origins,
            vec![
                QueryOrigin::Original,
                QueryOrigin::SubQuestion,
                QueryOrigin::SubQuestion,
                QueryOrigin::Hypothetical,
            ]
        );
        assert_eq!(plan[1].text, "what is a memtable");
        assert_eq!(plan[3].text, "A memtable is the in-memory write buffer that is flushed to disk.");
    }

    #[tokio::test]
    async fn unparseable_decomposition_is_absorbed() {
        let llm = MockLlm::with_responses(["this is not json", "still a useful passage"]);
        let planner = planner_with(Arc::new(llm), true, 3);
        let plan = planner.plan("query").await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].origin, QueryOrigin::Original);
        assert_eq!(plan[1].origin, QueryOrigin::Hypothetical);
    }

    #[tokio::test]
    async fn fenced_json_decomposition_is_accepted() {
        let llm = MockLlm::with_responses([
            "```json\n{\"questions\": [\"q one\"]}\n```",
            "",
        ]);
        let planner = planner_with(Arc::new(llm), true, 3);
        let plan = planner.plan("query").await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].text, "q one");
        assert_eq!(plan[1].origin, QueryOrigin::SubQuestion);
    }

    #[tokio::test]
    async fn sub_questions_are_capped_and_deduplicated() {
        let llm = MockLlm::with_responses([
            r#"{"questions": ["a", "a", "query", "b", "c", "d"]}"#,
            "",
        ]);
        let planner = planner_with(Arc::new(llm), true, 2);
        let plan = planner.plan("query").await.unwrap();
        // Original plus two capped sub-questions; the duplicate of the
        // original is dropped after the cap is applied.
        let texts: Vec<&str> = plan.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["query", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_expansion_degrades_to_the_original_query() {
        struct SlowLlm;

        #[async_trait::async_trait]
        impl LlmClient for SlowLlm {
            async fn complete(&self, _request: &CompletionRequest) -> anyhow::Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".to_string())
            }

            async fn complete_stream(
                &self,
                _request: &CompletionRequest,
            ) -> anyhow::Result<crate::llm::TextStream> {
                anyhow::bail!("not used")
            }

            fn name(&self) -> &'static str {
                "slow"
            }
        }

        let planner = planner_with(Arc::new(SlowLlm), true, 3);
        let plan = planner.plan("query").await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].origin, QueryOrigin::Original);
    }
}
