//! Request handling around the research engine: validate, run, persist.

use crate::error::{ConfigError, FailureKind, InquestError, ResearchError};
use crate::research::ResearchEngine;
use crate::storage::ArtifactSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A caller's research request. Missing fields deserialize as empty and are
/// caught by [`ResearchRequest::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchRequest {
    pub user_id: String,
    pub research_id: String,
    pub research_topic: String,
}

impl ResearchRequest {
    pub fn new(
        user_id: impl Into<String>,
        research_id: impl Into<String>,
        research_topic: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            research_id: research_id.into(),
            research_topic: research_topic.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("user_id", &self.user_id),
            ("research_id", &self.research_id),
            ("research_topic", &self.research_topic),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Key the rendered report is stored under.
    pub fn artifact_key(&self) -> String {
        format!("{}/{}-research.md", self.research_id, self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub research_id: String,
    pub research_topic: String,
    pub research_content: String,
}

/// Body of an invocation reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationBody {
    Message { message: String },
    Error { error: String, kind: FailureKind },
}

/// What the synchronous invocation surface returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOutcome {
    pub status_code: u16,
    pub body: InvocationBody,
}

impl InvocationOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            body: InvocationBody::Message {
                message: message.into(),
            },
        }
    }

    /// 400 for bad input, 500 for everything else.
    pub fn failure(error: &InquestError) -> Self {
        let kind = error.kind();
        let status_code = match kind {
            FailureKind::ConfigurationError => 400,
            _ => 500,
        };
        Self {
            status_code,
            body: InvocationBody::Error {
                error: error.to_string(),
                kind,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

pub struct ResearchService {
    engine: Arc<ResearchEngine>,
    sink: Arc<dyn ArtifactSink>,
}

impl ResearchService {
    pub fn new(engine: Arc<ResearchEngine>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { engine, sink }
    }

    pub fn engine(&self) -> &ResearchEngine {
        &self.engine
    }

    /// Run the research for `request` and store the rendered report.
    pub async fn process(
        &self,
        request: &ResearchRequest,
        cancel: CancellationToken,
    ) -> Result<ResearchResponse, InquestError> {
        request.validate()?;
        info!(
            research_id = request.research_id.as_str(),
            user_id = request.user_id.as_str(),
            "Processing research request"
        );

        let run = self.engine.run(&request.research_topic, cancel).await?;
        if run.report.body.trim().is_empty() {
            return Err(ResearchError::Composition {
                message: "report body is empty".to_string(),
            }
            .into());
        }

        let content = run.report.render_markdown();
        let key = request.artifact_key();
        self.sink.store(&content, &key, "text/markdown").await?;
        info!(
            research_id = request.research_id.as_str(),
            key = key.as_str(),
            loop_count = run.loop_count,
            "Processed and stored research"
        );

        Ok(ResearchResponse {
            research_id: request.research_id.clone(),
            research_topic: request.research_topic.clone(),
            research_content: content,
        })
    }

    /// Handle a raw invocation payload. Never returns an error: every failure
    /// becomes an error outcome.
    pub async fn invoke(
        &self,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> InvocationOutcome {
        let result = async {
            let request: ResearchRequest = serde_json::from_value(payload).map_err(|e| {
                InquestError::from(ConfigError::Invalid {
                    message: format!("malformed request: {e}"),
                })
            })?;
            self.process(&request, cancel).await
        }
        .await;

        match result {
            Ok(response) => InvocationOutcome::success(format!(
                "Research completed for investigation: {}",
                response.research_id
            )),
            Err(e) => {
                error!(kind = %e.kind(), error = %e, "Invocation failed");
                InvocationOutcome::failure(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Brain, MockLlmProvider};
    use crate::config::ResearchConfig;
    use crate::search::MockSearchProvider;
    use crate::storage::MemoryArtifactSink;
    use crate::types::CompletionRequest;
    use serde_json::json;

    /// Routes each structured call by its schema name.
    fn scripted_llm() -> MockLlmProvider {
        MockLlmProvider::with_responder(|req: &CompletionRequest| {
            let system = req.system_prompt().unwrap_or_default();
            let reply = if system.contains("\"query\"") {
                r#"{"rationale": "r", "query": ["rust async"]}"#
            } else if system.contains("\"summary\"") {
                r#"{"summary": "Tokio is popular [1]."}"#
            } else if system.contains("\"is_sufficient\"") {
                r#"{"is_sufficient": true, "knowledge_gap": "", "follow_up_queries": []}"#
            } else {
                r###"{"report": "## Overview\nTokio leads [1]."}"###
            };
            Ok(reply.to_string())
        })
    }

    fn service(sink: Arc<dyn ArtifactSink>) -> ResearchService {
        let brain = Arc::new(Brain::new(Arc::new(scripted_llm())));
        let search = Arc::new(MockSearchProvider::new().with_synthetic_results(2));
        let engine = ResearchEngine::new(brain, search, ResearchConfig::default()).unwrap();
        ResearchService::new(Arc::new(engine), sink)
    }

    #[test]
    fn test_request_validation() {
        assert!(ResearchRequest::new("u", "r", "t").validate().is_ok());
        let err = ResearchRequest::new("u", " ", "t").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "research_id"));
    }

    #[test]
    fn test_artifact_key() {
        assert_eq!(
            ResearchRequest::new("u1", "r9", "t").artifact_key(),
            "r9/u1-research.md"
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = serde_json::to_value(InvocationOutcome::success("done")).unwrap();
        assert_eq!(ok, json!({"statusCode": 200, "body": {"message": "done"}}));

        let err: InquestError = ConfigError::MissingField {
            field: "user_id".into(),
        }
        .into();
        let outcome = serde_json::to_value(InvocationOutcome::failure(&err)).unwrap();
        assert_eq!(outcome["statusCode"], 400);
        assert_eq!(outcome["body"]["kind"], "configuration_error");
    }

    #[tokio::test]
    async fn test_process_stores_markdown() {
        let sink = Arc::new(MemoryArtifactSink::new());
        let response = service(sink.clone())
            .process(
                &ResearchRequest::new("u1", "r1", "Rust async runtimes"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let (content, content_type) = sink.get("r1/u1-research.md").unwrap();
        assert_eq!(content_type, "text/markdown");
        assert_eq!(content, response.research_content);
        assert!(content.starts_with("# Rust async runtimes\n"));
        assert!(content.contains("## Sources"));
    }

    #[tokio::test]
    async fn test_invoke_reports_missing_field() {
        let sink = Arc::new(MemoryArtifactSink::new());
        let outcome = service(sink.clone())
            .invoke(
                json!({"user_id": "u", "research_topic": "t"}),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.status_code, 400);
        assert!(sink.keys().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_reports_storage_failure() {
        let outcome = service(Arc::new(MemoryArtifactSink::rejecting()))
            .invoke(
                json!({"user_id": "u", "research_id": "r", "research_topic": "t"}),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.status_code, 500);
        match outcome.body {
            InvocationBody::Error { kind, .. } => assert_eq!(kind, FailureKind::StorageFailure),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_success_message() {
        let outcome = service(Arc::new(MemoryArtifactSink::new()))
            .invoke(
                json!({"user_id": "u", "research_id": "r7", "research_topic": "t"}),
                CancellationToken::new(),
            )
            .await;
        assert!(outcome.is_success());
        assert_eq!(
            outcome.body,
            InvocationBody::Message {
                message: "Research completed for investigation: r7".into()
            }
        );
    }
}
