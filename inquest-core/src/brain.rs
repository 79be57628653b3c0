//! Brain module: generation provider abstraction and structured output.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and the
//! `Brain`, which turns free-form completions into validated, typed results
//! for each research role.

use crate::config::{InquestConfig, ModelsConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Trait for generation providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// The research role a generation call serves. Each role may use its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    QueryGenerator,
    Summarizer,
    Reflection,
    Answer,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::QueryGenerator => "query_generator",
            ModelRole::Summarizer => "summarizer",
            ModelRole::Reflection => "reflection",
            ModelRole::Answer => "answer",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed result a generation call must produce.
///
/// `SCHEMA` is shown to the model verbatim; `validate` rejects values that parse
/// but break the contract.
pub trait StructuredOutput: DeserializeOwned + Send {
    const NAME: &'static str;
    const SCHEMA: &'static str;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Locate the JSON object in a model reply.
///
/// Accepts a bare object, an object inside a markdown code fence, or an object
/// surrounded by prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(fence_end) = body.find("```") {
            let inner = body[..fence_end].trim();
            if inner.starts_with('{') && inner.ends_with('}') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse and validate a reply against `T`'s contract.
pub fn parse_structured<T: StructuredOutput>(text: &str) -> Result<T, LlmError> {
    let json = extract_json_object(text).ok_or_else(|| LlmError::ResponseParse {
        message: format!("no JSON object in {} reply", T::NAME),
    })?;
    let value: T = serde_json::from_str(json).map_err(|e| LlmError::SchemaViolation {
        schema: T::NAME.to_string(),
        reason: e.to_string(),
    })?;
    value.validate().map_err(|reason| LlmError::SchemaViolation {
        schema: T::NAME.to_string(),
        reason,
    })?;
    Ok(value)
}

/// The Brain wraps a provider and adds role-aware model selection, schema
/// prompting, reply validation and usage tracking.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    models: ModelsConfig,
    default_model: String,
    temperature: f32,
    max_tokens: Option<usize>,
    /// This brain's own usage first, then the usage of every brain it was
    /// forked from.
    usage: Vec<Arc<Mutex<TokenUsage>>>,
}

impl Brain {
    /// A brain that uses the provider's own model for every role.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let default_model = provider.model_name().to_string();
        Self {
            provider,
            models: ModelsConfig::default(),
            default_model,
            temperature: 1.0,
            max_tokens: None,
            usage: vec![Arc::default()],
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &InquestConfig) -> Self {
        Self {
            provider,
            models: config.models.clone(),
            default_model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: Some(config.llm.max_tokens),
            usage: vec![Arc::default()],
        }
    }

    /// A brain with the same provider and settings whose usage counter starts
    /// at zero. Usage tracked by the fork also counts toward this brain.
    pub fn fork(&self) -> Self {
        let mut usage = Vec::with_capacity(self.usage.len() + 1);
        usage.push(Arc::default());
        usage.extend(self.usage.iter().cloned());
        Self {
            provider: self.provider.clone(),
            models: self.models.clone(),
            default_model: self.default_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            usage,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Resolve the model for a role.
    pub fn model_for(&self, role: ModelRole) -> &str {
        self.models.resolve(role, &self.default_model)
    }

    /// Run a generation call whose reply must satisfy `T`'s schema.
    pub async fn generate_structured<T: StructuredOutput>(
        &self,
        role: ModelRole,
        instructions: &str,
        prompt: &str,
    ) -> Result<T, LlmError> {
        let system = format!(
            "{instructions}\n\nRespond with a single JSON object and nothing else. \
             It must match this schema:\n{}",
            T::SCHEMA
        );
        let model = self.model_for(role).to_string();
        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(prompt)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: Some(model.clone()),
            json_output: true,
        };

        debug!(role = %role, model = model.as_str(), schema = T::NAME, "Sending structured request");
        let response = self.provider.complete(request).await?;
        self.track_usage(&response.usage);

        parse_structured::<T>(response.text()).inspect_err(|e| {
            warn!(role = %role, schema = T::NAME, error = %e, "Structured reply rejected");
        })
    }

    pub fn track_usage(&self, usage: &TokenUsage) {
        for counter in &self.usage {
            counter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .accumulate(usage);
        }
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.usage
            .first()
            .map(|counter| *counter.lock().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or_default()
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// A scripted provider for tests: replays queued replies in order, or routes
/// every request through a responder closure.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request by calling `responder`, ignoring the queue.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push_back(Ok(response));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push_back(Err(error));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(responder) = &self.responder {
            return responder(&request).map(|text| Self::text_response(&text));
        }

        self.lock_responses().pop_front().unwrap_or_else(|| {
            Err(LlmError::ApiRequest {
                message: "mock provider has no queued responses".to_string(),
            })
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
        reason: String,
    }

    impl StructuredOutput for Verdict {
        const NAME: &'static str = "verdict";
        const SCHEMA: &'static str = r#"{"ok": bool, "reason": string}"#;

        fn validate(&self) -> Result<(), String> {
            if self.reason.is_empty() {
                return Err("reason must not be empty".into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_extract_json_bare() {
        assert_eq!(extract_json_object(" {\"a\": 1} "), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_fenced() {
        let text = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nanything else?";
        assert_eq!(extract_json_object(text), Some("{\"a\": [1, 2]}"));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Sure! {\"ok\": true, \"reason\": \"x\"} Hope this helps.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"ok\": true, \"reason\": \"x\"}")
        );
    }

    #[test]
    fn test_extract_json_missing() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_parse_structured_rejects_invalid() {
        let err = parse_structured::<Verdict>(r#"{"ok": true, "reason": ""}"#).unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation { .. }));

        let err = parse_structured::<Verdict>(r#"{"ok": "yes"}"#).unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation { .. }));

        let err = parse_structured::<Verdict>("plain text").unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[tokio::test]
    async fn test_mock_provider_queue_order() {
        let provider = MockLlmProvider::new();
        provider.queue_text("first");
        provider.queue_text("second");

        let r1 = provider.complete(CompletionRequest::default()).await.unwrap();
        let r2 = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(r1.text(), "first");
        assert_eq!(r2.text(), "second");
        assert!(provider.complete(CompletionRequest::default()).await.is_err());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_generate_structured_uses_role_model_and_schema() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("```json\n{\"ok\": true, \"reason\": \"enough\"}\n```");

        let mut config = InquestConfig::default();
        config.models.reflection_model = Some("reflector-1".into());
        let brain = Brain::from_config(provider.clone(), &config);

        let verdict: Verdict = brain
            .generate_structured(ModelRole::Reflection, "Judge it.", "summaries")
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Verdict {
                ok: true,
                reason: "enough".into()
            }
        );

        let request = &provider.requests()[0];
        assert_eq!(request.model.as_deref(), Some("reflector-1"));
        assert!(request.json_output);
        assert!(request.system_prompt().unwrap().contains(Verdict::SCHEMA));
        assert_eq!(request.user_text(), "summaries");
        assert_eq!(brain.total_usage().input_tokens, 100);
    }

    #[tokio::test]
    async fn test_fork_counts_its_own_usage() {
        let provider = Arc::new(MockLlmProvider::new());
        for _ in 0..3 {
            provider.queue_text(r#"{"ok": true, "reason": "r"}"#);
        }
        let brain = Brain::new(provider);
        let first = brain.fork();
        let second = brain.fork();

        first
            .generate_structured::<Verdict>(ModelRole::Answer, "x", "y")
            .await
            .unwrap();
        second
            .generate_structured::<Verdict>(ModelRole::Answer, "x", "y")
            .await
            .unwrap();
        second
            .generate_structured::<Verdict>(ModelRole::Answer, "x", "y")
            .await
            .unwrap();

        assert_eq!(first.total_usage().total(), 150);
        assert_eq!(second.total_usage().total(), 300);
        assert_eq!(brain.total_usage().total(), 450);
        assert_eq!(second.fork().total_usage(), TokenUsage::default());
    }

    #[tokio::test]
    async fn test_generate_structured_propagates_provider_error() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::Timeout { timeout_secs: 5 });
        let brain = Brain::new(provider);
        let result = brain
            .generate_structured::<Verdict>(ModelRole::Answer, "x", "y")
            .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_responder_routes_by_prompt() {
        let provider = MockLlmProvider::with_responder(|req| {
            if req.user_text().contains("ping") {
                Ok("pong".into())
            } else {
                Err(LlmError::ApiRequest {
                    message: "unexpected".into(),
                })
            }
        });
        let ping = CompletionRequest {
            messages: vec![Message::user("ping")],
            ..Default::default()
        };
        assert_eq!(provider.complete(ping).await.unwrap().text(), "pong");
        assert!(provider.complete(CompletionRequest::default()).await.is_err());
    }

    #[test]
    fn test_model_for_defaults_to_provider_model() {
        let brain = Brain::new(Arc::new(MockLlmProvider::new()));
        assert_eq!(brain.model_for(ModelRole::QueryGenerator), "mock-model");
    }
}
