//! Anthropic Messages API provider implementation.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `x-api-key` header (not `Authorization: Bearer`)
//! - Required `anthropic-version` header
//! - System message is a top-level `system` field, not in the messages array
//! - No native JSON response mode; the reply is prefilled with `{` instead

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// The default Anthropic API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// The required Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    timeout_secs: u64,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LlmError::AuthFailed {
            provider: format!("Anthropic: env var '{}' not set", config.api_key_env),
        })?;
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let mut messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();
        if request.json_output {
            messages.push(json!({ "role": "assistant", "content": "{" }));
        }

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.min(1.0),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        body
    }

    fn parse_response(body: &Value, prefilled: bool) -> Result<CompletionResponse, LlmError> {
        let model = body["model"].as_str().unwrap_or("unknown").to_string();
        let finish_reason = body["stop_reason"].as_str().map(|s| s.to_string());
        let usage = TokenUsage {
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        };

        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'content' array in response".to_string(),
            })?;

        let mut text: String = blocks
            .iter()
            .filter(|b| b["type"].as_str().unwrap_or("text") == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        if prefilled && !text.trim_start().starts_with('{') {
            text.insert(0, '{');
        }

        Ok(CompletionResponse {
            message: Message::assistant(text),
            usage,
            model,
            finish_reason,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Anthropic".to_string(),
            },
            429 => {
                let retry_after = serde_json::from_str::<Value>(body_text)
                    .ok()
                    .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                    .unwrap_or(30);
                LlmError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
            500..=599 => LlmError::Connection {
                message: format!("HTTP {status} from Anthropic API: {body_text}"),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {status} from Anthropic API: {body_text}"),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/messages", self.base_url);

        debug!(
            model = self.model.as_str(),
            url = url.as_str(),
            "Sending Anthropic completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| super::map_transport_error(e, self.timeout_secs))?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {e}"),
            })?;

        Self::parse_response(&response_json, request.json_output)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> AnthropicProvider {
        let config = LlmConfig {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            ..Default::default()
        };
        AnthropicProvider::new_with_key(&config, "sk-test".into()).unwrap()
    }

    #[test]
    fn test_system_prompt_is_top_level() {
        let request = CompletionRequest {
            messages: vec![Message::system("rules"), Message::user("question")],
            json_output: true,
            ..Default::default()
        };
        let body = provider().build_request_body(&request);
        assert_eq!(body["system"], "rules");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["content"], "{");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_parse_response_restores_prefill() {
        let body = json!({
            "model": "claude-sonnet-4-5",
            "stop_reason": "end_turn",
            "content": [{ "type": "text", "text": "\"ok\": true}" }],
            "usage": { "input_tokens": 10, "output_tokens": 3 }
        });
        let response = AnthropicProvider::parse_response(&body, true).unwrap();
        assert_eq!(response.text(), "{\"ok\": true}");
        assert_eq!(response.usage.input_tokens, 10);

        let plain = AnthropicProvider::parse_response(&body, false).unwrap();
        assert_eq!(plain.text(), "\"ok\": true}");
    }

    #[test]
    fn test_map_http_error() {
        assert!(matches!(
            AnthropicProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            AnthropicProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "{}"),
            LlmError::RateLimited {
                retry_after_secs: 30
            }
        ));
        assert!(matches!(
            AnthropicProvider::map_http_error(reqwest::StatusCode::BAD_GATEWAY, ""),
            LlmError::Connection { .. }
        ));
    }

    #[tokio::test]
    async fn test_complete_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-sonnet-4-5",
                "content": [{ "type": "text", "text": "answer" }],
                "usage": { "input_tokens": 1, "output_tokens": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = LlmConfig {
            base_url: Some(format!("{}/v1", server.uri())),
            ..Default::default()
        };
        let provider = AnthropicProvider::new_with_key(&config, "sk-test".into()).unwrap();
        let response = provider
            .complete(CompletionRequest {
                messages: vec![Message::user("q")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.text(), "answer");
    }
}
