//! Configuration system for Inquest.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration is
//! loaded from `<config_dir>/inquest/config.toml` and/or `.inquest/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::brain::ModelRole;
use crate::error::ConfigError;
use crate::gateway::GatewayConfig;

/// Top-level configuration for an Inquest deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InquestConfig {
    pub llm: LlmConfig,
    pub models: ModelsConfig,
    pub research: ResearchConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
}

impl InquestConfig {
    /// Check every section and reject values that would make a run impossible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate()?;
        self.research.validate()?;
        Ok(())
    }

    /// Resolve the model used for a research role, falling back to `llm.model`.
    pub fn model_for(&self, role: ModelRole) -> &str {
        self.models.resolve(role, &self.llm.model)
    }
}

/// Configuration for the generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai", "anthropic", or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Default model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature used for every research role.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 1.0,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "llm.model must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "llm.temperature must be within 0.0..=2.0, got {}",
                    self.temperature
                ),
            });
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            })
    }
}

/// Exponential backoff policy for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based), capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: usize) -> std::time::Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        std::time::Duration::from_millis(ms as u64)
    }
}

/// Per-role model selection. Unset roles use `llm.model`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_generator_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarizer_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_model: Option<String>,
}

impl ModelsConfig {
    pub fn resolve<'a>(&'a self, role: ModelRole, default: &'a str) -> &'a str {
        let selected = match role {
            ModelRole::QueryGenerator => self.query_generator_model.as_deref(),
            ModelRole::Summarizer => self.summarizer_model.as_deref(),
            ModelRole::Reflection => self.reflection_model.as_deref(),
            ModelRole::Answer => self.answer_model.as_deref(),
        };
        selected.filter(|m| !m.trim().is_empty()).unwrap_or(default)
    }
}

/// Run parameters for the research loop, resolved once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Number of queries the planner may produce for the first batch.
    pub initial_query_count: usize,
    /// Follow-up loop budget. 0 runs only the initial batch.
    pub max_research_loops: usize,
    pub max_search_results_per_query: usize,
    /// Cap on follow-up queries dispatched per loop.
    pub max_follow_up_queries: usize,
    /// Width of the bounded fan-out within one batch.
    pub max_concurrency: usize,
    /// Fall back to the verbatim topic as the only query when planning fails.
    pub planner_fallback: bool,
    /// Whole-run deadline in seconds; 0 disables it.
    pub run_timeout_secs: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            initial_query_count: 1,
            max_research_loops: 1,
            max_search_results_per_query: 2,
            max_follow_up_queries: 3,
            max_concurrency: 4,
            planner_fallback: true,
            run_timeout_secs: 0,
        }
    }
}

impl ResearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("research.initial_query_count", self.initial_query_count),
            (
                "research.max_search_results_per_query",
                self.max_search_results_per_query,
            ),
            ("research.max_follow_up_queries", self.max_follow_up_queries),
            ("research.max_concurrency", self.max_concurrency),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("{name} must be at least 1"),
                });
            }
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<std::time::Duration> {
        (self.run_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.run_timeout_secs))
    }
}

/// Configuration for the web search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// "tavily" or "duckduckgo".
    pub provider: String,
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Tavily search depth: "basic" or "advanced".
    pub search_depth: String,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            base_url: None,
            search_depth: "basic".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Configuration for the local artifact sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let output_dir = directories::ProjectDirs::from("dev", "inquest", "inquest")
            .map(|dirs| dirs.data_dir().join("reports"))
            .unwrap_or_else(|| PathBuf::from(".inquest").join("reports"));
        Self { output_dir }
    }
}

/// Path of the user-level configuration file, if a home directory exists.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "inquest", "inquest")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration by merging defaults, config files, environment and overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&InquestConfig>,
) -> Result<InquestConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(InquestConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".inquest").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // INQUEST_LLM__MODEL, INQUEST_RESEARCH__MAX_RESEARCH_LOOPS, ...
    figment = figment.merge(Env::prefixed("INQUEST_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load and validate in one step, folding both failure modes into `ConfigError`.
pub fn load_validated(
    workspace: Option<&Path>,
    overrides: Option<&InquestConfig>,
) -> Result<InquestConfig, ConfigError> {
    let config = load_config(workspace, overrides).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
