//! Error types for the Inquest research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering generation, web search, the research loop, configuration and
//! artifact storage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level error type for the Inquest core library.
#[derive(Debug, thiserror::Error)]
pub enum InquestError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InquestError {
    /// The failure kind reported to callers of the invocation surface.
    pub fn kind(&self) -> FailureKind {
        match self {
            InquestError::Research(e) => e.kind(),
            InquestError::Config(_) => FailureKind::ConfigurationError,
            InquestError::Storage(_) => FailureKind::StorageFailure,
            InquestError::Llm(_)
            | InquestError::Search(_)
            | InquestError::Io(_)
            | InquestError::Serialization(_) => FailureKind::InternalError,
        }
    }
}

/// Stable, machine-readable name of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PlanningFailure,
    SearchFailure,
    SummarizationFailure,
    EvaluationFailure,
    CompositionFailure,
    ConfigurationError,
    NoEvidence,
    Cancelled,
    TimedOut,
    StorageFailure,
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PlanningFailure => "planning_failure",
            FailureKind::SearchFailure => "search_failure",
            FailureKind::SummarizationFailure => "summarization_failure",
            FailureKind::EvaluationFailure => "evaluation_failure",
            FailureKind::CompositionFailure => "composition_failure",
            FailureKind::ConfigurationError => "configuration_error",
            FailureKind::NoEvidence => "no_evidence",
            FailureKind::Cancelled => "cancelled",
            FailureKind::TimedOut => "timed_out",
            FailureKind::StorageFailure => "storage_failure",
            FailureKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from generation service interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Structured output violated schema '{schema}': {reason}")]
    SchemaViolation { schema: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the web search provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("Search request for '{query}' failed: {message}")]
    Request { query: String, message: String },

    #[error("Search response for '{query}' could not be parsed: {message}")]
    ResponseParse { query: String, message: String },

    #[error("Search provider {provider} rejected the credentials")]
    AuthFailed { provider: String },

    #[error("Search provider rate limited the request for '{query}'")]
    RateLimited { query: String },
}

impl SearchError {
    /// The query that triggered this error, when known.
    pub fn query(&self) -> Option<&str> {
        match self {
            SearchError::Request { query, .. }
            | SearchError::ResponseParse { query, .. }
            | SearchError::RateLimited { query } => Some(query),
            SearchError::AuthFailed { .. } => None,
        }
    }
}

/// Errors raised by the research loop, one variant per failure kind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResearchError {
    #[error("Query planning failed: {message}")]
    Planning { message: String },

    #[error("Search for '{query}' failed: {message}")]
    Search { query: String, message: String },

    #[error("Summarization of '{query}' failed: {message}")]
    Summarization { query: String, message: String },

    #[error("Sufficiency evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("Report composition failed: {message}")]
    Composition { message: String },

    #[error("No evidence gathered: all {failed} queries of the initial batch failed")]
    NoEvidence { failed: usize },

    #[error("Research run was cancelled")]
    Cancelled,

    #[error("Research run timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl ResearchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ResearchError::Planning { .. } => FailureKind::PlanningFailure,
            ResearchError::Search { .. } => FailureKind::SearchFailure,
            ResearchError::Summarization { .. } => FailureKind::SummarizationFailure,
            ResearchError::Evaluation { .. } => FailureKind::EvaluationFailure,
            ResearchError::Composition { .. } => FailureKind::CompositionFailure,
            ResearchError::NoEvidence { .. } => FailureKind::NoEvidence,
            ResearchError::Cancelled => FailureKind::Cancelled,
            ResearchError::TimedOut { .. } => FailureKind::TimedOut,
            ResearchError::InvalidStateTransition { .. } => FailureKind::InternalError,
        }
    }

    /// Whether this failure only affects one query of a batch.
    pub fn is_per_query(&self) -> bool {
        matches!(
            self,
            ResearchError::Search { .. } | ResearchError::Summarization { .. }
        )
    }
}

/// Errors from the configuration system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the artifact sink.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid artifact key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Failed to store artifact '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact sink rejected '{key}': {message}")]
    Rejected { key: String, message: String },
}

/// A type alias for results using the top-level `InquestError`.
pub type Result<T> = std::result::Result<T, InquestError>;
