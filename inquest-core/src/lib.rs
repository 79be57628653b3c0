//! # Inquest Core
//!
//! Core library for the Inquest research engine.
//! Provides the iterative research loop, the generation interface (brain),
//! web search providers, artifact storage, configuration, and the HTTP
//! gateway that serves research requests.

pub mod brain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod research;
pub mod search;
pub mod service;
pub mod storage;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider, ModelRole, StructuredOutput};
pub use config::{InquestConfig, ResearchConfig};
pub use error::{FailureKind, InquestError, Result};
pub use research::{
    FinalReport, ResearchCallback, ResearchEngine, ResearchPhase, ResearchRun, ResearchState,
    SearchQuery, TracingResearchCallback,
};
pub use search::{MockSearchProvider, RawResult, SearchProvider};
pub use service::{InvocationOutcome, ResearchRequest, ResearchResponse, ResearchService};
pub use storage::{ArtifactSink, LocalArtifactSink, MemoryArtifactSink};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
