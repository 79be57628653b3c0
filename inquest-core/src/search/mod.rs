//! Web search providers.
//!
//! Defines the `SearchProvider` trait the research engine consumes and the
//! concrete clients behind it:
//! - Tavily search API (default, keyed)
//! - DuckDuckGo instant answer API (keyless fallback)
//!
//! Use `create_search_provider()` to pick one from configuration.

pub mod duckduckgo;
pub mod tavily;

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub use duckduckgo::DuckDuckGoSearchProvider;
pub use tavily::TavilySearchProvider;

/// One ranked hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResult {
    pub url: String,
    pub title: String,
    pub content_snippet: String,
}

impl RawResult {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content_snippet: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content_snippet: content_snippet.into(),
        }
    }
}

/// Trait for web search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query and return at most `max_results` hits in rank order.
    ///
    /// An empty result list is a valid outcome, not an error.
    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<RawResult>, SearchError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Create a search provider based on the configuration.
pub fn create_search_provider(
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, ConfigError> {
    match config.provider.as_str() {
        "tavily" => Ok(Arc::new(TavilySearchProvider::new(config)?)),
        "duckduckgo" | "ddg" => Ok(Arc::new(DuckDuckGoSearchProvider::new(config)?)),
        other => Err(ConfigError::Invalid {
            message: format!("unknown search provider '{other}'"),
        }),
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Results(Vec<RawResult>),
    Failure(String),
}

/// A scripted search provider for tests.
///
/// Queries without a script entry return `synthetic` generated hits (zero by
/// default). Every call is logged in arrival order.
#[derive(Default)]
pub struct MockSearchProvider {
    scripts: HashMap<String, Scripted>,
    delays: HashMap<String, Duration>,
    synthetic: usize,
    calls: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate `n` distinct hits for any unscripted query.
    pub fn with_synthetic_results(mut self, n: usize) -> Self {
        self.synthetic = n;
        self
    }

    pub fn with_results(mut self, query: &str, results: Vec<RawResult>) -> Self {
        self.scripts
            .insert(query.to_string(), Scripted::Results(results));
        self
    }

    pub fn with_failure(mut self, query: &str, message: &str) -> Self {
        self.scripts
            .insert(query.to_string(), Scripted::Failure(message.to_string()));
        self
    }

    /// Delay the reply for `query`, to force out-of-order completion.
    pub fn with_delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hits the mock produces for an unscripted query.
    pub fn synthetic_results(query: &str, n: usize) -> Vec<RawResult> {
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        (1..=n)
            .map(|i| {
                RawResult::new(
                    format!("https://example.com/{slug}/{i}"),
                    format!("{query} ({i})"),
                    format!("Finding {i} about {query}."),
                )
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RawResult>, SearchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        if let Some(delay) = self.delays.get(query) {
            tokio::time::sleep(*delay).await;
        }

        match self.scripts.get(query) {
            Some(Scripted::Failure(message)) => Err(SearchError::Request {
                query: query.to_string(),
                message: message.clone(),
            }),
            Some(Scripted::Results(results)) => {
                Ok(results.iter().take(max_results).cloned().collect())
            }
            None => Ok(Self::synthetic_results(
                query,
                self.synthetic.min(max_results),
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
