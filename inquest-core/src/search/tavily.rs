//! Tavily search API client.

use super::{RawResult, SearchProvider};
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

pub struct TavilySearchProvider {
    client: Client,
    base_url: String,
    api_key: String,
    search_depth: String,
}

impl TavilySearchProvider {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: config.api_key_env.clone(),
            })?;
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &SearchConfig, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            search_depth: config.search_depth.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RawResult>, SearchError> {
        let url = format!("{}/search", self.base_url);
        debug!(query, max_results, "Sending Tavily search");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "max_results": max_results,
                "search_depth": self.search_depth,
                "include_answer": false,
            }))
            .send()
            .await
            .map_err(|e| SearchError::Request {
                query: query.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        match status.as_u16() {
            401 | 403 => {
                return Err(SearchError::AuthFailed {
                    provider: "tavily".to_string(),
                });
            }
            429 => {
                return Err(SearchError::RateLimited {
                    query: query.to_string(),
                });
            }
            _ if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(SearchError::Request {
                    query: query.to_string(),
                    message: format!("HTTP {status}: {body}"),
                });
            }
            _ => {}
        }

        let parsed: TavilyResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::ResponseParse {
                    query: query.to_string(),
                    message: e.to_string(),
                })?;

        Ok(parsed
            .results
            .into_iter()
            .take(max_results)
            .map(|hit| RawResult {
                url: hit.url,
                title: hit.title,
                content_snippet: hit.content,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "tavily"
    }
}
