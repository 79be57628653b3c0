//! DuckDuckGo instant answer API client. Needs no API key.

use super::{RawResult, SearchProvider};
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com";

pub struct DuckDuckGoSearchProvider {
    client: Client,
    base_url: String,
}

impl DuckDuckGoSearchProvider {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("inquest/", env!("CARGO_PKG_VERSION")))
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
        })
    }

    /// Flatten the abstract, `Results` and `RelatedTopics` into ranked hits.
    fn extract_results(body: &Value, max_results: usize) -> Vec<RawResult> {
        let mut results = Vec::new();

        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
        {
            let url = body
                .get("AbstractURL")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let title = body
                .get("Heading")
                .and_then(|v| v.as_str())
                .filter(|h| !h.is_empty())
                .or_else(|| body.get("AbstractSource").and_then(|v| v.as_str()))
                .unwrap_or("DuckDuckGo");
            if !url.is_empty() {
                results.push(RawResult::new(url, title, abstract_text));
            }
        }

        for key in ["Results", "RelatedTopics"] {
            let Some(items) = body.get(key).and_then(|v| v.as_array()) else {
                continue;
            };
            for item in items {
                let (Some(text), Some(url)) = (
                    item.get("Text").and_then(|v| v.as_str()),
                    item.get("FirstURL").and_then(|v| v.as_str()),
                ) else {
                    // Category groups nest their topics one level down.
                    continue;
                };
                let title = text.split(" - ").next().unwrap_or(text);
                results.push(RawResult::new(url, title, text));
            }
        }

        results.truncate(max_results);
        results
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RawResult>, SearchError> {
        let url = format!(
            "{}/?q={}&format=json&no_html=1&skip_disambig=1",
            self.base_url,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                query: query.to_string(),
                message: format!("Search request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(SearchError::Request {
                query: query.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::ResponseParse {
                query: query.to_string(),
                message: format!("Failed to parse search response: {e}"),
            })?;

        Ok(Self::extract_results(&body, max_results))
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_results_order_and_limit() {
        let body = json!({
            "Heading": "Rust",
            "AbstractText": "Rust is a systems language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "Results": [
                { "Text": "Official site - rust-lang.org", "FirstURL": "https://rust-lang.org" }
            ],
            "RelatedTopics": [
                { "Text": "Cargo - package manager", "FirstURL": "https://doc.rust-lang.org/cargo" },
                { "Name": "Group", "Topics": [] }
            ]
        });
        let hits = DuckDuckGoSearchProvider::extract_results(&body, 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Rust");
        assert_eq!(hits[1].title, "Official site");
        assert_eq!(hits[2].url, "https://doc.rust-lang.org/cargo");

        let limited = DuckDuckGoSearchProvider::extract_results(&body, 1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_extract_results_empty() {
        let hits = DuckDuckGoSearchProvider::extract_results(&json!({ "AbstractText": "" }), 5);
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_encodes_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "rust async"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "RelatedTopics": [
                    { "Text": "Tokio - runtime", "FirstURL": "https://tokio.rs" }
                ]
            })))
            .mount(&server)
            .await;

        let config = SearchConfig {
            provider: "duckduckgo".into(),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let provider = DuckDuckGoSearchProvider::new(&config).unwrap();
        let hits = provider.search("rust async", 2).await.unwrap();
        assert_eq!(hits, vec![RawResult::new("https://tokio.rs", "Tokio", "Tokio - runtime")]);
    }
}
