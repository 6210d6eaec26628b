//! HTTP-based search collaborator client.
//!
//! Talks to the search service that runs the actual engine queries and
//! title/content comparisons; this side only ships URLs out and evidence
//! tags back in.

use crate::providers::{SearchHit, SearchOutcome, SearchProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    url: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    title: String,
    candidates: Vec<SearchCandidate>,
    #[serde(default)]
    query_time_ms: f64,
}

#[derive(Debug, Deserialize)]
struct SearchCandidate {
    url: String,
    method: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct HttpSearchProvider {
    service_url: String,
    client: reqwest::Client,
    limit: usize,
}

impl HttpSearchProvider {
    pub fn new(service_url: String) -> Self {
        Self {
            service_url,
            client: reqwest::Client::new(),
            limit: 20,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn to_hit(candidate: SearchCandidate) -> SearchHit {
        SearchHit {
            alias: candidate.url,
            tag: format!("{}:{}", candidate.method, candidate.kind),
        }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.service_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &'static str {
        "http_search"
    }

    async fn search(&self, url: &str) -> Result<SearchOutcome> {
        let request = SearchRequest {
            url,
            limit: self.limit,
        };
        let endpoint = format!("{}/search", self.service_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .context("Failed to call search service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Search service error ({}): {}", status, body);
        }

        let search_response: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search service response")?;

        tracing::info!(
            "Search: {} candidates for {} in {:.1}ms",
            search_response.candidates.len(),
            url,
            search_response.query_time_ms
        );

        Ok(SearchOutcome {
            title: search_response.title,
            candidates: search_response
                .candidates
                .into_iter()
                .map(Self::to_hit)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_converts_to_tagged_hit() {
        let hit = HttpSearchProvider::to_hit(SearchCandidate {
            url: "http://s.org/new/a.html".to_string(),
            method: "search".to_string(),
            kind: "title_site".to_string(),
        });
        assert_eq!(hit.alias, "http://s.org/new/a.html");
        assert_eq!(hit.tag, "search:title_site");
    }

    #[tokio::test]
    #[ignore] // Requires running search service
    async fn search_service_integration() {
        let provider = HttpSearchProvider::new("http://127.0.0.1:8091".to_string());
        let health = provider.health_check().await;
        assert!(health.is_ok());
    }
}
