//! HTTP client for the redirect-history/archive-index service.
//!
//! The service owns Wayback CDX access, rate limiting, and robots
//! compliance; this client only asks two questions: what did this URL
//! historically redirect to, and does it have an archived snapshot at all.

use crate::providers::HistoryProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Serialize)]
struct UrlsRequest<'a> {
    urls: &'a [String],
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    /// url -> redirect chain, oldest to final
    chains: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ArchivedResponse {
    archived: HashMap<String, bool>,
}

#[derive(Debug, Clone)]
pub struct WaybackClient {
    base_url: String,
    client: reqwest::Client,
}

impl WaybackClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Latest archived snapshot URL for one page, if any.
    pub async fn latest_snapshot(&self, url: &str) -> Result<Option<String>> {
        let endpoint = format!(
            "{}/snapshot?url={}",
            self.base_url,
            urlencoding::encode(url)
        );
        debug!("Fetching snapshot index from {}", endpoint);
        let response = self.client.get(&endpoint).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("History service error {}: {}", status, body);
        }
        let snapshot: Option<String> = response.json().await?;
        Ok(snapshot)
    }

    /// Health check
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl HistoryProvider for WaybackClient {
    fn name(&self) -> &'static str {
        "wayback_history"
    }

    async fn redirect_history(&self, urls: &[String]) -> Result<IndexMap<String, Vec<String>>> {
        let endpoint = format!("{}/history", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&UrlsRequest { urls })
            .send()
            .await
            .context("Failed to call history service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("History service error {}: {}", status, body);
        }

        let history: HistoryResponse = response
            .json()
            .await
            .context("Failed to parse history response")?;
        debug!("Redirect history for {}/{} urls", history.chains.len(), urls.len());
        Ok(history.chains)
    }

    async fn archived(&self, urls: &[String]) -> Result<HashMap<String, bool>> {
        let endpoint = format!("{}/archived", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&UrlsRequest { urls })
            .send()
            .await
            .context("Failed to call history service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("History service error {}: {}", status, body);
        }

        let archived: ArchivedResponse = response.json().await?;
        Ok(archived.archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running history service
    async fn history_service_integration() {
        let client = WaybackClient::new("http://127.0.0.1:8092");
        let health = client.health_check().await;
        assert!(health.is_ok());
    }
}
