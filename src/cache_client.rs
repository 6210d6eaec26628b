/// HTTP client for the shared document-store cache.
///
/// Collaborators cache crawled pages, search results, and snapshot
/// indexes here; the clustering core itself never touches it. The store
/// only promises idempotent upsert-by-key with last-write-wins.
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheClient {
    base_url: String,
    client: reqwest::Client,
}

impl CacheClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn entry_url(&self, key: &str) -> String {
        format!("{}/cache/{}", self.base_url, urlencoding::encode(key))
    }

    /// Fetch a cached value. `None` means a miss or an expired entry.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let url = self.entry_url(key);
        debug!("Cache get {}", url);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache error {}: {}", status, body);
        }
        let value: Value = response.json().await?;
        Ok(Some(value))
    }

    /// Upsert a value under a key with a TTL. Last write wins.
    pub async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let url = format!("{}?ttl_secs={}", self.entry_url(key), ttl.as_secs());
        debug!("Cache put {}", url);
        let response = self.client.put(&url).json(value).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache error {}: {}", status, body);
        }
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_percent_encoded() {
        let client = CacheClient::new("http://127.0.0.1:8093");
        assert_eq!(
            client.entry_url("crawl:http://s.org/a b.html"),
            "http://127.0.0.1:8093/cache/crawl%3Ahttp%3A%2F%2Fs.org%2Fa%20b.html"
        );
    }

    #[tokio::test]
    #[ignore] // Requires running cache service
    async fn cache_service_integration() {
        let client = CacheClient::new("http://127.0.0.1:8093");
        let health = client.health_check().await;
        assert!(health.is_ok());
    }
}
