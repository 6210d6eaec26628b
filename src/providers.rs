//! Collaborator contracts for evidence gathering.
//!
//! The clustering core never talks to the network itself; search engines,
//! redirect history, neighbor discovery, and structural inference are all
//! behind these traits. A provider that fails or returns nothing is
//! treated as "no evidence from that source".

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// A candidate alias discovered by the search collaborator, with its
/// `"method:kind"` evidence tag.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub alias: String,
    pub tag: String,
}

/// Search collaborator output for one URL: the page title recovered from
/// its archived copy, plus candidate aliases.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub title: String,
    pub candidates: Vec<SearchHit>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, url: &str) -> Result<SearchOutcome>;
}

#[async_trait]
pub trait HistoryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Historical redirect chains per URL, ordered oldest to final.
    /// Absent or empty entries mean no recorded redirects.
    async fn redirect_history(&self, urls: &[String]) -> Result<IndexMap<String, Vec<String>>>;

    /// Which of the URLs have at least one archived snapshot. Drives
    /// probe ordering, never correctness.
    async fn archived(&self, urls: &[String]) -> Result<HashMap<String, bool>>;
}

/// One resolved (url, title, alias) pair used as an inference training
/// example.
#[derive(Debug, Clone)]
pub struct InferenceExample {
    pub url: String,
    pub title: String,
    pub alias: String,
}

/// A URL still to be inferred, with its known metadata.
#[derive(Debug, Clone)]
pub struct UrlMeta {
    pub url: String,
    pub title: String,
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Given training examples and target URLs, best-guess aliases per
    /// target. Targets the provider cannot infer are simply absent.
    async fn infer(
        &self,
        examples: &[InferenceExample],
        targets: &[UrlMeta],
    ) -> Result<IndexMap<String, Vec<String>>>;
}

/// A neighbor URL that turned out to redirect somewhere live.
#[derive(Debug, Clone)]
pub struct NeighborAlias {
    pub url: String,
    pub alias: String,
    pub tag: String,
}

/// Structurally similar pages usable as corroborating evidence sources.
#[derive(Debug, Clone, Default)]
pub struct NeighborOutcome {
    pub neighbors: Vec<String>,
    pub redirected: Vec<NeighborAlias>,
}

#[async_trait]
pub trait NeighborProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn neighbors(&self, urls: &[String]) -> Result<NeighborOutcome>;
}

/// Canned search provider for testing.
#[derive(Default)]
pub struct MockSearchProvider {
    outcomes: HashMap<String, SearchOutcome>,
}

impl MockSearchProvider {
    pub fn new(outcomes: HashMap<String, SearchOutcome>) -> Self {
        Self { outcomes }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &'static str {
        "mock_search"
    }

    async fn search(&self, url: &str) -> Result<SearchOutcome> {
        Ok(self.outcomes.get(url).cloned().unwrap_or_default())
    }
}

/// Canned history provider for testing.
#[derive(Default)]
pub struct MockHistoryProvider {
    chains: IndexMap<String, Vec<String>>,
    archived: HashSet<String>,
}

impl MockHistoryProvider {
    pub fn new(chains: IndexMap<String, Vec<String>>, archived: HashSet<String>) -> Self {
        Self { chains, archived }
    }
}

#[async_trait]
impl HistoryProvider for MockHistoryProvider {
    fn name(&self) -> &'static str {
        "mock_history"
    }

    async fn redirect_history(&self, urls: &[String]) -> Result<IndexMap<String, Vec<String>>> {
        Ok(urls
            .iter()
            .filter_map(|u| self.chains.get(u).map(|c| (u.clone(), c.clone())))
            .collect())
    }

    async fn archived(&self, urls: &[String]) -> Result<HashMap<String, bool>> {
        Ok(urls
            .iter()
            .map(|u| (u.clone(), self.archived.contains(u)))
            .collect())
    }
}

/// Canned inference provider for testing: answers from a fixed table,
/// restricted to the targets actually asked about.
#[derive(Default)]
pub struct MockInferenceProvider {
    results: IndexMap<String, Vec<String>>,
}

impl MockInferenceProvider {
    pub fn new(results: IndexMap<String, Vec<String>>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl InferenceProvider for MockInferenceProvider {
    fn name(&self) -> &'static str {
        "mock_inference"
    }

    async fn infer(
        &self,
        _examples: &[InferenceExample],
        targets: &[UrlMeta],
    ) -> Result<IndexMap<String, Vec<String>>> {
        Ok(targets
            .iter()
            .filter_map(|t| self.results.get(&t.url).map(|a| (t.url.clone(), a.clone())))
            .collect())
    }
}

/// Canned neighbor provider for testing.
#[derive(Default)]
pub struct MockNeighborProvider {
    outcome: NeighborOutcome,
}

impl MockNeighborProvider {
    pub fn new(outcome: NeighborOutcome) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl NeighborProvider for MockNeighborProvider {
    fn name(&self) -> &'static str {
        "mock_neighbors"
    }

    async fn neighbors(&self, _urls: &[String]) -> Result<NeighborOutcome> {
        Ok(self.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_search_returns_empty_for_unknown_urls() {
        let provider = MockSearchProvider::default();
        let outcome = tokio_test::block_on(provider.search("http://s.org/a.html")).unwrap();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.title.is_empty());
    }

    #[test]
    fn mock_history_filters_to_requested_urls() {
        let mut chains = IndexMap::new();
        chains.insert(
            "http://s.org/a.html".to_string(),
            vec!["http://s.org/x".to_string(), "http://s.org/y".to_string()],
        );
        chains.insert("http://s.org/other.html".to_string(), vec![]);
        let provider = MockHistoryProvider::new(chains, HashSet::new());
        let out = tokio_test::block_on(
            provider.redirect_history(&["http://s.org/a.html".to_string()]),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["http://s.org/a.html"].last().unwrap(), "http://s.org/y");
    }
}
