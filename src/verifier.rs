//! Evidence pool façade: ingestion, clustering, per-URL verification.

use crate::clusters;
use crate::types::{
    Cluster, CandidateMap, EvidenceError, EvidenceTag, MatchLevel, NormUrl, RankedAlias,
    ResolveOptions,
};
use crate::urlnorm::{self, NormOpts};
use std::collections::HashMap;
use tracing::debug;

/// Accumulates (url, alias, evidence) observations for one batch and
/// answers ranked alias queries over them.
///
/// Owned by exactly one in-flight batch; concurrent batches each construct
/// their own. Clusters are cached lazily and invalidated whenever new
/// evidence arrives.
pub struct Verifier {
    options: ResolveOptions,
    candidates: CandidateMap,
    titles: HashMap<NormUrl, String>,
    raw_forms: HashMap<NormUrl, String>,
    all_clusters: Option<Vec<Cluster>>,
    selected: Option<Vec<Cluster>>,
}

fn norm_key(raw: &str) -> NormUrl {
    let normed = urlnorm::normalize(raw, &NormOpts::default());
    NormUrl::from_normalized(urlnorm::drop_print_query(normed.as_str()))
}

impl Verifier {
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            candidates: CandidateMap::new(),
            titles: HashMap::new(),
            raw_forms: HashMap::new(),
            all_clusters: None,
            selected: None,
        }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Drop all accumulated evidence, keeping the options.
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.titles.clear();
        self.raw_forms.clear();
        self.all_clusters = None;
        self.selected = None;
    }

    /// Number of distinct (url, alias) pairs in the pool.
    pub fn candidate_count(&self) -> usize {
        self.candidates.values().map(|aliases| aliases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn norm(&mut self, raw: &str) -> NormUrl {
        let normed = norm_key(raw);
        self.raw_forms
            .entry(normed.clone())
            .or_insert_with(|| raw.to_string());
        normed
    }

    /// Ingest one observation. Safe to call repeatedly with the same tuple:
    /// the tag set merges. Malformed input is a per-URL contract violation,
    /// never a panic.
    pub fn add_evidence(
        &mut self,
        url: &str,
        alias: &str,
        title: &str,
        tag: &str,
    ) -> Result<(), EvidenceError> {
        let tag = EvidenceTag::parse(tag)?;
        if alias.trim().is_empty() {
            return Err(EvidenceError::EmptyAlias(url.to_string()));
        }
        let url = self.norm(url);
        let alias = self.norm(alias);
        self.all_clusters = None;
        self.selected = None;
        self.candidates
            .entry(url.clone())
            .or_default()
            .entry(alias)
            .or_default()
            .insert(tag);
        if !title.is_empty() {
            self.titles.insert(url, title.to_string());
        }
        Ok(())
    }

    /// Title recorded for a URL, if any evidence carried one.
    pub fn title_of(&self, url: &str) -> Option<&str> {
        self.titles.get(&norm_key(url)).map(String::as_str)
    }

    /// All clusters over the current pool, before ranking. Feeds the
    /// orchestration loop's early-skip detection.
    pub fn clusters(&mut self) -> &[Cluster] {
        if self.all_clusters.is_none() {
            self.all_clusters = Some(clusters::build_clusters(
                &self.candidates,
                &self.titles,
                self.options.fuzzy,
                self.options.common_prefix,
            ));
        }
        self.all_clusters.as_deref().unwrap_or_default()
    }

    fn selected_clusters(&mut self) -> &[Cluster] {
        if self.selected.is_none() {
            let all = self.clusters().to_vec();
            let ranked = clusters::rank_clusters(all, self.options.fuzzy, &self.options.weights);
            self.selected = Some(clusters::select_clusters(ranked));
        }
        self.selected.as_deref().unwrap_or_default()
    }

    /// Rule-clustered (url, title, alias) groups in raw form: training
    /// sets for the structural-inference collaborator.
    pub fn clustered_pairs(&mut self) -> Vec<Vec<(String, String, String)>> {
        let groups = self.clusters().to_vec();
        groups
            .iter()
            .map(|cluster| {
                cluster
                    .members
                    .iter()
                    .map(|m| {
                        let url = self
                            .raw_forms
                            .get(&m.url)
                            .cloned()
                            .unwrap_or_else(|| m.url.to_string());
                        let title = self.titles.get(&m.url).cloned().unwrap_or_default();
                        let alias = self
                            .raw_forms
                            .get(&m.alias)
                            .cloned()
                            .unwrap_or_else(|| m.alias.to_string());
                        (url, title, alias)
                    })
                    .collect()
            })
            .collect()
    }

    /// Ranked aliases for one URL, best evidence first. An empty result
    /// means "alias unknown", the expected terminal state, not a failure.
    pub fn verify_url(&mut self, url: &str) -> Vec<RankedAlias> {
        let target = self.norm(url);
        let survivors: Vec<Cluster> = self
            .selected_clusters()
            .iter()
            .filter(|c| clusters::is_valid_cluster(c, &target))
            .cloned()
            .collect();

        let mut out: Vec<RankedAlias> = Vec::new();
        for cluster in &survivors {
            let mut alias_seen: HashMap<&NormUrl, usize> = HashMap::new();
            for member in &cluster.members {
                *alias_seen.entry(&member.alias).or_insert(0) += 1;
            }
            let tail_below_prefix = cluster
                .rule
                .tail_level()
                .is_none_or(|l| l < MatchLevel::Prefix);
            for member in &cluster.members {
                if member.url != target {
                    continue;
                }
                // a fuzzy-only guess that collides with another URL's guess
                // under a structurally weak rule is untrustworthy
                let fuzzy_only =
                    !member.tags.is_empty() && member.tags.iter().all(|t| t.is_fuzzy());
                if fuzzy_only && alias_seen[&member.alias] > 1 && tail_below_prefix {
                    continue;
                }
                let raw = self
                    .raw_forms
                    .get(&member.alias)
                    .cloned()
                    .unwrap_or_else(|| member.alias.to_string());
                let weight = self.options.weights.cumulative(&member.tags);
                out.push(RankedAlias {
                    alias: raw,
                    tags: member.tags.clone(),
                    weight,
                });
            }
        }
        out.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        if out.is_empty() {
            debug!("no verified alias for {}", target);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> Verifier {
        Verifier::new(ResolveOptions::default())
    }

    #[test]
    fn repeated_evidence_merges_tags() {
        let mut v = verifier();
        v.add_evidence(
            "http://s.org/a.html",
            "http://s.org/b.html",
            "T",
            "wayback_alias:wayback_alias",
        )
        .unwrap();
        v.add_evidence(
            "http://s.org/a.html",
            "http://s.org/b.html",
            "T",
            "search:title",
        )
        .unwrap();
        v.add_evidence(
            "http://s.org/a.html",
            "http://s.org/b.html",
            "T",
            "search:title",
        )
        .unwrap();
        assert_eq!(v.candidate_count(), 1);
    }

    #[test]
    fn malformed_tag_is_reported_not_panicked() {
        let mut v = verifier();
        let err = v
            .add_evidence("http://s.org/a.html", "http://s.org/b.html", "", "nocolon")
            .unwrap_err();
        assert!(matches!(err, EvidenceError::MalformedTag(_)));
        let err = v
            .add_evidence("http://s.org/a.html", "  ", "", "search:title")
            .unwrap_err();
        assert!(matches!(err, EvidenceError::EmptyAlias(_)));
        assert!(v.is_empty());
    }

    #[test]
    fn normalization_collapses_equivalent_raw_forms() {
        let mut v = verifier();
        v.add_evidence(
            "https://WWW.S.org/a.html",
            "http://s.org/b.html",
            "",
            "search:title",
        )
        .unwrap();
        v.add_evidence(
            "http://s.org/a.html",
            "https://www.s.org/b.html?print=1",
            "",
            "search:content",
        )
        .unwrap();
        assert_eq!(v.candidate_count(), 1, "same pair under different raw forms");
    }

    #[test]
    fn verify_unknown_url_returns_empty() {
        let mut v = verifier();
        assert!(v.verify_url("http://s.org/never-seen.html").is_empty());
    }

    #[test]
    fn clear_resets_pool_and_titles() {
        let mut v = verifier();
        v.add_evidence(
            "http://s.org/a.html",
            "http://s.org/b.html",
            "A Title",
            "search:title",
        )
        .unwrap();
        assert_eq!(v.title_of("https://www.s.org/a.html"), Some("A Title"));
        v.clear();
        assert!(v.is_empty());
        assert_eq!(v.title_of("http://s.org/a.html"), None);
    }
}
