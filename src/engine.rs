//! Orchestration of one alias-resolution batch.
//!
//! Drives probe order over a batch of URLs belonging to one site section,
//! merges evidence from the collaborators into the verifier, and re-runs
//! verification globally after every probe, since a single new data point
//! can change the best cluster for every URL in the batch.
//!
//! Every await point is an evidence-gathering call; the clustering passes
//! never block. Dropping the returned future therefore cancels a batch
//! between loop iterations, the supported cancellation granularity.

use crate::patterns::PatternIndex;
use crate::providers::{
    HistoryProvider, InferenceExample, InferenceProvider, NeighborProvider, SearchProvider,
    UrlMeta,
};
use crate::types::{
    BatchOutcome, BatchStats, MatchLevel, RankedAlias, ResolveOptions, UrlEvidenceError,
};
use crate::urlnorm::{self, NormOpts};
use crate::verifier::Verifier;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-call target cap for the inference collaborator.
fn infer_shard_size() -> usize {
    std::env::var("RELINK_INFER_SHARD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
}

/// Main batch driver (thread-safe via Arc). Holds the collaborator
/// providers; all batch state lives in a per-call `Verifier`, so
/// concurrent batches for different sites never share mutable state.
pub struct AliasFinder {
    search: Box<dyn SearchProvider>,
    history: Box<dyn HistoryProvider>,
    inference: Option<Box<dyn InferenceProvider>>,
    neighbors: Option<Box<dyn NeighborProvider>>,
    options: ResolveOptions,
}

pub type SharedAliasFinder = Arc<AliasFinder>;

fn record(
    verifier: &mut Verifier,
    errors: &mut Vec<UrlEvidenceError>,
    url: &str,
    alias: &str,
    title: &str,
    tag: &str,
) {
    if let Err(e) = verifier.add_evidence(url, alias, title, tag) {
        warn!("Rejected evidence for {}: {}", url, e);
        errors.push(UrlEvidenceError {
            url: url.to_string(),
            error: e.to_string(),
        });
    }
}

/// Skip is indicated when no cluster's rule tail reaches `Mix`: nothing in
/// the pool could generalize to the remaining URLs.
fn early_skip(verifier: &mut Verifier) -> bool {
    !verifier
        .clusters()
        .iter()
        .any(|c| c.rule.tail_level().is_none_or(|l| l >= MatchLevel::Mix))
}

impl AliasFinder {
    pub fn new(
        search: Box<dyn SearchProvider>,
        history: Box<dyn HistoryProvider>,
        inference: Option<Box<dyn InferenceProvider>>,
        neighbors: Option<Box<dyn NeighborProvider>>,
        options: ResolveOptions,
    ) -> SharedAliasFinder {
        Arc::new(Self {
            search,
            history,
            inference,
            neighbors,
            options,
        })
    }

    /// Engine without inference or neighbor collaborators.
    pub fn new_simple(
        search: Box<dyn SearchProvider>,
        history: Box<dyn HistoryProvider>,
    ) -> SharedAliasFinder {
        Self::new(search, history, None, None, ResolveOptions::default())
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve a batch of target URLs under one site section.
    ///
    /// Collaborator failures degrade to "no evidence from that source";
    /// the only per-URL errors surfaced are contract violations. "Alias
    /// unknown" is an absent entry in `resolved`, never an error.
    pub async fn resolve_batch(&self, netloc_key: &str, urls: &[String]) -> BatchOutcome {
        let start = Instant::now();
        info!("Resolving batch {}: {} urls", netloc_key, urls.len());

        let mut verifier = Verifier::new(self.options.clone());
        let mut errors: Vec<UrlEvidenceError> = Vec::new();
        let mut stats = BatchStats {
            urls_total: urls.len(),
            ..Default::default()
        };

        // neighbors corroborate small batches
        let mut neighbor_urls: Vec<String> = Vec::new();
        if urls.len() < self.options.neighbor_threshold {
            if let Some(provider) = &self.neighbors {
                match provider.neighbors(urls).await {
                    Ok(outcome) => {
                        neighbor_urls = outcome.neighbors;
                        for alias in outcome.redirected {
                            record(
                                &mut verifier,
                                &mut errors,
                                &alias.url,
                                &alias.alias,
                                "",
                                &alias.tag,
                            );
                        }
                    }
                    Err(e) => warn!("Neighbor provider failed: {e:#}"),
                }
            }
        }
        stats.neighbors = neighbor_urls.len();

        let mut all: IndexSet<String> = urls.iter().cloned().collect();
        all.extend(neighbor_urls.iter().cloned());
        let all_vec: Vec<String> = all.iter().cloned().collect();

        // archived URLs are probed first: they carry titles and redirect
        // history, the strongest seed evidence
        let archived = match self.history.archived(&all_vec).await {
            Ok(map) => map,
            Err(e) => {
                warn!("Archive probe failed: {e:#}");
                HashMap::new()
            }
        };
        let has_archive = |u: &str| archived.get(u).copied().unwrap_or(false);
        let mut ordered: Vec<String> = all_vec
            .iter()
            .filter(|u| has_archive(u.as_str()))
            .cloned()
            .collect();
        ordered.extend(all_vec.iter().filter(|u| !has_archive(u.as_str())).cloned());

        let mut touched: IndexSet<String> = IndexSet::new();
        let mut titles: HashMap<String, String> = HashMap::new();
        let mut resolved: IndexMap<String, RankedAlias> = IndexMap::new();

        while touched.len() < ordered.len() {
            let Some(next) = ordered.iter().find(|u| !touched.contains(*u)).cloned() else {
                break;
            };
            debug!("Probing {}", next);
            let (search_res, history_res) = tokio::join!(
                self.search.search(&next),
                self.history.redirect_history(std::slice::from_ref(&next)),
            );

            let mut title = String::new();
            match search_res {
                Ok(outcome) => {
                    title = outcome.title;
                    for hit in outcome.candidates {
                        record(&mut verifier, &mut errors, &next, &hit.alias, &title, &hit.tag);
                    }
                }
                Err(e) => warn!("Search failed for {}: {e:#}", next),
            }
            match history_res {
                Ok(chains) => {
                    for (url, chain) in chains {
                        if let Some(last) = chain.last() {
                            record(
                                &mut verifier,
                                &mut errors,
                                &url,
                                last,
                                &title,
                                "wayback_alias:wayback_alias",
                            );
                        }
                    }
                }
                Err(e) => warn!("Redirect history failed for {}: {e:#}", next),
            }
            if !title.is_empty() {
                titles.insert(next.clone(), title);
            }
            touched.insert(next);
            stats.iterations += 1;

            // global re-verification; earlier resolutions are kept
            for url in &touched {
                if resolved.contains_key(url) {
                    continue;
                }
                if let Some(top) = verifier.verify_url(url).into_iter().next() {
                    info!("Resolved {} -> {}", url, top.alias);
                    resolved.insert(url.clone(), top);
                }
            }

            let n = ordered.len();
            let gate = 2.max((0.4 * n as f64).ceil() as usize).min(n);
            if resolved.is_empty() && touched.len() >= gate && early_skip(&mut verifier) {
                stats.early_skip_indicated = true;
                info!("Early-skip indicated for {}", netloc_key);
                if self.options.stop_early {
                    break;
                }
            }

            if self.inference.is_some() && resolved.len() > 1 && resolved.len() < ordered.len() {
                self.run_inference(
                    &mut verifier,
                    &mut resolved,
                    &mut touched,
                    &ordered,
                    &titles,
                    &mut errors,
                    &mut stats,
                )
                .await;
            }
        }

        stats.urls_touched = touched.len();
        stats.candidates_seen = verifier.candidate_count();
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Batch {} done: {}/{} resolved, {} candidates, {}ms",
            netloc_key,
            resolved.len(),
            stats.urls_total,
            stats.candidates_seen,
            stats.elapsed_ms
        );
        BatchOutcome {
            resolved,
            errors,
            stats,
        }
    }

    /// Feed resolved pairs to the inference collaborator and merge its
    /// guesses back as evidence.
    ///
    /// Examples are grouped by transformation rule so each call teaches a
    /// single consistent transformation, and targets are restricted to
    /// URLs sharing a generalized pattern with a group's sources. An
    /// inferred alias claimed by more than one URL in a call is noise and
    /// dropped.
    #[allow(clippy::too_many_arguments)]
    async fn run_inference(
        &self,
        verifier: &mut Verifier,
        resolved: &mut IndexMap<String, RankedAlias>,
        touched: &mut IndexSet<String>,
        ordered: &[String],
        titles: &HashMap<String, String>,
        errors: &mut Vec<UrlEvidenceError>,
        stats: &mut BatchStats,
    ) {
        let Some(provider) = &self.inference else {
            return;
        };
        let toinfer: Vec<UrlMeta> = ordered
            .iter()
            .filter(|u| !resolved.contains_key(*u))
            .map(|u| UrlMeta {
                url: u.clone(),
                title: titles.get(u).cloned().unwrap_or_default(),
            })
            .collect();
        if toinfer.is_empty() {
            return;
        }

        let norm_opts = NormOpts::default();
        let norm = |u: &str| urlnorm::normalize(u, &norm_opts).into_inner();
        let shard_size = infer_shard_size();

        for group in example_groups(&self.options, resolved, titles) {
            if group.is_empty() {
                continue;
            }
            let mut index = PatternIndex::new(self.options.max_diff);
            for example in &group {
                index.add(&norm(&example.url));
            }
            let targets: Vec<UrlMeta> = toinfer
                .iter()
                .filter(|t| !index.match_url(&norm(&t.url), 1, false).is_empty())
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }
            debug!(
                "Inferring {} targets from {} examples",
                targets.len(),
                group.len()
            );

            for shard in targets.chunks(shard_size) {
                stats.inference_calls += 1;
                let inferred = match provider.infer(&group, shard).await {
                    Ok(map) => map,
                    Err(e) => {
                        warn!("Inference failed: {e:#}");
                        continue;
                    }
                };

                let mut claims: IndexMap<String, IndexSet<String>> = IndexMap::new();
                for example in &group {
                    claims
                        .entry(norm(&example.alias))
                        .or_default()
                        .insert(norm(&example.url));
                }
                for (url, aliases) in &inferred {
                    for alias in aliases {
                        claims.entry(norm(alias)).or_default().insert(norm(url));
                    }
                }

                for (url, aliases) in inferred {
                    let mut merged = false;
                    for alias in aliases {
                        if claims[&norm(&alias)].len() > 1 {
                            debug!("Dropping multicast inferred alias {}", alias);
                            continue;
                        }
                        let title = titles.get(&url).map(String::as_str).unwrap_or("");
                        record(
                            verifier,
                            errors,
                            &url,
                            &alias,
                            title,
                            "inference:inference",
                        );
                        merged = true;
                    }
                    if merged {
                        touched.insert(url.clone());
                    }
                }
            }
        }

        // pick up inference-backed resolutions immediately
        for url in touched.iter() {
            if resolved.contains_key(url) {
                continue;
            }
            if let Some(top) = verifier.verify_url(url).into_iter().next() {
                info!("Resolved {} -> {} (post-inference)", url, top.alias);
                resolved.insert(url.clone(), top);
            }
        }
    }
}

/// Group resolved examples by identical transformation rule, in
/// common-prefix mode: each group is one consistent transformation the
/// inference collaborator can learn.
fn example_groups(
    options: &ResolveOptions,
    resolved: &IndexMap<String, RankedAlias>,
    titles: &HashMap<String, String>,
) -> Vec<Vec<InferenceExample>> {
    let mut scratch = Verifier::new(ResolveOptions {
        fuzzy: false,
        common_prefix: true,
        ..options.clone()
    });
    for (url, ranked) in resolved {
        let title = titles.get(url).map(String::as_str).unwrap_or("");
        let _ = scratch.add_evidence(url, &ranked.alias, title, "example:example");
    }
    scratch
        .clustered_pairs()
        .into_iter()
        .map(|group| {
            group
                .into_iter()
                .map(|(url, title, alias)| InferenceExample { url, title, alias })
                .collect()
        })
        .collect()
}
