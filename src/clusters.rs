//! Cluster construction, ranking, selection, and validity.
//!
//! Candidates sharing an identical transformation rule form one cluster,
//! the unit of trust: evidence weight and rule predictability decide which
//! clusters are believed, token order always stable so ranking is
//! reproducible.

use crate::rules;
use crate::types::{
    CandidateMap, Cluster, ClusterMember, ClusterScore, EvidenceTag, EvidenceWeights, MatchLevel,
    NormUrl, TransformationRule,
};
use crate::urlnorm;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};

fn is_fuzzy_search(tag: &EvidenceTag) -> bool {
    tag.method == "search" && tag.is_fuzzy()
}

/// Remove structurally suspicious aliases, then aliases claimed by more
/// than two distinct source URLs (a generic page like a sitemap gets
/// "found" for everything). Claims backed only by a single fuzzy search
/// hit do not count toward popularity.
pub fn filter_suspicious(pool: &CandidateMap) -> CandidateMap {
    let mut kept: CandidateMap = IndexMap::new();
    for (url, aliases) in pool {
        for (alias, tags) in aliases {
            if urlnorm::suspicious_alias(url.as_str(), alias.as_str()) {
                continue;
            }
            kept.entry(url.clone())
                .or_default()
                .insert(alias.clone(), tags.clone());
        }
    }

    let mut claimants: IndexMap<&NormUrl, IndexSet<&NormUrl>> = IndexMap::new();
    for (url, aliases) in &kept {
        for (alias, tags) in aliases {
            if tags.len() > 1 || !tags.iter().any(is_fuzzy_search) {
                claimants.entry(alias).or_default().insert(url);
            }
        }
    }
    let dropped: HashSet<NormUrl> = claimants
        .iter()
        .filter(|(_, urls)| urls.len() > 2)
        .map(|(alias, _)| (*alias).clone())
        .collect();

    let mut out: CandidateMap = IndexMap::new();
    for (url, aliases) in kept {
        let filtered: crate::types::AliasMap = aliases
            .into_iter()
            .filter(|(alias, _)| !dropped.contains(alias))
            .collect();
        if !filtered.is_empty() {
            out.insert(url, filtered);
        }
    }
    out
}

/// Group the evidence pool into clusters keyed by identical transformation
/// rule, in first-observation order.
///
/// In non-fuzzy mode a candidate holding both fuzzy and real evidence
/// loses its `search:fuzzy_search` tag before grouping.
pub fn build_clusters(
    pool: &CandidateMap,
    titles: &HashMap<NormUrl, String>,
    fuzzy: bool,
    common_prefix: bool,
) -> Vec<Cluster> {
    let filtered = filter_suspicious(pool);
    let all_pairs: Vec<(NormUrl, NormUrl)> = filtered
        .iter()
        .flat_map(|(url, aliases)| aliases.keys().map(move |alias| (url.clone(), alias.clone())))
        .collect();

    let mut groups: IndexMap<TransformationRule, Vec<ClusterMember>> = IndexMap::new();
    for (url, aliases) in &filtered {
        let title = titles.get(url).map(String::as_str).unwrap_or("");
        for (alias, tags) in aliases {
            let mut tags: Vec<EvidenceTag> = tags.iter().cloned().collect();
            if !fuzzy && tags.len() > 1 {
                tags.retain(|t| !is_fuzzy_search(t));
            }
            let rule = rules::rule_for(url, alias, title, &all_pairs, common_prefix);
            groups.entry(rule).or_default().push(ClusterMember {
                url: url.clone(),
                alias: alias.clone(),
                tags,
            });
        }
    }
    groups
        .into_iter()
        .map(|(rule, members)| Cluster { rule, members })
        .collect()
}

/// Score and sort clusters, best first.
///
/// The score triple is `(evidence hint weight, predictability, distinct
/// source URLs)` compared lexicographically. Entirely unpredictable rules
/// are discarded. Fuzzy mode drops single-member clusters unless the final
/// rule token reaches `Prefix`; non-fuzzy mode requires a positive hint
/// score. Ties keep first-built order.
pub fn rank_clusters(
    clusters: Vec<Cluster>,
    fuzzy: bool,
    weights: &EvidenceWeights,
) -> Vec<(Cluster, ClusterScore)> {
    let mut scored = Vec::new();
    for cluster in clusters {
        if cluster
            .rule
            .tokens
            .iter()
            .all(|t| t.level == MatchLevel::Unpredictable)
        {
            continue;
        }
        let len = cluster.rule.tokens.len() as f64;
        let predictability = if fuzzy {
            // position-weighted: an unpredictable filename costs more
            // than an unpredictable leading directory
            -cluster
                .rule
                .tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| t.level == MatchLevel::Unpredictable)
                .map(|(i, _)| (i as f64 + 1.0) / len)
                .sum::<f64>()
        } else {
            -(cluster
                .rule
                .tokens
                .iter()
                .filter(|t| t.level == MatchLevel::Unpredictable)
                .count() as f64)
        };

        let mut seen_hints: IndexSet<&str> = IndexSet::new();
        let mut seen_urls: IndexSet<&NormUrl> = IndexSet::new();
        for member in &cluster.members {
            seen_urls.insert(&member.url);
            for tag in &member.tags {
                for part in [tag.method.as_str(), tag.kind.as_str()] {
                    if weights.hint(part) > 0.0 {
                        seen_hints.insert(part);
                    }
                }
            }
        }
        let hint_score: f64 = seen_hints.iter().map(|h| weights.hint(h)).sum();
        let distinct_urls = seen_urls.len();

        if fuzzy {
            let tail_reaches_prefix = cluster
                .rule
                .tail_level()
                .is_some_and(|l| l >= MatchLevel::Prefix);
            if cluster.members.len() == 1 && !tail_reaches_prefix {
                continue;
            }
        } else if hint_score <= 0.0 {
            continue;
        }

        scored.push((
            cluster,
            ClusterScore {
                hint_score,
                predictability,
                distinct_urls,
            },
        ));
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

/// Whether rule `r1` is at least as trustable as `r2`: same host, same
/// length, and comparing token-by-token from the tail, never worse by
/// `(MatchLevel, source)` ordering.
fn more_trustable(r1: &TransformationRule, r2: &TransformationRule) -> bool {
    if r1.host != r2.host || r1.tokens.len() != r2.tokens.len() {
        return false;
    }
    for (a, b) in r1.tokens.iter().zip(&r2.tokens).rev() {
        if a == b {
            continue;
        }
        if a < b {
            return false;
        }
    }
    true
}

/// Pick the trusted clusters out of a ranked list: the top cluster, every
/// immediately following cluster tied on rule length with predictability
/// at least the top's, then any remaining cluster structurally more
/// trustable than one already selected.
pub fn select_clusters(ranked: Vec<(Cluster, ClusterScore)>) -> Vec<Cluster> {
    let Some(top_score) = ranked.first().map(|(_, s)| *s) else {
        return Vec::new();
    };
    let top_len = ranked[0].0.rule.tokens.len();

    let mut selected: Vec<Cluster> = Vec::new();
    let mut rest: Vec<Cluster> = Vec::new();
    let mut in_top = true;
    for (i, (cluster, score)) in ranked.into_iter().enumerate() {
        if i == 0 {
            selected.push(cluster);
            continue;
        }
        if in_top
            && cluster.rule.tokens.len() == top_len
            && score.predictability >= top_score.predictability
        {
            selected.push(cluster);
        } else {
            in_top = false;
            rest.push(cluster);
        }
    }
    for cluster in rest {
        if selected
            .iter()
            .any(|top| more_trustable(&cluster.rule, &top.rule))
        {
            selected.push(cluster);
        }
    }
    selected
}

/// Whether a cluster is usable for `target`: rejected when the target maps
/// to four or more distinct aliases inside the cluster, unless one of the
/// target's own mappings carries `archive_canonical` evidence, which is
/// machine-verified and treated as ground truth.
pub fn is_valid_cluster(cluster: &Cluster, target: &NormUrl) -> bool {
    for member in &cluster.members {
        if &member.url == target
            && member
                .tags
                .iter()
                .any(|t| t.method == "archive_canonical" || t.kind == "archive_canonical")
        {
            return true;
        }
    }
    let mut target_aliases: IndexSet<&NormUrl> = IndexSet::new();
    for member in &cluster.members {
        if &member.url == target {
            target_aliases.insert(&member.alias);
        }
    }
    target_aliases.len() < 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagSet;
    use crate::urlnorm::{normalize, NormOpts};

    fn norm(u: &str) -> NormUrl {
        normalize(u, &NormOpts::default())
    }

    fn tag(s: &str) -> EvidenceTag {
        EvidenceTag::parse(s).unwrap()
    }

    fn pool(entries: &[(&str, &str, &[&str])]) -> (CandidateMap, HashMap<NormUrl, String>) {
        let mut pool: CandidateMap = IndexMap::new();
        for (url, alias, tags) in entries {
            let tags: TagSet = tags.iter().map(|t| tag(t)).collect();
            pool.entry(norm(url))
                .or_default()
                .entry(norm(alias))
                .or_default()
                .extend(tags);
        }
        (pool, HashMap::new())
    }

    #[test]
    fn clusters_share_identical_rules() {
        let (pool, titles) = pool(&[
            ("http://s.org/book.cgi?id=1", "http://s.org/books/title?id=1", &["wayback_alias:wayback_alias"]),
            ("http://s.org/book.cgi?id=2", "http://s.org/books/title?id=2", &["wayback_alias:wayback_alias"]),
            ("http://s.org/book.cgi?id=3", "http://s.org/books/title?id=3", &["wayback_alias:wayback_alias"]),
        ]);
        let all_pairs: Vec<(NormUrl, NormUrl)> = pool
            .iter()
            .flat_map(|(u, aliases)| aliases.keys().map(move |a| (u.clone(), a.clone())))
            .collect();
        let clusters = build_clusters(&pool, &titles, true, false);
        for cluster in &clusters {
            for member in &cluster.members {
                let recomputed = rules::rule_for(&member.url, &member.alias, "", &all_pairs, false);
                assert_eq!(recomputed, cluster.rule, "cluster rules are homogeneous");
            }
        }
        // the three sibling pairs end up in one cluster
        assert!(clusters.iter().any(|c| c.members.len() == 3));
    }

    #[test]
    fn popular_alias_with_single_method_is_dropped() {
        let (pool, titles) = pool(&[
            ("http://s.org/a.html", "http://s.org/sitemap.html", &["wayback_alias:wayback_alias"]),
            ("http://s.org/b.html", "http://s.org/sitemap.html", &["wayback_alias:wayback_alias"]),
            ("http://s.org/c.html", "http://s.org/sitemap.html", &["wayback_alias:wayback_alias"]),
        ]);
        let filtered = filter_suspicious(&pool);
        assert!(filtered.is_empty(), "3-way claimed alias must be dropped");
    }

    #[test]
    fn fuzzy_only_claims_do_not_count_toward_popularity() {
        let (pool, _) = pool(&[
            ("http://s.org/a.html", "http://s.org/new/a.html", &["search:fuzzy_search"]),
            ("http://s.org/b.html", "http://s.org/new/a.html", &["search:fuzzy_search"]),
            ("http://s.org/c.html", "http://s.org/new/a.html", &["search:fuzzy_search"]),
        ]);
        let filtered = filter_suspicious(&pool);
        assert_eq!(filtered.len(), 3, "fuzzy-only claims are not popularity");
    }

    #[test]
    fn entirely_unpredictable_rules_are_discarded() {
        let (pool, titles) = pool(&[(
            "http://s.org/one.html",
            "http://s.org/totally/different",
            &["wayback_alias:wayback_alias"],
        )]);
        let clusters = build_clusters(&pool, &titles, false, false);
        let ranked = rank_clusters(clusters, false, &EvidenceWeights::default());
        assert!(ranked.is_empty());
    }

    #[test]
    fn fuzzy_singleton_without_prefix_tail_is_discarded() {
        let (pool, titles) = pool(&[(
            "http://s.org/story-one.html",
            "http://s.org/archive/story-one-annotated.html",
            &["search:fuzzy_search"],
        )]);
        let clusters = build_clusters(&pool, &titles, true, false);
        let ranked = rank_clusters(clusters, true, &EvidenceWeights::default());
        assert!(ranked.is_empty(), "lone fuzzy guess must not survive ranking");
    }

    #[test]
    fn ranking_prefers_hint_weight_then_predictability() {
        let (pool, titles) = pool(&[
            ("http://s.org/book.cgi?id=1", "http://s.org/books/title?id=1", &["wayback_alias:wayback_alias"]),
            ("http://s.org/book.cgi?id=2", "http://s.org/books/title?id=2", &["wayback_alias:wayback_alias"]),
            ("http://s.org/story-one.html", "http://s.org/tales/story-one.html", &["search:title"]),
        ]);
        let clusters = build_clusters(&pool, &titles, true, false);
        let ranked = rank_clusters(clusters, true, &EvidenceWeights::default());
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].1.hint_score, 2.0, "wayback cluster outranks title");
        for pair in ranked.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn archive_canonical_overrides_alias_fanout() {
        let target = norm("http://s.org/page.html");
        let rule = TransformationRule {
            host: "s.org".to_string(),
            tokens: vec![],
        };
        let member = |alias: &str, tags: &[&str]| ClusterMember {
            url: target.clone(),
            alias: norm(alias),
            tags: tags.iter().map(|t| tag(t)).collect(),
        };
        let mut cluster = Cluster {
            rule,
            members: vec![
                member("http://s.org/a1.html", &["search:fuzzy_search"]),
                member("http://s.org/a2.html", &["search:fuzzy_search"]),
                member("http://s.org/a3.html", &["search:fuzzy_search"]),
                member("http://s.org/a4.html", &["search:fuzzy_search"]),
            ],
        };
        assert!(!is_valid_cluster(&cluster, &target), "4-alias fan-out is invalid");
        cluster.members[0]
            .tags
            .push(tag("archive_canonical:archive_canonical"));
        assert!(is_valid_cluster(&cluster, &target), "canonical evidence is ground truth");
    }
}
