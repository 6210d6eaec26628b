//! Core type definitions for alias resolution

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A URL in the crate's canonical normalized form.
///
/// Only `urlnorm::normalize` produces these; the verifier keeps a reverse
/// map back to one raw form for output.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NormUrl(String);

impl NormUrl {
    pub(crate) fn from_normalized(s: String) -> Self {
        NormUrl(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NormUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a candidate alias was discovered: `"method:kind"`,
/// e.g. `search:title_site`, `wayback_alias:wayback_alias`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EvidenceTag {
    pub method: String,
    pub kind: String,
}

impl EvidenceTag {
    pub fn new(method: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kind: kind.into(),
        }
    }

    /// Parse a `"method:kind"` string. A missing separator or an empty
    /// method is a collaborator contract violation.
    pub fn parse(s: &str) -> Result<Self, EvidenceError> {
        let (method, kind) = s
            .split_once(':')
            .ok_or_else(|| EvidenceError::MalformedTag(s.to_string()))?;
        if method.is_empty() {
            return Err(EvidenceError::MalformedTag(s.to_string()));
        }
        Ok(Self::new(method, kind))
    }

    /// The weakest evidence kind: a bare search result with no
    /// title/content/token support.
    pub fn is_fuzzy(&self) -> bool {
        self.kind == "fuzzy_search"
    }
}

impl fmt::Display for EvidenceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.kind)
    }
}

impl TryFrom<String> for EvidenceTag {
    type Error = EvidenceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        EvidenceTag::parse(&s)
    }
}

impl From<EvidenceTag> for String {
    fn from(tag: EvidenceTag) -> String {
        tag.to_string()
    }
}

/// Insertion-ordered evidence tags for one (url, alias) pair.
pub type TagSet = IndexSet<EvidenceTag>;

/// alias -> accumulated tags, insertion-ordered for reproducible ranking.
pub type AliasMap = IndexMap<NormUrl, TagSet>;

/// url -> alias -> tags: the whole evidence pool of one batch.
pub type CandidateMap = IndexMap<NormUrl, AliasMap>;

/// How predictable one alias token is from the source URL and title.
/// Ordinal comparison implements the "best evidence wins" selection.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum MatchLevel {
    Unpredictable = 0,
    Mix = 1,
    Prefix = 2,
    Predictable = 3,
}

/// Refinement of `MatchLevel::Mix`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum MixSubtype {
    Na = 0,
    Str = 1,
    Id = 2,
}

/// One alias token's classification: how well it can be predicted and from
/// what (`url/title`, a shared prefix token, or `N/A`).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RuleToken {
    pub level: MatchLevel,
    pub source: String,
}

impl RuleToken {
    pub fn new(level: MatchLevel, source: impl Into<String>) -> Self {
        Self {
            level,
            source: source.into(),
        }
    }
}

/// Per-pair predictability signature: one `RuleToken` per alias path/query
/// token. Candidates sharing an identical rule form one cluster.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransformationRule {
    pub host: String,
    pub tokens: Vec<RuleToken>,
}

impl TransformationRule {
    /// Level of the final (filename/last query) token, the strongest
    /// structural signal a rule carries.
    pub fn tail_level(&self) -> Option<MatchLevel> {
        self.tokens.last().map(|t| t.level)
    }
}

/// One (url, alias) observation inside a cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMember {
    pub url: NormUrl,
    pub alias: NormUrl,
    pub tags: Vec<EvidenceTag>,
}

/// Candidates grouped under one identical transformation rule. Ephemeral:
/// rebuilt whenever the evidence pool changes.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub rule: TransformationRule,
    pub members: Vec<ClusterMember>,
}

/// Ranking triple for a cluster, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterScore {
    pub hint_score: f64,
    pub predictability: f64,
    pub distinct_urls: usize,
}

impl Eq for ClusterScore {}

impl Ord for ClusterScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hint_score
            .total_cmp(&other.hint_score)
            .then(self.predictability.total_cmp(&other.predictability))
            .then(self.distinct_urls.cmp(&other.distinct_urls))
    }
}

impl PartialOrd for ClusterScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Static evidence-kind weight table. Used only for ranking, never mutated.
#[derive(Debug, Clone)]
pub struct EvidenceWeights {
    weights: IndexMap<&'static str, f64>,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        let mut weights = IndexMap::new();
        weights.insert("archive_canonical", 10.0);
        weights.insert("wayback_alias", 2.0);
        weights.insert("inference", 1.5);
        weights.insert("title", 1.0);
        weights.insert("content", 1.0);
        weights.insert("anchor", 1.0);
        weights.insert("token", 0.5);
        Self { weights }
    }
}

impl EvidenceWeights {
    /// Weight of a single hint string; unknown hints (including
    /// `fuzzy_search`) score zero.
    pub fn hint(&self, hint: &str) -> f64 {
        self.weights.get(hint).copied().unwrap_or(0.0)
    }

    /// Weight of one tag: method and kind parts each score, counted once
    /// when they are the same string (e.g. `wayback_alias:wayback_alias`).
    pub fn tag(&self, tag: &EvidenceTag) -> f64 {
        if tag.method == tag.kind {
            self.hint(&tag.method)
        } else {
            self.hint(&tag.method) + self.hint(&tag.kind)
        }
    }

    /// Cumulative weight over a set of tags, the per-candidate credibility
    /// used to order `verify_url` output.
    pub fn cumulative(&self, tags: &[EvidenceTag]) -> f64 {
        tags.iter().map(|t| self.tag(t)).sum()
    }
}

/// Knobs for one resolution batch.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Whether the evidence pool is dominated by fuzzy search results
    /// (the orchestration loop's mode). Changes cluster ranking rules.
    pub fuzzy: bool,
    /// Upgrade alias tokens shared across unrelated pairs to `Prefix`.
    pub common_prefix: bool,
    /// Max wildcarded positions per generated pattern.
    pub max_diff: usize,
    /// Act on the early-skip signal instead of only logging it.
    pub stop_early: bool,
    /// Collect neighbor evidence only when the target batch is smaller
    /// than this.
    pub neighbor_threshold: usize,
    pub weights: EvidenceWeights,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            fuzzy: true,
            common_prefix: false,
            max_diff: 2,
            stop_early: false,
            neighbor_threshold: 10,
            weights: EvidenceWeights::default(),
        }
    }
}

/// One verified alias with its justification, ordered by cumulative
/// evidence weight.
#[derive(Debug, Clone, Serialize)]
pub struct RankedAlias {
    pub alias: String,
    pub tags: Vec<EvidenceTag>,
    pub weight: f64,
}

/// A collaborator handed the core something structurally unusable. Reported
/// per URL; never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("malformed evidence tag `{0}`: expected `method:kind`")]
    MalformedTag(String),
    #[error("empty alias for source url `{0}`")]
    EmptyAlias(String),
}

/// Per-URL contract violation surfaced in the batch outcome.
#[derive(Debug, Clone, Serialize)]
pub struct UrlEvidenceError {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub urls_total: usize,
    pub neighbors: usize,
    pub urls_touched: usize,
    pub candidates_seen: usize,
    pub iterations: usize,
    pub inference_calls: usize,
    pub early_skip_indicated: bool,
    pub elapsed_ms: u64,
}

/// Result of one `resolve_batch` run: first-win resolution per URL plus
/// per-URL evidence errors and run stats.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub resolved: IndexMap<String, RankedAlias>,
    pub errors: Vec<UrlEvidenceError>,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parse_roundtrip() {
        let tag = EvidenceTag::parse("search:title_site").unwrap();
        assert_eq!(tag.method, "search");
        assert_eq!(tag.kind, "title_site");
        assert_eq!(tag.to_string(), "search:title_site");
    }

    #[test]
    fn tag_parse_rejects_missing_separator() {
        assert!(matches!(
            EvidenceTag::parse("wayback_alias"),
            Err(EvidenceError::MalformedTag(_))
        ));
        assert!(matches!(
            EvidenceTag::parse(":kind"),
            Err(EvidenceError::MalformedTag(_))
        ));
    }

    #[test]
    fn match_level_ordering() {
        assert!(MatchLevel::Unpredictable < MatchLevel::Mix);
        assert!(MatchLevel::Mix < MatchLevel::Prefix);
        assert!(MatchLevel::Prefix < MatchLevel::Predictable);
    }

    #[test]
    fn weights_dedup_same_method_and_kind() {
        let w = EvidenceWeights::default();
        let tag = EvidenceTag::new("wayback_alias", "wayback_alias");
        assert_eq!(w.tag(&tag), 2.0);
        let tag = EvidenceTag::new("search", "archive_canonical");
        assert_eq!(w.tag(&tag), 10.0);
        let tag = EvidenceTag::new("search", "fuzzy_search");
        assert_eq!(w.tag(&tag), 0.0);
    }

    #[test]
    fn cluster_score_orders_lexicographically() {
        let a = ClusterScore {
            hint_score: 2.0,
            predictability: -1.0,
            distinct_urls: 1,
        };
        let b = ClusterScore {
            hint_score: 2.0,
            predictability: 0.0,
            distinct_urls: 1,
        };
        assert!(b > a);
        let c = ClusterScore {
            hint_score: 10.0,
            predictability: -5.0,
            distinct_urls: 1,
        };
        assert!(c > b);
    }
}
