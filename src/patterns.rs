//! Generalized URL patterns and the pattern index.
//!
//! A pattern is a URL with up to `max_diff` path/query tokens replaced by
//! character-class wildcards. URLs sharing a pattern are structural
//! siblings; the index answers "which other URLs share a pattern with
//! this one" incrementally.

use crate::urlnorm;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// Character class of a wildcarded token, derived from the original
/// token's alphabetic/numeric content.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
pub enum CharClass {
    Alpha,
    Numeric,
    Alphanumeric,
    Other,
}

impl CharClass {
    pub fn of(token: &str) -> Self {
        let has_alpha = token.chars().any(|c| c.is_alphabetic());
        let has_digit = token.chars().any(|c| c.is_numeric());
        match (has_alpha, has_digit) {
            (true, true) => CharClass::Alphanumeric,
            (true, false) => CharClass::Alpha,
            (false, true) => CharClass::Numeric,
            (false, false) => CharClass::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CharClass::Alpha => "*A",
            CharClass::Numeric => "*N",
            CharClass::Alphanumeric => "*AN",
            CharClass::Other => "*",
        }
    }
}

/// One position of a pattern: a literal path segment, a literal query
/// pair, or the wildcarded form of either.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub enum PatternToken {
    Path(String),
    PathWild(CharClass),
    Query { key: String, value: String },
    QueryWild { key: String, class: CharClass },
}

impl PatternToken {
    fn wildcarded(&self) -> PatternToken {
        match self {
            PatternToken::Path(s) => PatternToken::PathWild(CharClass::of(s)),
            PatternToken::Query { key, value } => PatternToken::QueryWild {
                key: key.clone(),
                class: CharClass::of(value),
            },
            wild => wild.clone(),
        }
    }

    fn is_wild(&self) -> bool {
        matches!(
            self,
            PatternToken::PathWild(_) | PatternToken::QueryWild { .. }
        )
    }
}

/// Host plus ordered tokens, path segments first, then query pairs in
/// sorted key order. The host is never wildcarded.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct Pattern {
    pub host: String,
    pub tokens: Vec<PatternToken>,
}

impl Pattern {
    pub fn wildcards(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_wild()).count()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        for token in &self.tokens {
            match token {
                PatternToken::Path(s) => write!(f, "/{s}")?,
                PatternToken::PathWild(c) => write!(f, "/{}", c.label())?,
                PatternToken::Query { key, value } => write!(f, "&{key}={value}")?,
                PatternToken::QueryWild { key, class } => {
                    write!(f, "&{key}={}", class.label())?
                }
            }
        }
        Ok(())
    }
}

fn base_tokens(url: &str) -> (String, Vec<PatternToken>) {
    let parsed = match Url::parse(url).or_else(|_| Url::parse(&format!("http://{url}"))) {
        Ok(u) => u,
        Err(_) => return (url.trim().to_lowercase(), Vec::new()),
    };
    let host = parsed
        .host_str()
        .map(|h| h.strip_prefix("www.").unwrap_or(h))
        .unwrap_or("")
        .to_string();

    let mut tokens = Vec::new();
    let mut path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        tokens.push(PatternToken::Path(seg.to_string()));
    }

    let raw_query = parsed.query().unwrap_or("");
    let mut pairs: IndexMap<String, String> = IndexMap::new();
    for (k, v) in raw_query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .filter(|(k, _)| !k.is_empty())
    {
        pairs.entry(k.to_string()).or_insert_with(|| v.to_string());
    }
    if pairs.is_empty() && !raw_query.is_empty() {
        pairs.insert("NoKey".to_string(), raw_query.to_string());
    }
    let mut pairs: Vec<(String, String)> = pairs.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in pairs {
        tokens.push(PatternToken::Query { key, value });
    }
    (host, tokens)
}

/// All non-decreasing index sequences of length `r` over `0..n`, in
/// lexicographic order.
fn combinations_with_replacement(n: usize, r: usize) -> Vec<Vec<usize>> {
    fn rec(n: usize, r: usize, start: usize, cur: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if cur.len() == r {
            out.push(cur.clone());
            return;
        }
        for i in start..n {
            cur.push(i);
            rec(n, r, i, cur, out);
            cur.pop();
        }
    }
    let mut out = Vec::new();
    rec(n, r, 0, &mut Vec::new(), &mut out);
    out
}

fn distinct_count(combo: &[usize]) -> usize {
    // combos are non-decreasing, so transitions count distinct values
    let mut count = 0;
    let mut last = None;
    for &i in combo {
        if last != Some(i) {
            count += 1;
            last = Some(i);
        }
    }
    count
}

/// Generate all generalizations of a URL with at most `max_diff`
/// wildcarded positions, most specific (fewest distinct wildcards) first.
/// A URL with zero tokens yields the single host-only pattern.
pub fn gen_patterns(url: &str, max_diff: usize) -> Vec<Pattern> {
    let (host, tokens) = base_tokens(url);
    if tokens.is_empty() || max_diff == 0 {
        return vec![Pattern { host, tokens }];
    }
    let mut combos = combinations_with_replacement(tokens.len(), max_diff);
    combos.sort_by_key(|c| distinct_count(c));

    let mut patterns: IndexSet<Pattern> = IndexSet::new();
    for combo in combos {
        let mut wild = tokens.clone();
        for &idx in &combo {
            wild[idx] = wild[idx].wildcarded();
        }
        patterns.insert(Pattern {
            host: host.clone(),
            tokens: wild,
        });
    }
    patterns.into_iter().collect()
}

/// A group of URLs sharing one pattern.
#[derive(Debug, Clone, Serialize)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub urls: Vec<String>,
}

/// Mutable pattern → URL-bucket index, scoped to one batch. Buckets keep
/// insertion order so match results are reproducible.
#[derive(Debug)]
pub struct PatternIndex {
    max_diff: usize,
    buckets: IndexMap<Pattern, Vec<String>>,
    urls: IndexSet<String>,
}

impl PatternIndex {
    pub fn new(max_diff: usize) -> Self {
        Self {
            max_diff,
            buckets: IndexMap::new(),
            urls: IndexSet::new(),
        }
    }

    pub fn url_count(&self) -> usize {
        self.urls.len()
    }

    /// Insert a URL under all of its patterns. Idempotent: re-adding a
    /// known URL changes nothing.
    pub fn add(&mut self, url: &str) {
        if !self.urls.insert(url.to_string()) {
            return;
        }
        for pattern in gen_patterns(url, self.max_diff) {
            self.buckets
                .entry(pattern)
                .or_default()
                .push(url.to_string());
        }
    }

    /// Match groups for one URL: every pattern of `url` already holding at
    /// least `least_match` URLs, deduplicated so a URL set reported under
    /// a more specific pattern is not reported again under a general one.
    /// `match_ext` keeps only bucket URLs sharing `url`'s file extension.
    pub fn match_url(&self, url: &str, least_match: usize, match_ext: bool) -> Vec<PatternMatch> {
        let ext = urlnorm::path_ext(url);
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut matched = Vec::new();
        for pattern in gen_patterns(url, self.max_diff) {
            let Some(bucket) = self.buckets.get(&pattern) else {
                continue;
            };
            if bucket.len() < least_match {
                continue;
            }
            let mut key: Vec<String> = bucket.clone();
            key.sort();
            if !seen.insert(key) {
                continue;
            }
            let urls = if match_ext {
                bucket
                    .iter()
                    .filter(|u| urlnorm::path_ext(u) == ext)
                    .cloned()
                    .collect()
            } else {
                bucket.clone()
            };
            matched.push(PatternMatch { pattern, urls });
        }
        matched
    }

    /// Direct bucket lookup for an exact pattern.
    pub fn match_pattern(&self, pattern: &Pattern) -> &[String] {
        self.buckets
            .get(pattern)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All match groups across the whole index, same dedup rule as
    /// `match_url`, in bucket insertion order.
    pub fn pop_matches(&self, least_match: usize) -> Vec<PatternMatch> {
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut matched = Vec::new();
        for (pattern, bucket) in &self.buckets {
            if bucket.len() < least_match {
                continue;
            }
            let mut key: Vec<String> = bucket.clone();
            key.sort();
            if !seen.insert(key) {
                continue;
            }
            matched.push(PatternMatch {
                pattern: pattern.clone(),
                urls: bucket.clone(),
            });
        }
        matched
    }
}
