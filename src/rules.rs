//! Transformation-rule classification.
//!
//! For every token of a candidate alias, decide how predictable it is from
//! the source URL's tokens and the page title, producing the
//! `TransformationRule` signature that clusters are grouped by.

use crate::types::{MatchLevel, MixSubtype, NormUrl, RuleToken, TransformationRule};
use crate::urlnorm::{self, strip_short_ext, word_tokens};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

// vertical bar lookalikes commonly used as title separators
const VERTICAL_BARS: &str =
    "\u{007C}\u{00A6}\u{2016}\u{FF5C}\u{2225}\u{01C0}\u{01C1}\u{2223}\u{2502}\u{0964}\u{0965}";

fn title_delimiters() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let bars = VERTICAL_BARS;
        Regex::new(&format!(
            "_| [{bars}] |[{bars}]| \\p{{Pd}} |\\p{{Pd}}| :: |::"
        ))
        .unwrap()
    })
}

/// Variants of a title for token comparison: head join, tail join, and the
/// full join, to tolerate truncated or extended titles. A title with no
/// delimiter is compared whole.
pub(crate) fn title_variants(title: &str) -> Vec<String> {
    let parts: Vec<&str> = title_delimiters().split(title).collect();
    if parts.len() > 1 {
        vec![
            parts[..parts.len() - 1].join(" "),
            parts[1..].join(" "),
            parts.join(" "),
        ]
    } else {
        vec![title.to_string()]
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn digits_equal(a: &str, b: &str) -> bool {
    // integer equality without overflow concerns: 01 == 1
    a.trim_start_matches('0') == b.trim_start_matches('0')
}

fn ngrams<'a>(tokens: &'a [String], n: usize) -> HashSet<Vec<&'a str>> {
    tokens
        .windows(n)
        .map(|w| w.iter().map(String::as_str).collect())
        .collect()
}

/// How predictable token `s2` is given source text `s1`.
///
/// Numerically equal digit tokens short-circuit to `Predictable`. Otherwise
/// both sides lose short file extensions and are word-tokenized; full
/// coverage of `s2`'s words with at least half of `s1`'s is `Predictable`,
/// a bigram overlap of at least half of `s2`'s is `Mix`, anything else is
/// `Unpredictable`.
pub fn predict(s1: &str, s2: &str) -> (MatchLevel, MixSubtype) {
    if is_digits(s1) && is_digits(s2) && digits_equal(s1, s2) {
        return (MatchLevel::Predictable, MixSubtype::Na);
    }
    let s1 = strip_short_ext(s1);
    let s2 = strip_short_ext(s2);
    let t1 = word_tokens(s1);
    let t2 = word_tokens(s2);
    let set1: HashSet<&str> = t1.iter().map(String::as_str).collect();
    let set2: HashSet<&str> = t2.iter().map(String::as_str).collect();
    if set1.is_empty() || set2.is_empty() {
        return (MatchLevel::Unpredictable, MixSubtype::Na);
    }
    let (n1, n2) = (set1.len(), set2.len());
    // one-word vs multi-word comparisons produce spurious overlap
    if n1 + n2 > 2 && (n1 * n2 == n1 || n1 * n2 == n2) {
        return (MatchLevel::Unpredictable, MixSubtype::Na);
    }
    let inter = set1.intersection(&set2).count();
    if inter == n2 && inter * 2 >= n1 {
        return (MatchLevel::Predictable, MixSubtype::Na);
    }
    let n = 2.min(n1).min(n2);
    let g1 = ngrams(&t1, n);
    let g2 = ngrams(&t2, n);
    let ginter = g1.intersection(&g2).count();
    if ginter * 2 >= g2.len() {
        return (MatchLevel::Mix, MixSubtype::Str);
    }
    (MatchLevel::Unpredictable, MixSubtype::Na)
}

fn source_for(level: MatchLevel, token: &str) -> String {
    match level {
        MatchLevel::Predictable | MatchLevel::Mix => "url/title".to_string(),
        MatchLevel::Prefix => token.to_string(),
        MatchLevel::Unpredictable => "N/A".to_string(),
    }
}

fn intersect_prefix(token: &str, index: usize, other_alias_tokens: &[Vec<String>]) -> bool {
    if is_digits(token) {
        return false;
    }
    other_alias_tokens
        .iter()
        .any(|tokens| tokens.get(index + 1).map(String::as_str) == Some(token))
}

/// Classify every alias token against the source URL and title, yielding
/// the pair's transformation rule.
///
/// `other_pairs` is the pool of sibling (url, alias) observations; in
/// `common_prefix` mode a non-final, non-numeric alias token reproduced at
/// the same position by an unrelated pair upgrades to `Prefix`: several
/// sources independently producing the same segment is strong evidence of
/// a fixed literal.
pub fn rule_for(
    url: &NormUrl,
    alias: &NormUrl,
    title: &str,
    other_pairs: &[(NormUrl, NormUrl)],
    common_prefix: bool,
) -> TransformationRule {
    let others: Vec<&(NormUrl, NormUrl)> = other_pairs
        .iter()
        .filter(|(u, a)| u != url && a != alias)
        .collect();
    let other_alias_tokens: Vec<Vec<String>> = if common_prefix {
        others
            .iter()
            .map(|(_, a)| urlnorm::tokenize_url(a.as_str(), true))
            .collect()
    } else {
        Vec::new()
    };

    let url_tokens = urlnorm::tokenize_url(url.as_str(), true);
    let alias_tokens = urlnorm::tokenize_url(alias.as_str(), true);
    let titles = title_variants(title);

    let (host, alias_rest) = match alias_tokens.split_first() {
        Some((host, rest)) => (host.clone(), rest),
        None => (String::new(), &[][..]),
    };

    let last = alias_rest.len().saturating_sub(1);
    let mut tokens = Vec::with_capacity(alias_rest.len());
    for (i, at) in alias_rest.iter().enumerate() {
        let mut best = RuleToken::new(MatchLevel::Unpredictable, "");
        if common_prefix && i != last && intersect_prefix(at, i, &other_alias_tokens) {
            best = RuleToken::new(MatchLevel::Prefix, at.clone());
        }
        for ut in url_tokens.iter().skip(1) {
            let (level, _) = predict(ut, at);
            let candidate = RuleToken::new(level, source_for(level, at));
            if candidate > best {
                best = candidate;
            }
        }
        if best.level < MatchLevel::Prefix {
            for tv in &titles {
                let (level, _) = predict(tv, at);
                let candidate = RuleToken::new(level, source_for(level, at));
                if candidate > best {
                    best = candidate;
                }
            }
        }
        tokens.push(best);
    }
    TransformationRule { host, tokens }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(u: &str) -> NormUrl {
        urlnorm::normalize(u, &urlnorm::NormOpts::default())
    }

    #[test]
    fn predict_identical_strings_is_predictable() {
        for s in ["story", "alices-adventures", "book.cgi", "12"] {
            assert_eq!(predict(s, s).0, MatchLevel::Predictable, "{s}");
        }
    }

    #[test]
    fn predict_empty_source_is_unpredictable() {
        assert_eq!(predict("", "story").0, MatchLevel::Unpredictable);
        assert_eq!(predict("story", "").0, MatchLevel::Unpredictable);
    }

    #[test]
    fn predict_numeric_equality_ignores_leading_zeros() {
        assert_eq!(predict("01", "1").0, MatchLevel::Predictable);
        assert_eq!(predict("12", "13").0, MatchLevel::Unpredictable);
    }

    #[test]
    fn predict_word_counts_guard_against_spurious_overlap() {
        // single word vs many words never matches
        assert_eq!(
            predict("war", "war-and-peace-volume-two").0,
            MatchLevel::Unpredictable
        );
    }

    #[test]
    fn predict_partial_overlap_is_mix() {
        assert_eq!(
            predict("alices-adventures-in-wonderland", "alices-adventures-annotated"),
            (MatchLevel::Mix, MixSubtype::Str)
        );
    }

    #[test]
    fn title_variants_split_head_and_tail() {
        let variants = title_variants("Alices Adventures | Example Press");
        assert_eq!(
            variants,
            vec![
                "Alices Adventures".to_string(),
                "Example Press".to_string(),
                "Alices Adventures Example Press".to_string(),
            ]
        );
        assert_eq!(title_variants("No Delimiter"), vec!["No Delimiter"]);
    }

    #[test]
    fn rule_tracks_predictable_numeric_tail() {
        let url = norm("http://s.org/book.cgi?id=3");
        let alias = norm("http://s.org/books/title?id=3");
        let rule = rule_for(&url, &alias, "T3", &[], false);
        assert_eq!(rule.host, "s.org");
        assert_eq!(rule.tail_level(), Some(MatchLevel::Predictable));
    }

    #[test]
    fn common_prefix_mode_upgrades_shared_segments() {
        let url = norm("http://s.org/story.cgi?id=1");
        let alias = norm("http://s.org/archive/story-one");
        let others = vec![
            (
                norm("http://s.org/story.cgi?id=2"),
                norm("http://s.org/archive/story-two"),
            ),
        ];
        let rule = rule_for(&url, &alias, "", &others, true);
        // "archive" is reproduced at the same position by an unrelated pair
        assert_eq!(rule.tokens[0].level, MatchLevel::Prefix);
        assert_eq!(rule.tokens[0].source, "archive");

        let rule = rule_for(&url, &alias, "", &others, false);
        assert_eq!(rule.tokens[0].level, MatchLevel::Unpredictable);
    }
}
