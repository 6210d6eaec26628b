//! URL normalization and tokenization.
//!
//! Everything here is pure string work: no I/O, no failure modes. A URL
//! that cannot be parsed degrades to the most conservative form instead of
//! erroring out of a batch.

use crate::types::NormUrl;
use std::sync::OnceLock;
use url::Url;

/// Normalization profile. The default matches what the verifier applies to
/// every ingested URL.
#[derive(Debug, Clone, Copy)]
pub struct NormOpts {
    /// Fold https into http.
    pub ignore_scheme: bool,
    /// Drop a leading `www.` host label.
    pub trim_www: bool,
    /// Drop the trailing slash of non-root paths.
    pub trim_slash: bool,
    /// Sort query pairs by (key, value).
    pub sort_query: bool,
}

impl Default for NormOpts {
    fn default() -> Self {
        Self {
            ignore_scheme: true,
            trim_www: true,
            trim_slash: true,
            sort_query: true,
        }
    }
}

fn ensure_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

fn parse_or_http(url: &str) -> Option<Url> {
    Url::parse(&ensure_scheme(url.trim())).ok()
}

fn trim_www_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Split a query string into its `k=v` pairs. Fragments without `=` are
/// dropped, matching common query parsing; a query with no parsable pair
/// at all is kept verbatim by the caller.
fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Canonicalize a URL. Pure and idempotent for a fixed `opts`:
/// `normalize(normalize(u)) == normalize(u)`.
///
/// Port and fragment are always dropped; path and query are case-folded.
/// Percent-escapes are left encoded so repeated normalization is stable.
pub fn normalize(raw: &str, opts: &NormOpts) -> NormUrl {
    let Some(parsed) = parse_or_http(raw) else {
        return NormUrl::from_normalized(raw.trim().to_lowercase());
    };
    let scheme = if opts.ignore_scheme {
        "http"
    } else {
        parsed.scheme()
    };
    let mut host = parsed.host_str().unwrap_or("").to_string();
    if opts.trim_www {
        host = trim_www_host(&host).to_string();
    }

    let mut path = parsed.path().to_lowercase();
    if path.is_empty() {
        path = "/".to_string();
    } else if opts.trim_slash && path != "/" && path.ends_with('/') {
        path.pop();
    }

    let query = match parsed.query() {
        None | Some("") => String::new(),
        Some(q) => {
            let q = q.to_lowercase();
            let mut pairs = query_pairs(&q);
            if pairs.is_empty() {
                format!("?{q}")
            } else {
                if opts.sort_query {
                    pairs.sort();
                }
                let joined = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                format!("?{joined}")
            }
        }
    };

    NormUrl::from_normalized(format!("{scheme}://{host}{path}{query}"))
}

/// Drop query strings that only select a print view; they never identify a
/// distinct page.
pub fn drop_print_query(url: &str) -> String {
    let Some(parsed) = parse_or_http(url) else {
        return url.to_string();
    };
    match parsed.query() {
        Some(q) if q.contains("print") => match url.split_once('?') {
            Some((head, _)) => head.to_string(),
            None => url.to_string(),
        },
        _ => url.to_string(),
    }
}

fn match_path(path: &str) -> String {
    let mut path = if path.is_empty() { "/" } else { path }.to_lowercase();
    if path != "/" && path.ends_with('/') {
        path.pop();
    }
    // index.* leaf filenames address the enclosing directory
    if let Some((dir, file)) = path.rsplit_once('/') {
        if file.starts_with("index") {
            path = if dir.is_empty() { "/".to_string() } else { dir.to_string() };
        }
    }
    path
}

/// Whether two URLs address the same page: equal modulo scheme, `www.`,
/// trailing slash, `index.*` leaf filenames, and query order.
pub fn url_match(a: &str, b: &str) -> bool {
    let (Some(ua), Some(ub)) = (parse_or_http(a), parse_or_http(b)) else {
        return a.trim().to_lowercase() == b.trim().to_lowercase();
    };
    let host_a = trim_www_host(ua.host_str().unwrap_or(""));
    let host_b = trim_www_host(ub.host_str().unwrap_or(""));
    if host_a != host_b {
        return false;
    }
    if match_path(ua.path()) != match_path(ub.path()) {
        return false;
    }
    let qa = ua.query().unwrap_or("").to_lowercase();
    let qb = ub.query().unwrap_or("").to_lowercase();
    if qa == qb {
        return true;
    }
    let mut pa = query_pairs(&qa);
    let mut pb = query_pairs(&qb);
    pa.sort();
    pb.sort();
    !pa.is_empty() && pa == pb
}

fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Word tokens of a text: `\w+` runs, lowercased, with underscores treated
/// as separators and apostrophes/commas removed.
pub fn word_tokens(text: &str) -> Vec<String> {
    static WORD: OnceLock<regex::Regex> = OnceLock::new();
    let re = WORD.get_or_init(|| regex::Regex::new(r"\w+").unwrap());
    let cleaned = text.replace('_', " ").replace(['\'', ','], "");
    re.find_iter(&cleaned.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Strip a short (< 6 chars including the dot) file extension. Longer
/// suffixes are content, not extensions.
pub(crate) fn strip_short_ext(s: &str) -> &str {
    match s.rfind('.') {
        None | Some(0) => s,
        Some(i) => {
            if s[..i].chars().all(|c| c == '.') {
                s
            } else if s.len() - i < 6 {
                &s[..i]
            } else {
                s
            }
        }
    }
}

/// Extension (with dot, lowercased) of a URL's path, empty when none.
pub(crate) fn path_ext(url: &str) -> String {
    let Some(parsed) = parse_or_http(url) else {
        return String::new();
    };
    let path = parsed.path();
    let file = path.rsplit('/').next().unwrap_or("");
    match file.rfind('.') {
        None | Some(0) => String::new(),
        Some(i) => file[i..].to_lowercase(),
    }
}

/// Ordered URL tokens: path segments (percent-decoded, lowercased, empty
/// segments dropped) followed by query values in sorted key order, with
/// the host optionally prepended.
pub fn tokenize_url(url: &str, include_host: bool) -> Vec<String> {
    let Some(parsed) = parse_or_http(url) else {
        return vec![url.trim().to_lowercase()];
    };
    let mut tokens = Vec::new();
    if include_host {
        let host = trim_www_host(parsed.host_str().unwrap_or(""));
        tokens.push(host.to_lowercase());
    }
    let mut path = percent_decode(parsed.path()).to_lowercase();
    if path != "/" && path.ends_with('/') {
        path.pop();
    }
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        tokens.push(seg.to_string());
    }
    let query = percent_decode(parsed.query().unwrap_or("")).to_lowercase();
    let mut pairs = query_pairs(&query);
    pairs.sort();
    for (_, v) in pairs {
        tokens.push(v);
    }
    tokens
}

/// The batch key of a URL: host plus the closest non-digit parent
/// directory, with `index`/`default` leaf filenames treated as the
/// directory itself.
pub fn netloc_dir(url: &str) -> (String, String) {
    let Some(parsed) = parse_or_http(url) else {
        return (url.trim().to_lowercase(), String::new());
    };
    let host_labels: Vec<&str> = parsed.host_str().unwrap_or("").split('.').collect();
    let host = if host_labels
        .first()
        .is_some_and(|l| l.starts_with("www"))
    {
        host_labels[1..].join(".")
    } else {
        host_labels.join(".")
    };

    let mut path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    let mut parts: Vec<&str> = path.split('/').collect();
    if let Some(&last) = parts.last() {
        let stem = match last.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => last,
        };
        if stem == "index" || stem == "default" {
            parts.pop();
        }
    }
    // parent directory, then climb past trailing all-digit segments
    parts.pop();
    while parts
        .last()
        .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        parts.pop();
    }
    (host.to_lowercase(), parts.join("/").to_lowercase())
}

const NA_KEYWORDS: [&str; 7] = [
    "login",
    "subscription",
    "error",
    "notfound",
    "404",
    "badpage",
    "errorpath",
];

/// Whether a URL's filename marks it as a service page (login, error,
/// subscription and friends) rather than content.
pub fn na_url(url: &str) -> bool {
    let Some(parsed) = parse_or_http(url) else {
        return false;
    };
    let mut path = parsed.path().to_string();
    if path != "/" && path.ends_with('/') {
        path.pop();
    }
    let filename = path.rsplit('/').next().unwrap_or("");
    let tokens = word_tokens(filename);
    NA_KEYWORDS
        .iter()
        .any(|k| tokens.iter().any(|t| t == k))
}

fn is_homepage(url: &str) -> bool {
    parse_or_http(url).is_some_and(|u| matches!(u.path(), "" | "/"))
}

/// Structural smell check for a candidate alias: service-page filenames,
/// a non-homepage collapsing to a homepage, or a non-HTML document.
pub fn suspicious_alias(url: &str, alias: &str) -> bool {
    if na_url(alias) {
        return true;
    }
    if !is_homepage(url) && is_homepage(alias) {
        return true;
    }
    matches!(path_ext(alias).as_str(), ".pdf" | ".jpeg" | ".jpg" | ".doc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let opts = NormOpts::default();
        for raw in [
            "https://www.Example.com:8080/A/B/?z=2&a=1#frag",
            "http://example.com",
            "example.com/path/",
            "http://s.org/book.cgi?id=4",
            "not a url at all",
            "http://example.com/find?q=%20x",
        ] {
            let once = normalize(raw, &opts);
            let twice = normalize(once.as_str(), &opts);
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn normalize_folds_scheme_www_and_query_order() {
        let opts = NormOpts::default();
        assert_eq!(
            normalize("https://www.Example.com/A/?b=2&a=1", &opts).as_str(),
            "http://example.com/a?a=1&b=2"
        );
    }

    #[test]
    fn normalize_keeps_unparsable_query_verbatim() {
        let opts = NormOpts::default();
        assert_eq!(
            normalize("http://example.com/p?flag", &opts).as_str(),
            "http://example.com/p?flag"
        );
    }

    #[test]
    fn drop_print_query_strips_print_views() {
        assert_eq!(
            drop_print_query("http://example.com/a?print=1"),
            "http://example.com/a"
        );
        assert_eq!(
            drop_print_query("http://example.com/a?id=3"),
            "http://example.com/a?id=3"
        );
    }

    #[test]
    fn url_match_ignores_index_and_slash() {
        assert!(url_match(
            "http://example.com/dir/index.html",
            "https://www.example.com/dir/"
        ));
        assert!(url_match(
            "http://example.com/a?x=1&y=2",
            "http://example.com/a?y=2&x=1"
        ));
        assert!(!url_match(
            "http://example.com/a",
            "http://example.com/b"
        ));
    }

    #[test]
    fn tokenize_orders_path_then_query_values() {
        let tokens = tokenize_url("http://www.s.org/books/fiction/book.cgi?id=12&b=x", true);
        assert_eq!(tokens, vec!["s.org", "books", "fiction", "book.cgi", "x", "12"]);
    }

    #[test]
    fn netloc_dir_climbs_digit_and_index_segments() {
        assert_eq!(
            netloc_dir("http://www.example.com/news/2019/article.html"),
            ("example.com".to_string(), "/news".to_string())
        );
        assert_eq!(
            netloc_dir("http://example.com/docs/index.php"),
            ("example.com".to_string(), "".to_string())
        );
    }

    #[test]
    fn suspicious_alias_flags_service_pages_and_homepages() {
        assert!(suspicious_alias(
            "http://example.com/a/b.html",
            "http://example.com/login.php"
        ));
        assert!(suspicious_alias(
            "http://example.com/a/b.html",
            "http://example.com/"
        ));
        assert!(suspicious_alias(
            "http://example.com/a/b.html",
            "http://example.com/files/b.pdf"
        ));
        assert!(!suspicious_alias(
            "http://example.com/a/b.html",
            "http://example.com/c/b.html"
        ));
    }

    #[test]
    fn word_tokens_splits_on_word_boundaries() {
        assert_eq!(
            word_tokens("Alice's_Adventures, in-Wonderland"),
            vec!["alices", "adventures", "in", "wonderland"]
        );
        assert!(word_tokens("").is_empty());
    }

    #[test]
    fn strip_short_ext_only_strips_short_suffixes() {
        assert_eq!(strip_short_ext("story.html"), "story");
        assert_eq!(strip_short_ext("story.verylongext"), "story.verylongext");
        assert_eq!(strip_short_ext("story"), "story");
        assert_eq!(strip_short_ext(".hidden"), ".hidden");
    }
}
