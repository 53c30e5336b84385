//! URL normalization and crawl-policy enforcement.
//!
//! Mirrors the normalization this codebase already applied for its link
//! index, but folds in the crawl policy (same-host, extension/path
//! denylists, robots) that the original crawler's `_normalize_url`/
//! `_should_crawl` pair implemented.

use once_cell::sync::Lazy;
use regex::RegexSet;
use url::Url;

const DENYLISTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "pdf", "zip", "tar", "gz", "mp4", "mp3",
    "wav", "css", "js", "woff", "woff2", "ttf", "eot",
];

const DENYLISTED_PATH_PATTERNS: &[&str] =
    &["/login", "/signin", "/signup", "/register", "/admin"];

static DENYLISTED_PATHS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(DENYLISTED_PATH_PATTERNS).expect("denylisted path patterns must compile")
});

/// Normalize a URL: lowercase scheme/host, strip a non-root trailing slash,
/// drop the fragment. Query strings are preserved at this stage; the crawl
/// policy rejects non-empty queries separately so that redirect targets can
/// still be normalized before the policy check runs.
#[must_use]
pub fn normalize(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }

    let mut normalized = String::with_capacity(url.len());
    normalized.push_str(parsed.scheme());
    normalized.push_str("://");
    normalized.push_str(parsed.host_str()?);
    if let Some(port) = parsed.port() {
        let default_port = if parsed.scheme() == "https" { 443 } else { 80 };
        if port != default_port {
            normalized.push(':');
            normalized.push_str(&port.to_string());
        }
    }

    let path = parsed.path();
    if path.len() > 1 && path.ends_with('/') {
        normalized.push_str(&path[..path.len() - 1]);
    } else {
        normalized.push_str(path);
    }

    if let Some(query) = parsed.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    Some(normalized)
}

/// Extract the lowercase host of a URL, or `None` if it does not parse.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_lowercase)
}

/// Decide whether `url` is eligible to be crawled within a site rooted at
/// `root_host`. Does not consult robots rules directly; callers combine this
/// with a loaded [`crate::robots::RobotsRules`].
#[must_use]
pub fn should_crawl(url: &str, root_host: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    if !host.eq_ignore_ascii_case(root_host) {
        return false;
    }
    if parsed.query().is_some() {
        return false;
    }

    let path = parsed.path();
    let path_lower = path.to_lowercase();
    if DENYLISTED_PATHS.is_match(&path_lower) {
        return false;
    }

    if let Some(ext) = path.rsplit('.').next() {
        let ext_lower = ext.to_lowercase();
        if path.contains('.') && DENYLISTED_EXTENSIONS.contains(&ext_lower.as_str()) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash_and_case() {
        assert_eq!(
            normalize("https://Example.Com/Path/").as_deref(),
            Some("https://example.com/Path")
        );
        assert_eq!(
            normalize("https://example.com:443/").as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn rejects_offhost_and_query_and_assets() {
        assert!(should_crawl("https://example.com/docs/guide", "example.com"));
        assert!(!should_crawl("https://other.com/docs", "example.com"));
        assert!(!should_crawl("https://example.com/docs?x=1", "example.com"));
        assert!(!should_crawl("https://example.com/logo.png", "example.com"));
        assert!(!should_crawl("https://example.com/admin/users", "example.com"));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(!should_crawl("ftp://example.com/file", "example.com"));
        assert!(normalize("javascript:void(0)").is_none());
    }
}
