//! Two-tier HTTP fetcher: static GET by default, headless-browser render as
//! a fallback for bot-protected or JS-heavy pages.
//!
//! Ported from the original crawler's `_fetch_static`/`_fetch_rendered`/
//! `_looks_like_challenge` trio.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::RegexSet;
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::browser_pool::BrowserPool;
use crate::extractor::{self, PageMetadata};

const CHALLENGE_SCAN_BYTES: usize = 5_000;
const RENDER_WAIT_MAX_MS: u64 = 5_000;
const RENDER_LOAD_TIMEOUT_SECS: u64 = 30;
const MIN_RENDERED_LINKS: usize = 4;
const MIN_RENDERED_TEXT_CHARS: usize = 500;

static CHALLENGE_MARKERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)just a moment",
        r"(?i)checking your browser",
        r"(?i)cf-browser-verification",
        r"(?i)ddos protection by",
        r"(?i)please enable cookies",
        r"(?i)verify you are human",
        r"(?i)captcha",
        r"(?i)access denied",
    ])
    .expect("challenge marker patterns must compile")
});

#[derive(Debug, Clone)]
pub enum SkipReason {
    NotModifiedWithoutCache,
    Blocked403,
    HttpError(u16),
    NonHtml,
    ChallengePage,
    Unparseable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotModifiedWithoutCache => write!(f, "HTTP 304 without cached page state"),
            Self::Blocked403 => write!(f, "HTTP 403"),
            Self::HttpError(code) => write!(f, "HTTP {code}"),
            Self::NonHtml => write!(f, "non-HTML content type"),
            Self::ChallengePage => write!(f, "Bot protection (challenge page)"),
            Self::Unparseable => write!(f, "empty or unparseable HTML"),
        }
    }
}

pub enum FetchOutcome {
    Fetched { metadata: PageMetadata, blocked: bool },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default)]
pub struct CachedPageState {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

pub struct Fetcher {
    client: Client,
    browser_pool: Option<Arc<BrowserPool>>,
    connection_permits: Arc<Semaphore>,
}

impl Fetcher {
    /// `max_connections` bounds concurrent in-flight static requests the
    /// way the original's `httpx.Limits(max_connections=...)` bounded its
    /// connection pool; reqwest itself only exposes a per-host idle-pool
    /// size, not a total-connection cap, so it's enforced here instead.
    #[must_use]
    pub fn new(client: Client, browser_pool: Option<Arc<BrowserPool>>, max_connections: usize) -> Self {
        Self { client, browser_pool, connection_permits: Arc::new(Semaphore::new(max_connections.max(1))) }
    }

    /// Build a `reqwest::Client` with browser-like headers and the crawl's
    /// configured concurrency/timeout bounds.
    ///
    /// Headers mirror a real browser navigation request closely enough to
    /// avoid WAF/bot-detection blocks: no explicit `Accept-Encoding` is set,
    /// so reqwest negotiates compression itself.
    #[must_use]
    pub fn build_client(concurrency: usize, timeout: Duration) -> Client {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".parse().unwrap(),
        );
        headers.insert(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9".parse().unwrap());
        headers.insert(reqwest::header::CACHE_CONTROL, "no-cache".parse().unwrap());
        headers.insert("Sec-Fetch-Dest", "document".parse().unwrap());
        headers.insert("Sec-Fetch-Mode", "navigate".parse().unwrap());
        headers.insert("Sec-Fetch-Site", "none".parse().unwrap());
        headers.insert("Sec-Fetch-User", "?1".parse().unwrap());
        headers.insert(reqwest::header::UPGRADE_INSECURE_REQUESTS, "1".parse().unwrap());

        Client::builder()
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/124.0.0.0 Safari/537.36",
            )
            .default_headers(headers)
            .timeout(timeout)
            .pool_max_idle_per_host(concurrency)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    /// Fetch `url`, trying the static tier first and falling back to the
    /// rendered tier on a detected challenge page.
    pub async fn fetch(&self, url: &str, cached: &CachedPageState, force_render: bool) -> FetchOutcome {
        if force_render {
            return self.fetch_rendered_tier(url).await;
        }
        match self.fetch_static(url, cached).await {
            FetchOutcome::Skipped(SkipReason::ChallengePage) => {
                debug!(url, "static fetch hit a challenge page, attempting render");
                self.fetch_rendered_tier(url).await
            }
            other => other,
        }
    }

    async fn fetch_static(&self, url: &str, cached: &CachedPageState) -> FetchOutcome {
        let _permit = self.connection_permits.acquire().await;

        let mut request = self.client.get(url);
        if let Some(etag) = &cached.etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &cached.last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "static fetch failed");
                return FetchOutcome::Skipped(SkipReason::HttpError(0));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            if cached.etag.is_none() && cached.last_modified.is_none() {
                return FetchOutcome::Skipped(SkipReason::NotModifiedWithoutCache);
            }
            let mut metadata = extractor::extract_metadata(url, "", None, None, 304);
            metadata.not_modified = true;
            return FetchOutcome::Fetched { metadata, blocked: false };
        }
        if status == StatusCode::FORBIDDEN {
            return FetchOutcome::Skipped(SkipReason::Blocked403);
        }
        if !status.is_success() {
            return FetchOutcome::Skipped(SkipReason::HttpError(status.as_u16()));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        if !is_html {
            return FetchOutcome::Skipped(SkipReason::NonHtml);
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let html = match response.text().await {
            Ok(text) => text,
            Err(_) => return FetchOutcome::Skipped(SkipReason::Unparseable),
        };
        if html.trim().is_empty() {
            return FetchOutcome::Skipped(SkipReason::Unparseable);
        }

        if looks_like_challenge(&html) {
            return FetchOutcome::Skipped(SkipReason::ChallengePage);
        }

        let metadata = extractor::extract_metadata(url, &html, etag, last_modified, status.as_u16());
        FetchOutcome::Fetched { metadata, blocked: false }
    }

    async fn fetch_rendered_tier(&self, url: &str) -> FetchOutcome {
        match self.render(url).await {
            Ok(Some(html)) if !html.trim().is_empty() => {
                let metadata = extractor::extract_metadata(url, &html, None, None, 200);
                FetchOutcome::Fetched { metadata, blocked: true }
            }
            _ => FetchOutcome::Skipped(SkipReason::ChallengePage),
        }
    }

    /// Render `url` in a pooled headless browser, waiting briefly for either
    /// enough anchors or enough body text before returning the HTML.
    async fn render(&self, url: &str) -> anyhow::Result<Option<String>> {
        let Some(pool) = &self.browser_pool else {
            return Ok(None);
        };
        let guard = pool.acquire().await?;
        let browser = guard.browser_arc();
        let page = tokio::time::timeout(
            Duration::from_secs(RENDER_LOAD_TIMEOUT_SECS),
            browser.new_page(url),
        )
        .await??;

        let deadline = tokio::time::Instant::now() + Duration::from_millis(RENDER_WAIT_MAX_MS);
        loop {
            let html = page.content().await.unwrap_or_default();
            if rendered_is_ready(&html) || tokio::time::Instant::now() >= deadline {
                return Ok(Some(html));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn rendered_is_ready(html: &str) -> bool {
    let anchor_count = html.matches("<a ").count() + html.matches("<a>").count();
    anchor_count >= MIN_RENDERED_LINKS || html.len() >= MIN_RENDERED_TEXT_CHARS
}

/// Scan the first [`CHALLENGE_SCAN_BYTES`] bytes of HTML for known
/// bot-protection challenge-page markers.
#[must_use]
pub fn looks_like_challenge(html: &str) -> bool {
    let prefix_end = html
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= CHALLENGE_SCAN_BYTES)
        .last()
        .unwrap_or(0);
    CHALLENGE_MARKERS.is_match(&html[..prefix_end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_challenge_markers() {
        assert!(looks_like_challenge("<html>Just a moment... please wait</html>"));
        assert!(looks_like_challenge("<title>Checking your browser before accessing</title>"));
        assert!(!looks_like_challenge("<html><body><h1>Welcome</h1></body></html>"));
    }

    #[test]
    fn skip_reason_messages_are_human_readable() {
        assert_eq!(
            SkipReason::NotModifiedWithoutCache.to_string(),
            "HTTP 304 without cached page state"
        );
        assert_eq!(SkipReason::HttpError(500).to_string(), "HTTP 500");
        assert_eq!(
            SkipReason::ChallengePage.to_string(),
            "Bot protection (challenge page)"
        );
    }

    #[test]
    fn rendered_ready_detects_enough_links_or_text() {
        let many_links = "<a href=1></a>".repeat(5);
        assert!(rendered_is_ready(&many_links));
        assert!(rendered_is_ready(&"x".repeat(600)));
        assert!(!rendered_is_ready("<html></html>"));
    }
}
