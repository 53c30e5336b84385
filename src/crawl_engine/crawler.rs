//! Bounded-concurrency breadth-first crawl engine.
//!
//! Ported from the original crawler's `Crawler.crawl()`: per-level
//! concurrent fetch/extract/categorize, JS-promotion probing on shallow
//! low-link pages, a timeout circuit breaker, and a sitemap fallback when
//! the whole crawl is blocked. Levels are processed one BFS depth at a time
//! (`futures::stream::buffer_unordered` per level) rather than through a
//! single shared work queue, which keeps the max-pages cutoff and depth
//! bookkeeping trivially correct while still bounding concurrency to
//! `settings.crawl_concurrency` within each level.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::categorizer;
use crate::config::Settings;
use crate::crawl_engine::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::extractor::PageMetadata;
use crate::fetcher::{CachedPageState, FetchOutcome, Fetcher, SkipReason};
use crate::robots;
use crate::url_policy;

/// A fetched page plus its BFS depth and whether it was seeded from a
/// sitemap (used by the relevance score's sitemap bonus).
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub metadata: PageMetadata,
    pub depth: u32,
    pub in_sitemap: bool,
}

pub struct CrawlOutcome {
    pub pages: Vec<CrawledPage>,
    pub skipped: usize,
    pub blocked_count: usize,
    pub abort_reason: Option<String>,
    pub used_js_mode: bool,
}

/// Looks up cached `(etag, last_modified)` state for a URL so the fetcher can
/// issue conditional requests; implemented against the `pages` table by
/// callers that already have a prior crawl's results on hand.
pub trait CacheLookup: Send + Sync {
    fn lookup(&self, url: &str) -> CachedPageState;
}

pub struct NoCache;

impl CacheLookup for NoCache {
    fn lookup(&self, _url: &str) -> CachedPageState {
        CachedPageState::default()
    }
}

pub async fn crawl(
    root_url: &str,
    settings: &Settings,
    fetcher: &Fetcher,
    http_client: &reqwest::Client,
    cache: &dyn CacheLookup,
) -> CrawlOutcome {
    let max_pages = settings.max_crawl_pages;
    let max_depth = settings.max_crawl_depth;

    let Some(root_host) = resolve_root_host(http_client, root_url).await else {
        return CrawlOutcome {
            pages: Vec::new(),
            skipped: 0,
            blocked_count: 0,
            abort_reason: Some("could not resolve root URL".to_string()),
            used_js_mode: false,
        };
    };

    let rules = robots::load_robots(http_client, root_url).await;
    let sitemap_urls = robots::load_sitemap_urls(http_client, root_url, &rules, max_pages).await;
    let sitemap_set: HashSet<String> = sitemap_urls.iter().cloned().collect();

    let circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig {
        streak_threshold: settings.crawl_timeout_streak_threshold,
        rate_threshold: settings.crawl_timeout_rate_threshold,
        min_samples: settings.crawl_timeout_min_samples,
        stall: Duration::from_secs(settings.crawl_progress_stall_seconds),
        cooldown: Duration::from_secs(settings.crawl_circuit_cooldown_seconds),
    });

    let start = Instant::now();
    let max_duration = (settings.crawl_max_duration_seconds > 0)
        .then(|| Duration::from_secs(settings.crawl_max_duration_seconds));

    let visited: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut frontier: Vec<(String, u32)> = vec![(root_url.to_string(), 0)];
    for sitemap_url in &sitemap_urls {
        if let Some(normalized) = url_policy::normalize(sitemap_url) {
            frontier.push((normalized, 1));
        }
    }

    let mut pages: Vec<CrawledPage> = Vec::new();
    let mut skipped = 0usize;
    let mut blocked_count = 0usize;
    let mut js_mode = false;
    let mut js_probe_attempts = 0u32;
    let mut js_probe_failures = 0u32;
    let mut abort_reason = None;

    while !frontier.is_empty() && pages.len() < max_pages {
        if let Some(budget) = max_duration {
            if start.elapsed() >= budget {
                abort_reason = Some("duration_budget_exceeded".to_string());
                break;
            }
        }
        if !circuit_breaker.should_attempt() {
            abort_reason = circuit_breaker.abort_reason();
            break;
        }

        {
            let mut seen = visited.lock().await;
            frontier.retain(|(url, _)| seen.insert(url.clone()));
        }
        if frontier.is_empty() {
            break;
        }

        let budget_remaining = max_pages - pages.len();
        let level: Vec<(String, u32)> = frontier.drain(..).take(budget_remaining).collect();

        let concurrency = settings.crawl_concurrency.max(1);
        let delay = Duration::from_millis(settings.crawl_delay_ms);
        let render_mode = js_mode;
        let results: Vec<(String, u32, bool, FetchOutcome)> = stream::iter(level.into_iter())
            .map(|(url, depth)| {
                let in_sitemap = sitemap_set.contains(&url);
                let cached = cache.lookup(&url);
                async move {
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                    let outcome = fetcher.fetch(&url, &cached, render_mode).await;
                    (url, depth, in_sitemap, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut next_level: Vec<(String, u32)> = Vec::new();
        for (url, depth, in_sitemap, outcome) in results {
            match outcome {
                FetchOutcome::Fetched { metadata, blocked } => {
                    circuit_breaker.record_success();
                    if blocked {
                        blocked_count += 1;
                        if !js_mode {
                            js_mode = true;
                            info!(url, "crawl promoted to JS render mode after challenge page");
                        }
                    }

                    if !js_mode
                        && depth <= settings.crawl_js_probe_max_depth
                        && js_probe_attempts < settings.crawl_js_probe_max_attempts
                        && js_probe_failures < 2
                    {
                        let crawlable_links = count_crawlable(&metadata.links, &root_host);
                        if crawlable_links <= settings.crawl_js_probe_low_links {
                            js_probe_attempts += 1;
                            match probe_js_promotion(fetcher, &url, &root_host).await {
                                Some(rendered_links)
                                    if rendered_links >= settings.crawl_js_probe_promote_links =>
                                {
                                    js_mode = true;
                                    info!(url, rendered_links, "JS-promotion probe promoted crawl");
                                }
                                Some(_) => {}
                                None => js_probe_failures += 1,
                            }
                        }
                    }

                    for link in &metadata.links {
                        if let Some(normalized) = url_policy::normalize(link) {
                            if url_policy::should_crawl(&normalized, &root_host)
                                && rules.is_allowed(&normalized)
                            {
                                next_level.push((normalized, depth + 1));
                            }
                        }
                    }

                    pages.push(CrawledPage { metadata, depth, in_sitemap });
                }
                FetchOutcome::Skipped(reason) => {
                    skipped += 1;
                    if matches!(reason, SkipReason::Blocked403 | SkipReason::ChallengePage) {
                        blocked_count += 1;
                    }
                    if matches!(reason, SkipReason::HttpError(0)) {
                        circuit_breaker.record_timeout();
                    } else {
                        circuit_breaker.record_success();
                    }
                    warn!(url, %reason, "page skipped during crawl");
                }
            }
        }

        frontier = next_level
            .into_iter()
            .filter(|(_, depth)| *depth <= max_depth)
            .collect();
    }

    if pages.is_empty() && !sitemap_urls.is_empty() && blocked_count > 0 {
        info!("crawl fully blocked, falling back to sitemap-derived pages");
        for sitemap_url in sitemap_urls.iter().take(max_pages) {
            pages.push(CrawledPage {
                metadata: synthesize_from_sitemap(sitemap_url),
                depth: 1,
                in_sitemap: true,
            });
        }
    }

    CrawlOutcome {
        pages,
        skipped,
        blocked_count,
        abort_reason,
        used_js_mode: js_mode,
    }
}

async fn resolve_root_host(client: &reqwest::Client, root_url: &str) -> Option<String> {
    match client.head(root_url).send().await {
        Ok(resp) => url_policy::host_of(resp.url().as_str()),
        Err(_) => url_policy::host_of(root_url),
    }
}

fn count_crawlable(links: &[String], root_host: &str) -> usize {
    links.iter().filter(|link| url_policy::should_crawl(link, root_host)).count()
}

/// Re-fetch `url` in rendered mode and count its crawlable links, without
/// mutating crawl-wide state. Returns `None` on a render failure.
async fn probe_js_promotion(fetcher: &Fetcher, url: &str, root_host: &str) -> Option<usize> {
    match fetcher.fetch(url, &CachedPageState::default(), true).await {
        FetchOutcome::Fetched { metadata, .. } => Some(count_crawlable(&metadata.links, root_host)),
        FetchOutcome::Skipped(_) => None,
    }
}

fn synthesize_from_sitemap(url: &str) -> PageMetadata {
    let title = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    PageMetadata {
        url: url.to_string(),
        title,
        description: None,
        content_hash: String::new(),
        metadata_hash: String::new(),
        headings_hash: String::new(),
        text_hash: String::new(),
        links: Vec::new(),
        canonical_url: None,
        etag: None,
        last_modified: None,
        http_status: 0,
        not_modified: false,
    }
}

/// Assign category and relevance for a crawled page, combining the
/// categorizer module with the page's depth and sitemap membership.
#[must_use]
pub fn categorize_and_score(page: &CrawledPage) -> (&'static str, f64) {
    let category = categorizer::categorize_page(&page.metadata.url, page.depth);
    let relevance =
        categorizer::compute_relevance(&page.metadata.url, page.depth, category, page.in_sitemap);
    (category, relevance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cache_returns_empty_state() {
        let cache = NoCache;
        let state = cache.lookup("https://example.com/");
        assert!(state.etag.is_none());
        assert!(state.last_modified.is_none());
    }

    #[test]
    fn categorize_and_score_uses_depth_and_sitemap_membership() {
        let page = CrawledPage {
            metadata: PageMetadata {
                url: "https://example.com/docs/guide".to_string(),
                title: None,
                description: None,
                content_hash: String::new(),
                metadata_hash: String::new(),
                headings_hash: String::new(),
                text_hash: String::new(),
                links: Vec::new(),
                canonical_url: None,
                etag: None,
                last_modified: None,
                http_status: 200,
                not_modified: false,
            },
            depth: 1,
            in_sitemap: true,
        };
        let (category, relevance) = categorize_and_score(&page);
        assert_eq!(category, "Documentation");
        assert!(relevance > 0.0);
    }
}
