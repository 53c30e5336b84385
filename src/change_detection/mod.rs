//! Page reconciliation: classify each crawled page as added/updated/removed/
//! unchanged and persist the result.
//!
//! Ported from the original crawl job's page-reconciliation loop
//! (`run_crawl_job`'s `on_page_crawled` callback and its post-crawl
//! removed-page sweep): a page reactivated from a prior soft-delete counts
//! as `added`, never `unchanged`, matching the original's `reactivated` flag.

use chrono::Utc;
use serde_json;
use sqlx::SqlitePool;
use tracing::info;

use crate::crawl_engine::crawler::{categorize_and_score, CrawledPage};
use crate::db::Page;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ChangeSummary {
    pub added: i64,
    pub updated: i64,
    pub removed: i64,
    pub unchanged: i64,
}

impl ChangeSummary {
    #[must_use]
    pub fn pages_changed(&self) -> i64 {
        self.added + self.updated + self.removed
    }
}

fn has_meaningful_change(existing: &Page, page: &CrawledPage) -> bool {
    let m = &page.metadata;
    existing.content_hash != m.content_hash
        || existing.metadata_hash != m.metadata_hash
        || existing.headings_hash != m.headings_hash
        || existing.text_hash != m.text_hash
        || existing.canonical_url.as_deref().unwrap_or("") != m.canonical_url.as_deref().unwrap_or("")
}

/// Reconcile a crawl's results against the persisted `pages` table for
/// `site_id`: upsert every crawled page, then soft-delete any previously
/// active page that was not seen this crawl. Returns the classification
/// counts used to decide whether the artifact needs regenerating.
pub async fn reconcile(
    pool: &SqlitePool,
    site_id: i64,
    pages: &[CrawledPage],
) -> anyhow::Result<ChangeSummary> {
    let existing: Vec<Page> = sqlx::query_as("SELECT * FROM pages WHERE site_id = ?")
        .bind(site_id)
        .fetch_all(pool)
        .await?;
    let mut existing_by_url: std::collections::HashMap<String, Page> =
        existing.into_iter().map(|p| (p.url.clone(), p)).collect();

    let mut summary = ChangeSummary::default();
    let mut seen_urls: std::collections::HashSet<String> = std::collections::HashSet::new();
    let now = Utc::now();

    for page in pages {
        seen_urls.insert(page.metadata.url.clone());
        let (category, relevance) = categorize_and_score(page);
        let links_json = serde_json::to_string(&page.metadata.links).unwrap_or_else(|_| "[]".to_string());

        match existing_by_url.get(&page.metadata.url) {
            None => {
                sqlx::query(
                    "INSERT INTO pages (
                        site_id, url, canonical_url, title, description, content_hash,
                        metadata_hash, headings_hash, text_hash, links_json, etag,
                        last_modified, http_status, is_active, category, relevance_score,
                        depth, first_seen_at, last_seen_at, last_checked_at, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(site_id)
                .bind(&page.metadata.url)
                .bind(&page.metadata.canonical_url)
                .bind(&page.metadata.title)
                .bind(&page.metadata.description)
                .bind(&page.metadata.content_hash)
                .bind(&page.metadata.metadata_hash)
                .bind(&page.metadata.headings_hash)
                .bind(&page.metadata.text_hash)
                .bind(&links_json)
                .bind(&page.metadata.etag)
                .bind(&page.metadata.last_modified)
                .bind(i64::from(page.metadata.http_status))
                .bind(category)
                .bind(relevance)
                .bind(i64::from(page.depth))
                .bind(now)
                .bind(now)
                .bind(now)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await?;
                summary.added += 1;
            }
            Some(existing_page) => {
                let reactivated = !existing_page.is_active;
                if reactivated {
                    summary.added += 1;
                } else if page.metadata.not_modified {
                    summary.unchanged += 1;
                } else if has_meaningful_change(existing_page, page) {
                    summary.updated += 1;
                } else {
                    summary.unchanged += 1;
                }

                let http_status = if page.metadata.not_modified { 304 } else { i64::from(page.metadata.http_status) };
                let etag = page.metadata.etag.clone().or_else(|| existing_page.etag.clone());
                let last_modified = page
                    .metadata
                    .last_modified
                    .clone()
                    .or_else(|| existing_page.last_modified.clone());

                sqlx::query(
                    "UPDATE pages SET
                        title = ?, description = ?, content_hash = ?, metadata_hash = ?,
                        headings_hash = ?, text_hash = ?, links_json = ?, canonical_url = ?,
                        http_status = ?, etag = ?, last_modified = ?, category = ?,
                        relevance_score = ?, depth = ?, is_active = 1, last_seen_at = ?,
                        last_checked_at = ?, updated_at = ?
                    WHERE site_id = ? AND url = ?",
                )
                .bind(&page.metadata.title)
                .bind(&page.metadata.description)
                .bind(&page.metadata.content_hash)
                .bind(&page.metadata.metadata_hash)
                .bind(&page.metadata.headings_hash)
                .bind(&page.metadata.text_hash)
                .bind(&links_json)
                .bind(&page.metadata.canonical_url)
                .bind(http_status)
                .bind(&etag)
                .bind(&last_modified)
                .bind(category)
                .bind(relevance)
                .bind(i64::from(page.depth))
                .bind(now)
                .bind(now)
                .bind(now)
                .bind(site_id)
                .bind(&page.metadata.url)
                .execute(pool)
                .await?;

                let mut updated_copy = existing_page.clone();
                updated_copy.is_active = true;
                existing_by_url.insert(page.metadata.url.clone(), updated_copy);
            }
        }
    }

    let removed_urls: Vec<String> = existing_by_url
        .values()
        .filter(|p| p.is_active && !seen_urls.contains(&p.url))
        .map(|p| p.url.clone())
        .collect();

    for url in &removed_urls {
        sqlx::query("UPDATE pages SET is_active = 0, last_checked_at = ?, updated_at = ? WHERE site_id = ? AND url = ?")
            .bind(now)
            .bind(now)
            .bind(site_id)
            .bind(url)
            .execute(pool)
            .await?;
    }
    summary.removed = removed_urls.len() as i64;

    info!(
        site_id,
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        unchanged = summary.unchanged,
        "page reconciliation complete"
    );

    Ok(summary)
}

/// Load all active pages for a site, ordered the way the artifact composer
/// expects: highest relevance first, shallower depth first.
pub async fn load_active_pages(pool: &SqlitePool, site_id: i64) -> anyhow::Result<Vec<Page>> {
    let pages = sqlx::query_as(
        "SELECT * FROM pages WHERE site_id = ? AND is_active = 1 ORDER BY relevance_score DESC, depth ASC",
    )
    .bind(site_id)
    .fetch_all(pool)
    .await?;
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PageMetadata;

    fn page(url: &str, content_hash: &str) -> Page {
        let now = Utc::now();
        Page {
            id: 1,
            site_id: 1,
            url: url.to_string(),
            canonical_url: None,
            title: None,
            description: None,
            content_hash: content_hash.to_string(),
            metadata_hash: content_hash.to_string(),
            headings_hash: content_hash.to_string(),
            text_hash: content_hash.to_string(),
            links_json: "[]".to_string(),
            etag: None,
            last_modified: None,
            http_status: 200,
            is_active: true,
            category: "Other".to_string(),
            relevance_score: 0.5,
            depth: 0,
            first_seen_at: now,
            last_seen_at: now,
            last_checked_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn crawled(url: &str, content_hash: &str) -> CrawledPage {
        CrawledPage {
            metadata: PageMetadata {
                url: url.to_string(),
                title: None,
                description: None,
                content_hash: content_hash.to_string(),
                metadata_hash: content_hash.to_string(),
                headings_hash: content_hash.to_string(),
                text_hash: content_hash.to_string(),
                links: Vec::new(),
                canonical_url: None,
                etag: None,
                last_modified: None,
                http_status: 200,
                not_modified: false,
            },
            depth: 0,
            in_sitemap: false,
        }
    }

    #[test]
    fn detects_meaningful_change_by_any_hash() {
        let existing = page("https://x.com/", "abc");
        let same = crawled("https://x.com/", "abc");
        let changed = crawled("https://x.com/", "def");
        assert!(!has_meaningful_change(&existing, &same));
        assert!(has_meaningful_change(&existing, &changed));
    }

    #[test]
    fn change_summary_totals_exclude_unchanged() {
        let summary = ChangeSummary { added: 2, updated: 3, removed: 1, unchanged: 10 };
        assert_eq!(summary.pages_changed(), 6);
    }
}
