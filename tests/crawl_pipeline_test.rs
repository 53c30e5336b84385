//! End-to-end test of the persistence pipeline: reconcile a crawl's pages,
//! compose the `llms.txt` artifact from what's active, and drive a crawl
//! task through the queue's claim/complete lifecycle.

use llmstxt_crawler::artifact::{ArtifactComposer, FallbackComposer};
use llmstxt_crawler::change_detection::reconcile;
use llmstxt_crawler::crawl_engine::{categorize_and_score, CrawledPage};
use llmstxt_crawler::db::{self, Site};
use llmstxt_crawler::extractor::PageMetadata;
use llmstxt_crawler::task_queue;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn page(url: &str, title: &str, depth: u32, in_sitemap: bool, text: &str) -> CrawledPage {
    let metadata_hash = sha256_hex(title);
    let headings_hash = sha256_hex("");
    let text_hash = sha256_hex(text);
    let content_hash = sha256_hex(&format!("{metadata_hash}{headings_hash}{text_hash}"));
    CrawledPage {
        metadata: PageMetadata {
            url: url.to_string(),
            title: Some(title.to_string()),
            description: None,
            content_hash,
            metadata_hash,
            headings_hash,
            text_hash,
            links: Vec::new(),
            canonical_url: Some(url.to_string()),
            etag: None,
            last_modified: None,
            http_status: 200,
            not_modified: false,
        },
        depth,
        in_sitemap,
    }
}

async fn setup() -> (SqlitePool, i64) {
    let pool = db::connect("sqlite::memory:").await.expect("connect");
    let site: Site = sqlx::query_as(
        "INSERT INTO sites (url, domain, title, created_at, updated_at) VALUES (?, ?, ?, datetime('now'), datetime('now')) RETURNING *",
    )
    .bind("https://docs.example.com")
    .bind("docs.example.com")
    .bind("Example Docs")
    .fetch_one(&pool)
    .await
    .expect("insert site");
    (pool, site.id)
}

#[tokio::test]
async fn reconcile_then_compose_reflects_only_active_pages() {
    let (pool, site_id) = setup().await;

    let first_crawl = vec![
        page("https://docs.example.com/getting-started", "Getting Started", 0, true, "install and go"),
        page("https://docs.example.com/api/widgets", "Widgets API", 1, false, "widget reference"),
    ];
    let summary = reconcile(&pool, site_id, &first_crawl).await.expect("reconcile");
    assert_eq!(summary.added, 2);
    assert_eq!(summary.pages_changed(), 2);

    // Second crawl drops the widgets page and leaves getting-started unchanged.
    let second_crawl = vec![first_crawl[0].clone()];
    let summary = reconcile(&pool, site_id, &second_crawl).await.expect("reconcile");
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.added, 0);

    let active = llmstxt_crawler::change_detection::load_active_pages(&pool, site_id)
        .await
        .expect("load active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].url, "https://docs.example.com/getting-started");

    let site: Site = sqlx::query_as("SELECT * FROM sites WHERE id = ?")
        .bind(site_id)
        .fetch_one(&pool)
        .await
        .expect("load site");
    let artifact = FallbackComposer.compose(&site, &active);
    assert!(artifact.content.contains("Getting Started"));
    assert!(!artifact.content.contains("Widgets API"));
}

#[tokio::test]
async fn queued_task_survives_claim_complete_round_trip() {
    let (pool, site_id) = setup().await;
    let job_id = db::create_crawl_job(&pool, site_id, 50).await.expect("create job");

    let task = task_queue::enqueue(&pool, site_id, job_id, 100, None, None, 5)
        .await
        .expect("enqueue");
    assert_eq!(task.status, "queued");

    let claimed = task_queue::claim_next(&pool, "worker-test", 60)
        .await
        .expect("claim")
        .expect("a task should be claimable");
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.attempt_count, 1);

    let completed = task_queue::complete(&pool, claimed.id, "worker-test")
        .await
        .expect("complete");
    assert!(completed);

    assert!(task_queue::claim_next(&pool, "worker-test", 60).await.expect("claim again").is_none());
}

#[test]
fn categorize_and_score_matches_reconciled_category_expectations() {
    let p = page("https://docs.example.com/getting-started", "Getting Started", 0, true, "install and go");
    let (category, relevance) = categorize_and_score(&p);
    assert_eq!(category, "Getting Started");
    assert!(relevance > 0.0);
}
