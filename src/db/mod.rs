//! Relational persistence layer.
//!
//! SQLite via `sqlx`, matching the connection/pool setup the rest of this
//! codebase already used for its link index: WAL journaling, a bounded
//! connection pool, and an idempotent `CREATE TABLE IF NOT EXISTS` schema run
//! on every open.

pub mod models;

use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

pub use models::*;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    domain TEXT NOT NULL,
    title TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sites_domain ON sites(domain);

CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    canonical_url TEXT,
    title TEXT,
    description TEXT,
    content_hash TEXT NOT NULL,
    metadata_hash TEXT NOT NULL,
    headings_hash TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    links_json TEXT NOT NULL DEFAULT '[]',
    etag TEXT,
    last_modified TEXT,
    http_status INTEGER NOT NULL DEFAULT 200,
    is_active INTEGER NOT NULL DEFAULT 1,
    category TEXT NOT NULL DEFAULT 'Other',
    relevance_score REAL NOT NULL DEFAULT 0.0,
    depth INTEGER NOT NULL DEFAULT 0,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    last_checked_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(site_id, url)
);
CREATE INDEX IF NOT EXISTS idx_pages_site_active ON pages(site_id, is_active);
CREATE INDEX IF NOT EXISTS idx_pages_site_checked ON pages(site_id, last_checked_at);

CREATE TABLE IF NOT EXISTS crawl_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending',
    max_pages INTEGER NOT NULL,
    pages_found INTEGER NOT NULL DEFAULT 0,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    pages_changed INTEGER NOT NULL DEFAULT 0,
    pages_added INTEGER NOT NULL DEFAULT 0,
    pages_updated INTEGER NOT NULL DEFAULT 0,
    pages_removed INTEGER NOT NULL DEFAULT 0,
    pages_unchanged INTEGER NOT NULL DEFAULT 0,
    pages_skipped INTEGER NOT NULL DEFAULT 0,
    llms_regenerated INTEGER NOT NULL DEFAULT 0,
    change_summary_json TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_crawl_jobs_site ON crawl_jobs(site_id);

CREATE TABLE IF NOT EXISTS crawl_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    crawl_job_id INTEGER NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'queued',
    priority INTEGER NOT NULL DEFAULT 100,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    available_at TEXT NOT NULL,
    leased_until TEXT,
    lease_owner TEXT,
    idempotency_key TEXT UNIQUE,
    payload_json TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_crawl_tasks_claim ON crawl_tasks(status, available_at, priority, created_at);
CREATE INDEX IF NOT EXISTS idx_crawl_tasks_lease ON crawl_tasks(lease_owner, leased_until);

CREATE TABLE IF NOT EXISTS generated_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    crawl_job_id INTEGER REFERENCES crawl_jobs(id) ON DELETE SET NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    is_edited INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_generated_files_site ON generated_files(site_id);

CREATE TABLE IF NOT EXISTS monitoring_schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL UNIQUE REFERENCES sites(id) ON DELETE CASCADE,
    cron_expression TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    next_run_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Open (or create) the SQLite database at `database_url` and run the
/// idempotent schema bootstrap.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let base: SqliteConnectOptions = database_url.parse()?;
    let options = base
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::query(SCHEMA_SQL).execute(&pool).await?;

    info!(database_url, "connected to database and verified schema");
    Ok(pool)
}

/// Insert a new `pending` crawl job for `site_id`, returning its id.
pub async fn create_crawl_job(pool: &SqlitePool, site_id: i64, max_pages: i64) -> anyhow::Result<i64> {
    use chrono::Utc;
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO crawl_jobs (site_id, status, max_pages, created_at, updated_at) VALUES (?, 'pending', ?, ?, ?)",
    )
    .bind(site_id)
    .bind(max_pages)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .expect("re-running schema must be idempotent");
    }
}
