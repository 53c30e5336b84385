//! Typed row structs for every persisted entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Site {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub site_id: i64,
    pub url: String,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_hash: String,
    pub metadata_hash: String,
    pub headings_hash: String,
    pub text_hash: String,
    pub links_json: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub http_status: i64,
    pub is_active: bool,
    pub category: String,
    pub relevance_score: f64,
    pub depth: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    #[must_use]
    pub fn links(&self) -> Vec<String> {
        serde_json::from_str(&self.links_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CrawlJobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CrawlJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown crawl job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlJob {
    pub id: i64,
    pub site_id: i64,
    pub status: String,
    pub max_pages: i64,
    pub pages_found: i64,
    pub pages_crawled: i64,
    pub pages_changed: i64,
    pub pages_added: i64,
    pub pages_updated: i64,
    pub pages_removed: i64,
    pub pages_unchanged: i64,
    pub pages_skipped: i64,
    pub llms_regenerated: bool,
    pub change_summary_json: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlTaskStatus {
    Queued,
    Running,
    Failed,
    Completed,
    DeadLetter,
}

impl CrawlTaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::DeadLetter => "dead_letter",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrawlTask {
    pub id: i64,
    pub site_id: i64,
    pub crawl_job_id: i64,
    pub status: String,
    pub priority: i64,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub available_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub idempotency_key: Option<String>,
    pub payload_json: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeneratedFile {
    pub id: i64,
    pub site_id: i64,
    pub crawl_job_id: Option<i64>,
    pub content: String,
    pub content_hash: String,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MonitoringSchedule {
    pub id: i64,
    pub site_id: i64,
    pub cron_expression: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
