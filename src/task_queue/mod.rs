//! Durable, leased crawl task queue.
//!
//! Ported from the original `task_queue.py`: the same ready-status set,
//! lease/heartbeat/complete/fail/recover lifecycle, idempotency-key
//! deduplication, and jittered exponential backoff are unchanged in
//! meaning. `claim_next` replaces Postgres `SELECT ... FOR UPDATE SKIP
//! LOCKED` with a single atomic `UPDATE ... WHERE id = (SELECT ...) RETURNING
//! *`, relying on SQLite's serialized single-writer model to give the same
//! "exactly one claimant" guarantee without row locks (see `DESIGN.md`).

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::CrawlTask;

pub const LEASE_EXPIRY_ERROR: &str = "Lease expired before worker heartbeat";

#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    Retrying { retry_in_seconds: i64 },
    DeadLettered,
    Missing,
}

/// Jittered exponential backoff: `15 * 2^(attempt-1) * (1 + U[0, 0.2])`.
fn compute_retry_delay_seconds(attempt_count: i64) -> i64 {
    let exponent = (attempt_count - 1).max(0);
    let base = 15.0 * 2f64.powi(exponent as i32);
    let jitter = rand::rng().random_range(0.0..0.2);
    (base * (1.0 + jitter)) as i64
}

/// Enqueue a crawl task, returning the existing task unchanged if
/// `idempotency_key` already has one (at-most-once enqueue per key).
pub async fn enqueue(
    pool: &SqlitePool,
    site_id: i64,
    crawl_job_id: i64,
    priority: i64,
    idempotency_key: Option<&str>,
    payload_json: Option<&str>,
    max_attempts: i64,
) -> anyhow::Result<CrawlTask> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = sqlx::query_as::<_, CrawlTask>(
            "SELECT * FROM crawl_tasks WHERE idempotency_key = ?",
        )
        .bind(key)
        .fetch_optional(pool)
        .await?
        {
            info!(idempotency_key = key, task_id = existing.id, "reusing existing crawl task");
            return Ok(existing);
        }
    }

    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO crawl_tasks (
            site_id, crawl_job_id, status, priority, attempt_count, max_attempts,
            available_at, idempotency_key, payload_json, created_at, updated_at
        ) VALUES (?, ?, 'queued', ?, 0, ?, ?, ?, ?, ?, ?)",
    )
    .bind(site_id)
    .bind(crawl_job_id)
    .bind(priority)
    .bind(max_attempts)
    .bind(now)
    .bind(idempotency_key)
    .bind(payload_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    let task = sqlx::query_as::<_, CrawlTask>("SELECT * FROM crawl_tasks WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    info!(task_id = task.id, crawl_job_id, site_id, "enqueued crawl task");
    Ok(task)
}

/// Atomically claim the oldest, highest-priority ready task and lease it to
/// `worker_id`. "Ready" means `queued` or `failed` with `available_at` due
/// and no live lease.
pub async fn claim_next(
    pool: &SqlitePool,
    worker_id: &str,
    lease_seconds: i64,
) -> anyhow::Result<Option<CrawlTask>> {
    let now = Utc::now();
    let leased_until = now + ChronoDuration::seconds(lease_seconds);

    let result = sqlx::query(
        "UPDATE crawl_tasks SET
            status = 'running',
            attempt_count = attempt_count + 1,
            lease_owner = ?,
            leased_until = ?,
            updated_at = ?
        WHERE id = (
            SELECT id FROM crawl_tasks
            WHERE status IN ('queued', 'failed')
              AND available_at <= ?
              AND (leased_until IS NULL OR leased_until < ?)
            ORDER BY priority ASC, created_at ASC
            LIMIT 1
        )",
    )
    .bind(worker_id)
    .bind(leased_until)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let task = sqlx::query_as::<_, CrawlTask>(
        "SELECT * FROM crawl_tasks WHERE lease_owner = ? AND status = 'running' ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(worker_id)
    .fetch_one(pool)
    .await?;

    info!(task_id = task.id, worker_id, attempt = task.attempt_count, "claimed crawl task");
    Ok(Some(task))
}

/// Extend a running task's lease. Returns `false` if the task is no longer
/// owned by `worker_id` or is no longer running.
pub async fn heartbeat(
    pool: &SqlitePool,
    task_id: i64,
    worker_id: &str,
    lease_seconds: i64,
) -> anyhow::Result<bool> {
    let leased_until = Utc::now() + ChronoDuration::seconds(lease_seconds);
    let result = sqlx::query(
        "UPDATE crawl_tasks SET leased_until = ?, updated_at = ?
         WHERE id = ? AND lease_owner = ? AND status = 'running'",
    )
    .bind(leased_until)
    .bind(Utc::now())
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn complete(pool: &SqlitePool, task_id: i64, worker_id: &str) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE crawl_tasks SET status = 'completed', leased_until = NULL, lease_owner = NULL, updated_at = ?
         WHERE id = ? AND lease_owner = ? AND status = 'running'",
    )
    .bind(Utc::now())
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a task failure. Dead-letters once `attempt_count >= max_attempts`,
/// otherwise reschedules with jittered exponential backoff.
pub async fn fail(
    pool: &SqlitePool,
    task_id: i64,
    worker_id: &str,
    error_message: &str,
) -> anyhow::Result<FailOutcome> {
    let Some(task) = sqlx::query_as::<_, CrawlTask>(
        "SELECT * FROM crawl_tasks WHERE id = ? AND lease_owner = ? AND status = 'running'",
    )
    .bind(task_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(FailOutcome::Missing);
    };

    let truncated: String = error_message.chars().take(2048).collect();
    let now = Utc::now();

    if task.attempt_count >= task.max_attempts {
        sqlx::query(
            "UPDATE crawl_tasks SET status = 'dead_letter', last_error = ?, leased_until = NULL,
                lease_owner = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(&truncated)
        .bind(now)
        .bind(task_id)
        .execute(pool)
        .await?;
        return Ok(FailOutcome::DeadLettered);
    }

    let retry_in = compute_retry_delay_seconds(task.attempt_count);
    let available_at = now + ChronoDuration::seconds(retry_in);
    sqlx::query(
        "UPDATE crawl_tasks SET status = 'failed', last_error = ?, available_at = ?,
            leased_until = NULL, lease_owner = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(&truncated)
    .bind(available_at)
    .bind(now)
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(FailOutcome::Retrying { retry_in_seconds: retry_in })
}

/// Reclaim tasks whose lease expired without a heartbeat, returning them to
/// `failed` (immediately available) so they get re-claimed.
pub async fn recover_expired(pool: &SqlitePool) -> anyhow::Result<u64> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE crawl_tasks SET
            status = 'failed',
            available_at = ?,
            lease_owner = NULL,
            leased_until = NULL,
            last_error = COALESCE(last_error, ?),
            updated_at = ?
        WHERE status = 'running' AND leased_until IS NOT NULL AND leased_until < ?",
    )
    .bind(now)
    .bind(LEASE_EXPIRY_ERROR)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let recovered = result.rows_affected();
    if recovered > 0 {
        info!(recovered, "recovered expired task leases");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_jitter_bounds() {
        let d1 = compute_retry_delay_seconds(1);
        let d2 = compute_retry_delay_seconds(2);
        assert!((15..=18).contains(&d1));
        assert!((30..=36).contains(&d2));
    }

    #[test]
    fn backoff_never_negative_for_zero_attempts() {
        assert!(compute_retry_delay_seconds(0) >= 15);
    }

    #[tokio::test]
    async fn claim_lease_heartbeat_complete_round_trip() {
        let pool = crate::db::connect("sqlite::memory:").await.expect("connect");
        sqlx::query("INSERT INTO sites (url, domain, created_at, updated_at) VALUES ('https://x.com', 'x.com', ?, ?)")
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO crawl_jobs (site_id, status, max_pages, created_at, updated_at) VALUES (1, 'pending', 200, ?, ?)")
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();

        let task = enqueue(&pool, 1, 1, 100, Some("site:1:manual"), None, 5).await.unwrap();
        assert_eq!(task.attempt_count, 0);

        let claimed = claim_next(&pool, "worker-a", 60).await.unwrap().expect("should claim");
        assert_eq!(claimed.attempt_count, 1);
        assert_eq!(claimed.lease_owner.as_deref(), Some("worker-a"));

        assert!(claim_next(&pool, "worker-b", 60).await.unwrap().is_none());

        assert!(heartbeat(&pool, claimed.id, "worker-a", 60).await.unwrap());
        assert!(complete(&pool, claimed.id, "worker-a").await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_key() {
        let pool = crate::db::connect("sqlite::memory:").await.expect("connect");
        sqlx::query("INSERT INTO sites (url, domain, created_at, updated_at) VALUES ('https://x.com', 'x.com', ?, ?)")
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO crawl_jobs (site_id, status, max_pages, created_at, updated_at) VALUES (1, 'pending', 200, ?, ?)")
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();

        let a = enqueue(&pool, 1, 1, 100, Some("dup"), None, 5).await.unwrap();
        let b = enqueue(&pool, 1, 1, 100, Some("dup"), None, 5).await.unwrap();
        assert_eq!(a.id, b.id);
    }
}
