//! Worker loop: claim tasks, run crawl jobs, heartbeat leases, and report
//! outcomes back to the task queue.
//!
//! Ported from the original `worker.py`: `process_task`'s heartbeat
//! coroutine racing the crawl job, and `worker_loop`'s claim-up-to-capacity
//! polling loop with periodic expired-lease recovery and scheduler sync.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactComposer, FallbackComposer};
use crate::change_detection;
use crate::config::Settings;
use crate::crawl_engine::crawler::{self, NoCache};
use crate::db::{CrawlTask, Site};
use crate::events::{CrawlLifecycleEvent, EventBus};
use crate::fetcher::Fetcher;
use crate::scheduler;
use crate::task_queue::{self, FailOutcome};

/// Execute a full crawl -> reconcile -> regenerate pipeline for one crawl
/// job. Returns `Ok(true)` on success, `Ok(false)` if the site or job no
/// longer exists, `Err` on any failure (caller fails the task with the
/// error's message).
pub async fn run_crawl_job(
    pool: &SqlitePool,
    fetcher: &Fetcher,
    http_client: &reqwest::Client,
    settings: &Settings,
    site_id: i64,
    crawl_job_id: i64,
    max_depth_override: Option<u32>,
    max_pages_override: Option<usize>,
) -> anyhow::Result<bool> {
    let Some(site) = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = ?")
        .bind(site_id)
        .fetch_optional(pool)
        .await?
    else {
        error!(site_id, "site not found for crawl job");
        return Ok(false);
    };

    let now = Utc::now();
    sqlx::query("UPDATE crawl_jobs SET status = 'running', updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(crawl_job_id)
        .execute(pool)
        .await?;

    let mut effective = settings.clone();
    if let Some(depth) = max_depth_override {
        effective.max_crawl_depth = depth;
    }
    if let Some(pages) = max_pages_override {
        effective.max_crawl_pages = pages;
    }

    let outcome = crawler::crawl(&site.url, &effective, fetcher, http_client, &NoCache).await;
    if let Some(reason) = &outcome.abort_reason {
        warn!(site_id, reason, "crawl ended early");
    }

    let summary = change_detection::reconcile(pool, site_id, &outcome.pages).await?;

    if let Some(root) = outcome.pages.iter().find(|p| p.depth == 0) {
        if root.metadata.title.is_some() || root.metadata.description.is_some() {
            sqlx::query("UPDATE sites SET title = COALESCE(?, title), description = COALESCE(?, description), updated_at = ? WHERE id = ?")
                .bind(&root.metadata.title)
                .bind(&root.metadata.description)
                .bind(Utc::now())
                .bind(site_id)
                .execute(pool)
                .await?;
        }
    }

    let pages_changed = summary.pages_changed();
    let change_summary_json = serde_json::to_string(&summary).ok();

    let has_existing_artifact: Option<i64> =
        sqlx::query_scalar("SELECT id FROM generated_files WHERE site_id = ? ORDER BY created_at DESC LIMIT 1")
            .bind(site_id)
            .fetch_optional(pool)
            .await?;
    let should_regenerate = pages_changed > 0 || has_existing_artifact.is_none();

    if should_regenerate {
        let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = ?")
            .bind(site_id)
            .fetch_one(pool)
            .await?;
        let active_pages = change_detection::load_active_pages(pool, site_id).await?;
        let composed = FallbackComposer.compose(&site, &active_pages);

        let write_now = Utc::now();
        sqlx::query(
            "INSERT INTO generated_files (site_id, crawl_job_id, content, content_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(site_id)
        .bind(crawl_job_id)
        .bind(&composed.content)
        .bind(&composed.content_hash)
        .bind(write_now)
        .bind(write_now)
        .execute(pool)
        .await?;
        info!(site_id, content_hash = %composed.content_hash, "regenerated llms.txt artifact");
    } else {
        info!(site_id, "no meaningful changes; skipped artifact regeneration");
    }

    let finish_now = Utc::now();
    sqlx::query(
        "UPDATE crawl_jobs SET
            status = 'completed', error_message = NULL,
            pages_found = ?, pages_crawled = ?, pages_changed = ?,
            pages_added = ?, pages_updated = ?, pages_removed = ?, pages_unchanged = ?,
            pages_skipped = ?, llms_regenerated = ?, change_summary_json = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(outcome.pages.len() as i64)
    .bind(outcome.pages.len() as i64)
    .bind(pages_changed)
    .bind(summary.added)
    .bind(summary.updated)
    .bind(summary.removed)
    .bind(summary.unchanged)
    .bind(outcome.skipped as i64)
    .bind(should_regenerate)
    .bind(change_summary_json)
    .bind(finish_now)
    .bind(crawl_job_id)
    .execute(pool)
    .await?;

    info!(
        site_id,
        pages = outcome.pages.len(),
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        unchanged = summary.unchanged,
        regenerated = should_regenerate,
        "crawl job completed"
    );
    Ok(true)
}

async fn mark_job_retrying(pool: &SqlitePool, crawl_job_id: i64, attempt: i64, max_attempts: i64, error: &str) {
    let truncated = crate::utils::safe_truncate_chars(error, 200);
    let message = format!("Retrying (attempt {attempt}/{max_attempts}): {truncated}");
    let _ = sqlx::query("UPDATE crawl_jobs SET status = 'pending', error_message = ?, updated_at = ? WHERE id = ?")
        .bind(message)
        .bind(Utc::now())
        .bind(crawl_job_id)
        .execute(pool)
        .await;
}

/// Run one claimed task to completion: crawl, then report success/failure
/// back to the task queue. A background heartbeat renews the lease every
/// `settings.task_heartbeat_interval_seconds` until this returns.
pub async fn process_task(
    pool: SqlitePool,
    fetcher: Arc<Fetcher>,
    http_client: reqwest::Client,
    settings: Arc<Settings>,
    events: Arc<EventBus>,
    task_id: i64,
    worker_id: String,
) {
    let done = Arc::new(Notify::new());
    let heartbeat_handle = {
        let pool = pool.clone();
        let worker_id = worker_id.clone();
        let done = done.clone();
        let interval = settings.heartbeat_interval();
        let lease_seconds = settings.task_lease_seconds as i64;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = done.notified() => break,
                    _ = tokio::time::sleep(interval) => {
                        match task_queue::heartbeat(&pool, task_id, &worker_id, lease_seconds).await {
                            Ok(true) => info!(task_id, "heartbeat renewed"),
                            Ok(false) => {
                                warn!(task_id, worker_id, "heartbeat stopped: lease no longer ours");
                                break;
                            }
                            Err(e) => {
                                warn!(task_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            }
        })
    };

    let task: Option<CrawlTask> = sqlx::query_as("SELECT * FROM crawl_tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(&pool)
        .await
        .unwrap_or(None);

    let Some(task) = task else {
        done.notify_one();
        let _ = heartbeat_handle.await;
        return;
    };

    let payload: Option<Value> = task.payload_json.as_deref().and_then(|s| serde_json::from_str(s).ok());
    let max_depth = payload.as_ref().and_then(|v| v.get("max_depth")).and_then(Value::as_u64).map(|d| d as u32);
    let max_pages = payload.as_ref().and_then(|v| v.get("max_pages")).and_then(Value::as_u64).map(|p| p as usize);

    info!(task_id, crawl_job_id = task.crawl_job_id, site_id = task.site_id, attempt = task.attempt_count, "running crawl task");

    let result = run_crawl_job(
        &pool,
        &fetcher,
        &http_client,
        &settings,
        task.site_id,
        task.crawl_job_id,
        max_depth,
        max_pages,
    )
    .await;

    done.notify_one();
    let _ = heartbeat_handle.await;

    let (success, failure_error) = match result {
        Ok(true) => (true, String::new()),
        Ok(false) => (false, "site or crawl job not found".to_string()),
        Err(e) => (false, e.to_string()),
    };

    if success {
        let completed = task_queue::complete(&pool, task_id, &worker_id).await.unwrap_or(false);
        if completed {
            info!(task_id, worker_id, "task completed");
            let _ = events.publish(CrawlLifecycleEvent::TaskCompleted {
                task_id,
                site_id: task.site_id,
                pages_crawled: 0,
                timestamp: Utc::now(),
            });
        } else {
            warn!(task_id, worker_id, "task completion skipped: lease no longer ours");
        }
        return;
    }

    match task_queue::fail(&pool, task_id, &worker_id, &failure_error).await {
        Ok(FailOutcome::Retrying { retry_in_seconds }) => {
            mark_job_retrying(&pool, task.crawl_job_id, task.attempt_count + 1, task.max_attempts, &failure_error).await;
            warn!(task_id, retry_in_seconds, "retry scheduled");
            let _ = events.publish(CrawlLifecycleEvent::TaskFailed {
                task_id,
                site_id: task.site_id,
                error: failure_error,
                retry_in_seconds: Some(retry_in_seconds),
                timestamp: Utc::now(),
            });
        }
        Ok(FailOutcome::DeadLettered) => {
            error!(task_id, "task moved to dead letter");
            let _ = events.publish(CrawlLifecycleEvent::TaskDeadLettered {
                task_id,
                site_id: task.site_id,
                timestamp: Utc::now(),
            });
        }
        Ok(FailOutcome::Missing) => {
            error!(task_id, "task failed but lease was no longer ours");
        }
        Err(e) => error!(task_id, error = %e, "failed to record task failure"),
    }
}

/// Poll for ready tasks, dispatch up to `worker_max_concurrent_tasks`
/// concurrently, recover expired leases, and optionally sync cron
/// schedules, until `stop` is signalled.
pub async fn worker_loop(
    pool: SqlitePool,
    fetcher: Arc<Fetcher>,
    http_client: reqwest::Client,
    settings: Arc<Settings>,
    events: Arc<EventBus>,
    mut stop: watch::Receiver<bool>,
) {
    info!(worker_id = %settings.worker_id, max_concurrent = settings.worker_max_concurrent_tasks, "worker started");

    let mut active: JoinSet<()> = JoinSet::new();
    let mut next_scheduler_sync = tokio::time::Instant::now();
    let poll_interval = settings.poll_interval();
    let scheduler_interval = Duration::from_secs(settings.scheduler_sync_interval_seconds);

    while !*stop.borrow() {
        while let Some(result) = active.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "task handler panicked");
            }
        }

        if settings.run_scheduler && tokio::time::Instant::now() >= next_scheduler_sync {
            match scheduler::sync_schedules_from_db(&pool, &settings).await {
                Ok(fired) if fired > 0 => info!(fired, "cron schedules fired"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduler sync failed"),
            }
            next_scheduler_sync = tokio::time::Instant::now() + scheduler_interval;
        }

        match task_queue::recover_expired(&pool).await {
            Ok(n) if n > 0 => warn!(recovered = n, "recovered expired task leases"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to recover expired leases"),
        }

        while active.len() < settings.worker_max_concurrent_tasks {
            match task_queue::claim_next(&pool, &settings.worker_id, settings.task_lease_seconds as i64).await {
                Ok(Some(task)) => {
                    info!(task_id = task.id, active = active.len() + 1, max = settings.worker_max_concurrent_tasks, "dispatching task");
                    let _ = events.publish(CrawlLifecycleEvent::TaskClaimed {
                        task_id: task.id,
                        site_id: task.site_id,
                        worker_id: settings.worker_id.clone(),
                        timestamp: Utc::now(),
                    });
                    let pool = pool.clone();
                    let fetcher = fetcher.clone();
                    let http_client = http_client.clone();
                    let settings = settings.clone();
                    let events = events.clone();
                    let worker_id = settings.worker_id.clone();
                    active.spawn(async move {
                        process_task(pool, fetcher, http_client, settings, events, task.id, worker_id).await;
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to claim task");
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = stop.changed() => {}
        }
    }

    while let Some(result) = active.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "task handler panicked during shutdown drain");
        }
    }
    info!("worker shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_crawl_job_returns_false_for_missing_site() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let settings = Settings::default();
        let client = Fetcher::build_client(1, Duration::from_secs(5));
        let fetcher = Fetcher::new(client.clone(), None, 6);
        let result = run_crawl_job(&pool, &fetcher, &client, &settings, 999, 1, None, None).await.unwrap();
        assert!(!result);
    }
}
