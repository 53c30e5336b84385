//! Cron-driven monitoring schedule bridge.
//!
//! Ported from the original `scheduler.py`/`worker.py` pair: periodically
//! reload active `monitoring_schedules` rows and, for any schedule whose
//! cron trigger is due, enqueue a crawl task. Rather than an in-process
//! scheduler daemon (the original's APScheduler `AsyncIOScheduler`), this
//! bridge is driven by the worker loop's own poll tick and de-duplicates
//! fires through the task queue's idempotency key
//! (`site:{id}:cron:{minute_iso_utc}`), so a schedule can never double-fire
//! even if two worker processes poll at the same moment.
//!
//! `cron_expression` is stored as a standard 5-field crontab string (the
//! same format the original's `CronTrigger.from_crontab` accepted); the
//! `cron` crate requires a leading seconds field, so it is parsed with `"0 "`
//! prepended.

use chrono::Utc;
use cron::Schedule;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::MonitoringSchedule;
use crate::task_queue;

fn parse_schedule(cron_expression: &str) -> Option<Schedule> {
    Schedule::from_str(&format!("0 {cron_expression}")).ok()
}

/// Add or replace the monitoring schedule for a site. Where the original's
/// `add_schedule` registered an in-process APScheduler job, this bridge has
/// no daemon to register with: the row itself is the schedule, and
/// `sync_schedules_from_db` picks it up on its next poll.
pub async fn add_schedule(pool: &SqlitePool, site_id: i64, cron_expression: &str) -> anyhow::Result<()> {
    if parse_schedule(cron_expression).is_none() {
        anyhow::bail!("invalid cron expression: {cron_expression}");
    }
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO monitoring_schedules (site_id, cron_expression, is_active, created_at, updated_at)
         VALUES (?, ?, 1, ?, ?)
         ON CONFLICT(site_id) DO UPDATE SET
            cron_expression = excluded.cron_expression, is_active = 1, updated_at = excluded.updated_at",
    )
    .bind(site_id)
    .bind(cron_expression)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    info!(site_id, cron_expression, "schedule added");
    Ok(())
}

/// Deactivate a site's monitoring schedule. Leaves the row (and its crawl
/// history) in place rather than deleting it.
pub async fn remove_schedule(pool: &SqlitePool, site_id: i64) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE monitoring_schedules SET is_active = 0, updated_at = ? WHERE site_id = ?")
        .bind(Utc::now())
        .bind(site_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Check every active monitoring schedule and enqueue a crawl task for any
/// whose cron trigger fires at or before `now`. Returns the number of tasks
/// enqueued.
pub async fn sync_schedules_from_db(pool: &SqlitePool, settings: &Settings) -> anyhow::Result<usize> {
    let schedules: Vec<MonitoringSchedule> =
        sqlx::query_as("SELECT * FROM monitoring_schedules WHERE is_active = 1")
            .fetch_all(pool)
            .await?;

    let now = Utc::now();
    let minute_key = now.format("%Y-%m-%dT%H:%M").to_string();
    let mut fired = 0usize;

    for schedule in schedules {
        let Some(parsed) = parse_schedule(&schedule.cron_expression) else {
            warn!(site_id = schedule.site_id, expr = %schedule.cron_expression, "unparseable cron expression");
            continue;
        };

        let due = match schedule.next_run_at {
            Some(next_run_at) => now >= next_run_at,
            None => parsed.after(&(now - chrono::Duration::minutes(1))).next().is_some_and(|t| t <= now),
        };
        if !due {
            continue;
        }

        let idempotency_key = format!("site:{}:cron:{}", schedule.site_id, minute_key);
        let job_id = crate::db::create_crawl_job(pool, schedule.site_id, settings.max_crawl_pages as i64).await?;
        task_queue::enqueue(
            pool,
            schedule.site_id,
            job_id,
            100,
            Some(&idempotency_key),
            None,
            settings.task_max_attempts as i64,
        )
        .await?;

        let next_run_at = parsed.after(&now).next();
        sqlx::query(
            "UPDATE monitoring_schedules SET last_run_at = ?, next_run_at = ?, updated_at = ? WHERE site_id = ?",
        )
        .bind(now)
        .bind(next_run_at)
        .bind(now)
        .bind(schedule.site_id)
        .execute(pool)
        .await?;

        info!(site_id = schedule.site_id, job_id, "scheduled crawl enqueued");
        fired += 1;
    }

    Ok(fired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_five_field_crontab() {
        assert!(parse_schedule("0 9 * * *").is_some());
        assert!(parse_schedule("*/15 * * * *").is_some());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(parse_schedule("not a cron expression").is_none());
    }

    async fn test_pool() -> SqlitePool {
        crate::db::connect("sqlite::memory:").await.expect("connect")
    }

    async fn insert_site(pool: &SqlitePool) -> i64 {
        let now = Utc::now();
        sqlx::query("INSERT INTO sites (url, domain, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind("https://example.com")
            .bind("example.com")
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .expect("insert site")
            .last_insert_rowid()
    }

    #[tokio::test]
    async fn add_schedule_rejects_invalid_cron() {
        let pool = test_pool().await;
        let site_id = insert_site(&pool).await;
        assert!(add_schedule(&pool, site_id, "not a cron expression").await.is_err());
    }

    #[tokio::test]
    async fn add_then_remove_schedule_round_trip() {
        let pool = test_pool().await;
        let site_id = insert_site(&pool).await;

        add_schedule(&pool, site_id, "0 9 * * *").await.expect("add");
        let active: i64 = sqlx::query_scalar("SELECT is_active FROM monitoring_schedules WHERE site_id = ?")
            .bind(site_id)
            .fetch_one(&pool)
            .await
            .expect("load");
        assert_eq!(active, 1);

        let removed = remove_schedule(&pool, site_id).await.expect("remove");
        assert!(removed);
        let active: i64 = sqlx::query_scalar("SELECT is_active FROM monitoring_schedules WHERE site_id = ?")
            .bind(site_id)
            .fetch_one(&pool)
            .await
            .expect("load");
        assert_eq!(active, 0);
    }
}
