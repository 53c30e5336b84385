//! Runtime configuration for the crawl engine, task queue, and scheduler.
//!
//! `Settings` is loaded from environment variables with typed defaults so the
//! process never panics on a missing variable. Every field documented here
//! corresponds to the configuration table carried by the system's
//! specification; defaults match that table exactly.

use std::time::Duration;

/// Flat bag of tunables consumed by the crawler, fetcher, task queue, worker
/// loop, and scheduler bridge.
#[derive(Debug, Clone)]
pub struct Settings {
    // --- crawler ---
    pub max_crawl_depth: u32,
    pub max_crawl_pages: usize,
    pub crawl_concurrency: usize,
    pub crawl_delay_ms: u64,
    pub crawl_request_timeout_seconds: u64,

    // --- circuit breaker ---
    pub crawl_timeout_streak_threshold: u32,
    pub crawl_timeout_rate_threshold: f64,
    pub crawl_timeout_min_samples: u32,
    pub crawl_progress_stall_seconds: u64,
    pub crawl_circuit_cooldown_seconds: u64,
    pub crawl_max_duration_seconds: u64,

    // --- JS-promotion probe ---
    pub crawl_js_probe_low_links: usize,
    pub crawl_js_probe_max_depth: u32,
    pub crawl_js_probe_max_attempts: u32,
    pub crawl_js_probe_promote_links: usize,

    // --- worker ---
    pub worker_max_concurrent_tasks: usize,
    pub task_lease_seconds: u64,
    pub task_poll_interval_ms: u64,
    pub task_max_attempts: u32,
    pub task_heartbeat_interval_seconds: u64,

    // --- scheduler ---
    pub scheduler_sync_interval_seconds: u64,
    pub run_scheduler: bool,

    // --- ambient ---
    pub database_url: String,
    pub browser_pool_max_pages: usize,
    pub worker_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_crawl_depth: 3,
            max_crawl_pages: 200,
            crawl_concurrency: 20,
            crawl_delay_ms: 50,
            crawl_request_timeout_seconds: 15,

            crawl_timeout_streak_threshold: 8,
            crawl_timeout_rate_threshold: 0.7,
            crawl_timeout_min_samples: 12,
            crawl_progress_stall_seconds: 30,
            crawl_circuit_cooldown_seconds: 120,
            crawl_max_duration_seconds: 0,

            crawl_js_probe_low_links: 1,
            crawl_js_probe_max_depth: 1,
            crawl_js_probe_max_attempts: 3,
            crawl_js_probe_promote_links: 3,

            worker_max_concurrent_tasks: 3,
            task_lease_seconds: 60,
            task_poll_interval_ms: 1000,
            task_max_attempts: 5,
            task_heartbeat_interval_seconds: 10,

            scheduler_sync_interval_seconds: 30,
            run_scheduler: false,

            database_url: "sqlite://llmstxt.db".to_string(),
            browser_pool_max_pages: 2,
            worker_id: format!("worker-{:x}", rand::random::<u64>()),
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to documented
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_crawl_depth: env_or(defaults.max_crawl_depth, "MAX_CRAWL_DEPTH"),
            max_crawl_pages: env_or(defaults.max_crawl_pages, "MAX_CRAWL_PAGES"),
            crawl_concurrency: env_or(defaults.crawl_concurrency, "CRAWL_CONCURRENCY"),
            crawl_delay_ms: env_or(defaults.crawl_delay_ms, "CRAWL_DELAY_MS"),
            crawl_request_timeout_seconds: env_or(
                defaults.crawl_request_timeout_seconds,
                "CRAWL_REQUEST_TIMEOUT_SECONDS",
            ),

            crawl_timeout_streak_threshold: env_or(
                defaults.crawl_timeout_streak_threshold,
                "CRAWL_TIMEOUT_STREAK_THRESHOLD",
            ),
            crawl_timeout_rate_threshold: env_or(
                defaults.crawl_timeout_rate_threshold,
                "CRAWL_TIMEOUT_RATE_THRESHOLD",
            ),
            crawl_timeout_min_samples: env_or(
                defaults.crawl_timeout_min_samples,
                "CRAWL_TIMEOUT_MIN_SAMPLES",
            ),
            crawl_progress_stall_seconds: env_or(
                defaults.crawl_progress_stall_seconds,
                "CRAWL_PROGRESS_STALL_SECONDS",
            ),
            crawl_circuit_cooldown_seconds: env_or(
                defaults.crawl_circuit_cooldown_seconds,
                "CRAWL_CIRCUIT_COOLDOWN_SECONDS",
            ),
            crawl_max_duration_seconds: env_or(
                defaults.crawl_max_duration_seconds,
                "CRAWL_MAX_DURATION_SECONDS",
            ),

            crawl_js_probe_low_links: env_or(
                defaults.crawl_js_probe_low_links,
                "CRAWL_JS_PROBE_LOW_LINKS",
            ),
            crawl_js_probe_max_depth: env_or(
                defaults.crawl_js_probe_max_depth,
                "CRAWL_JS_PROBE_MAX_DEPTH",
            ),
            crawl_js_probe_max_attempts: env_or(
                defaults.crawl_js_probe_max_attempts,
                "CRAWL_JS_PROBE_MAX_ATTEMPTS",
            ),
            crawl_js_probe_promote_links: env_or(
                defaults.crawl_js_probe_promote_links,
                "CRAWL_JS_PROBE_PROMOTE_LINKS",
            ),

            worker_max_concurrent_tasks: env_or(
                defaults.worker_max_concurrent_tasks,
                "WORKER_MAX_CONCURRENT_TASKS",
            ),
            task_lease_seconds: env_or(defaults.task_lease_seconds, "TASK_LEASE_SECONDS"),
            task_poll_interval_ms: env_or(
                defaults.task_poll_interval_ms,
                "TASK_POLL_INTERVAL_MS",
            ),
            task_max_attempts: env_or(defaults.task_max_attempts, "TASK_MAX_ATTEMPTS"),
            task_heartbeat_interval_seconds: env_or(
                defaults.task_heartbeat_interval_seconds,
                "TASK_HEARTBEAT_INTERVAL_SECONDS",
            ),

            scheduler_sync_interval_seconds: env_or(
                defaults.scheduler_sync_interval_seconds,
                "SCHEDULER_SYNC_INTERVAL_SECONDS",
            ),
            run_scheduler: env_or(defaults.run_scheduler, "RUN_SCHEDULER"),

            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            browser_pool_max_pages: env_or(
                defaults.browser_pool_max_pages,
                "BROWSER_POOL_MAX_PAGES",
            ),
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl_request_timeout_seconds)
    }

    #[must_use]
    pub fn task_lease(&self) -> Duration {
        Duration::from_secs(self.task_lease_seconds)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.task_heartbeat_interval_seconds)
    }
}

/// Parse an environment variable of type `T`, falling back to `default` when
/// unset or unparseable. Never panics.
fn env_or<T: std::str::FromStr>(default: T, key: &str) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let s = Settings::default();
        assert_eq!(s.max_crawl_depth, 3);
        assert_eq!(s.max_crawl_pages, 200);
        assert_eq!(s.crawl_concurrency, 20);
        assert_eq!(s.task_max_attempts, 5);
        assert_eq!(s.scheduler_sync_interval_seconds, 30);
        assert!(!s.run_scheduler);
    }

    #[test]
    fn env_or_falls_back_on_missing() {
        // SAFETY: test runs single-threaded for this key
        unsafe { std::env::remove_var("LLMSTXT_TEST_ENV_OR_MISSING") };
        let v: u32 = env_or(42, "LLMSTXT_TEST_ENV_OR_MISSING");
        assert_eq!(v, 42);
    }
}
