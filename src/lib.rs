pub mod artifact;
pub mod browser_pool;
pub mod browser_profile;
pub mod browser_setup;
pub mod categorizer;
pub mod change_detection;
pub mod config;
pub mod crawl_engine;
pub mod db;
pub mod events;
pub mod extractor;
pub mod fetcher;
pub mod robots;
pub mod scheduler;
pub mod task_queue;
pub mod url_policy;
pub mod utils;
pub mod worker;

pub use browser_pool::{BrowserPool, BrowserPoolConfig, PooledBrowserGuard};
pub use config::Settings;
pub use crawl_engine::{crawl, CircuitBreaker, CircuitBreakerConfig, CrawlOutcome, CrawledPage};
pub use events::{CrawlLifecycleEvent, EventBus};
pub use fetcher::{CachedPageState, FetchOutcome, Fetcher, SkipReason};
pub use scheduler::{add_schedule, remove_schedule, sync_schedules_from_db};
pub use task_queue::enqueue as enqueue_crawl_task;
pub use worker::run_crawl_job;
