//! `llms.txt` crawl worker process.
//!
//! Loads configuration from the environment, opens the SQLite store, builds
//! the fetcher/browser pool, and runs the worker loop until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Result;
use llmstxt_crawler::{BrowserPool, BrowserPoolConfig, EventBus, Fetcher, Settings};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env());
    info!(worker_id = %settings.worker_id, database_url = %settings.database_url, "starting llms.txt crawl worker");

    let pool = llmstxt_crawler::db::connect(&settings.database_url).await?;

    let browser_pool = if settings.browser_pool_max_pages > 0 {
        let pool_config = BrowserPoolConfig { max_pool_size: settings.browser_pool_max_pages, ..BrowserPoolConfig::default() };
        let browser_pool = BrowserPool::new(pool_config);
        browser_pool.start().await?;
        Some(browser_pool)
    } else {
        None
    };

    let http_client = Fetcher::build_client(settings.crawl_concurrency, settings.request_timeout());
    let fetcher = Arc::new(Fetcher::new(http_client.clone(), browser_pool.clone(), settings.crawl_concurrency + 5));
    let events = Arc::new(EventBus::default());

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let worker_settings = settings.clone();
    let worker_handle = tokio::spawn(llmstxt_crawler::worker::worker_loop(
        pool,
        fetcher,
        http_client,
        worker_settings,
        events,
        stop_rx,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    let _ = stop_tx.send(true);
    worker_handle.await?;

    if let Some(browser_pool) = browser_pool {
        browser_pool.shutdown().await?;
    }

    info!("worker shut down cleanly");
    Ok(())
}
