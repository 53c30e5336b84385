//! Crawl engine: bounded-concurrency BFS crawling with a crawl-scoped
//! timeout circuit breaker.

pub mod circuit_breaker;
pub mod crawler;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use crawler::{categorize_and_score, crawl, CacheLookup, CrawlOutcome, CrawledPage, NoCache};
