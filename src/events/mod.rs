//! Publish-only event bus for worker and crawl lifecycle events.
//!
//! Trimmed down to the publish/subscribe contract the system's external
//! interfaces actually need: a `tokio::sync::broadcast` channel and an event
//! enum, without backpressure modes, drain-on-shutdown sequencing, or
//! publish metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CrawlLifecycleEvent {
    TaskClaimed { task_id: i64, site_id: i64, worker_id: String, timestamp: DateTime<Utc> },
    TaskCompleted { task_id: i64, site_id: i64, pages_crawled: i64, timestamp: DateTime<Utc> },
    TaskFailed { task_id: i64, site_id: i64, error: String, retry_in_seconds: Option<i64>, timestamp: DateTime<Utc> },
    TaskDeadLettered { task_id: i64, site_id: i64, timestamp: DateTime<Utc> },
    ArtifactRegenerated { site_id: i64, content_hash: String, timestamp: DateTime<Utc> },
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("no active subscribers")]
    NoSubscribers,
}

/// Broadcast-backed event bus. Publishing with zero subscribers is not an
/// error condition for callers (nobody is required to be listening); it
/// surfaces as `Err(NoSubscribers)` only so a caller that cares can log it.
pub struct EventBus {
    sender: broadcast::Sender<CrawlLifecycleEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: CrawlLifecycleEvent) -> Result<usize, EventBusError> {
        self.sender.send(event).map_err(|_| EventBusError::NoSubscribers)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CrawlLifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_reports_no_subscribers() {
        let bus = EventBus::new(16);
        let err = bus
            .publish(CrawlLifecycleEvent::TaskDeadLettered {
                task_id: 1,
                site_id: 1,
                timestamp: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, EventBusError::NoSubscribers));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(CrawlLifecycleEvent::TaskClaimed {
            task_id: 1,
            site_id: 2,
            worker_id: "worker-a".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CrawlLifecycleEvent::TaskClaimed { task_id: 1, .. }));
    }
}
