// Notification Dispatcher - asynchronous relationship-change events
// Callers hand events to a bounded queue; one background worker composes,
// serialises and publishes them with retries. Delivery failures end here and
// are only logged.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::infrastructure::bus::{BusMessage, MessageBus};
use crate::infrastructure::record_store::RecordStore;
use crate::models::FollowNotification;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Topic follow notifications are published on
    pub topic: String,
    pub queue_capacity: usize,
    /// How long a caller may wait for queue space before the event is dropped
    pub enqueue_timeout: Duration,
    /// Publish attempts per message, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry
    pub retry_backoff: Duration,
    pub profile_path_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topic: "notifications".to_string(),
            queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(50),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            profile_path_prefix: "/profile".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub delivered: u64,
    /// Never reached the queue (full or stopped)
    pub dropped: u64,
    /// Gave up after all attempts, or could not be serialised
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

enum Outbound {
    Followed { follower_id: String, target_id: String },
    Message(BusMessage),
}

pub struct NotificationDispatcher {
    sender: RwLock<Option<mpsc::Sender<Outbound>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    enqueue_timeout: Duration,
}

impl NotificationDispatcher {
    /// Start the delivery worker. Must be called inside a tokio runtime.
    pub fn start(
        bus: Arc<dyn MessageBus>,
        records: Arc<dyn RecordStore>,
        config: DispatcherConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let enqueue_timeout = config.enqueue_timeout;

        let worker = DeliveryWorker {
            bus,
            records,
            counters: Arc::clone(&counters),
            config,
        };
        let handle = tokio::spawn(worker.run(receiver));

        info!("Notification dispatcher started");
        Self {
            sender: RwLock::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
            counters,
            enqueue_timeout,
        }
    }

    /// Queue a "new follower" notification. Never fails the caller.
    pub async fn notify_follow(&self, follower_id: &str, target_id: &str) -> bool {
        self.enqueue(Outbound::Followed {
            follower_id: follower_id.to_string(),
            target_id: target_id.to_string(),
        })
        .await
    }

    /// Serialise `payload` as JSON and queue it for `topic`.
    /// Returns whether the message was accepted by the queue.
    pub async fn publish<T: Serialize + Sync + ?Sized>(&self, topic: &str, payload: &T) -> bool {
        match serde_json::to_vec(payload) {
            Ok(bytes) => {
                self.enqueue(Outbound::Message(BusMessage::new(topic, bytes)))
                    .await
            }
            Err(e) => {
                error!("Dropping notification for {}: cannot serialise payload: {}", topic, e);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    async fn enqueue(&self, item: Outbound) -> bool {
        let sender = self.sender.read().ok().and_then(|guard| guard.clone());
        let Some(sender) = sender else {
            warn!("Notification dropped: dispatcher is shut down");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.send_timeout(item, self.enqueue_timeout).await {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(
                    "Notification dropped: queue still full after {:?}",
                    self.enqueue_timeout
                );
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                warn!("Notification dropped: delivery worker stopped");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events, deliver everything already queued, then return.
    pub async fn shutdown(&self) {
        if let Ok(mut guard) = self.sender.write() {
            guard.take();
        }

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Notification worker ended abnormally: {}", e);
            }
        }
        info!("Notification dispatcher stopped: {:?}", self.stats());
    }
}

struct DeliveryWorker {
    bus: Arc<dyn MessageBus>,
    records: Arc<dyn RecordStore>,
    counters: Arc<Counters>,
    config: DispatcherConfig,
}

impl DeliveryWorker {
    async fn run(self, mut receiver: mpsc::Receiver<Outbound>) {
        while let Some(item) = receiver.recv().await {
            let message = match item {
                Outbound::Followed {
                    follower_id,
                    target_id,
                } => self.compose_follow(&follower_id, &target_id).await,
                Outbound::Message(message) => Some(message),
            };

            if let Some(message) = message {
                self.deliver(message).await;
            }
        }

        if let Err(e) = self.bus.flush().await {
            warn!("Bus flush on shutdown failed: {}", e);
        }
    }

    async fn compose_follow(&self, follower_id: &str, target_id: &str) -> Option<BusMessage> {
        let follower = match self.records.find_unique(follower_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Follower {} lookup failed, sending plain notification: {}", follower_id, e);
                None
            }
        };

        let notification = FollowNotification::compose(
            follower_id,
            target_id,
            follower.as_ref(),
            &self.config.profile_path_prefix,
        );

        match serde_json::to_vec(&notification) {
            Ok(bytes) => Some(BusMessage::new(self.config.topic.clone(), Bytes::from(bytes))),
            Err(e) => {
                error!("Cannot serialise follow notification {} -> {}: {}", follower_id, target_id, e);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn deliver(&self, message: BusMessage) {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.retry_backoff;

        for attempt in 1..=attempts {
            match self.bus.publish(&message).await {
                Ok(()) => {
                    debug!("Published {} on {} (attempt {})", message.id, message.topic, attempt);
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Publish of {} on {} failed (attempt {}/{}): {}",
                        message.id, message.topic, attempt, attempts, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    error!(
                        "Giving up on {} for {} after {} attempts: {}",
                        message.id, message.topic, attempts, e
                    );
                }
            }
        }
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::InMemoryBus;
    use crate::infrastructure::record_store::SqliteRecordStore;
    use crate::models::Record;

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            retry_backoff: Duration::from_millis(1),
            ..DispatcherConfig::default()
        }
    }

    async fn records() -> Arc<SqliteRecordStore> {
        let store = SqliteRecordStore::new_in_memory().await.unwrap();
        store
            .upsert(&Record::user("u1", "ada", "ada", Some("lovelace")))
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_follow_notification_delivered() {
        let bus = Arc::new(InMemoryBus::new());
        let dispatcher = NotificationDispatcher::start(bus.clone(), records().await, fast_config());

        assert!(dispatcher.notify_follow("u1", "u2").await);
        dispatcher.shutdown().await;

        let messages = bus.messages_for("notifications");
        assert_eq!(messages.len(), 1);
        let sent: FollowNotification = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(sent.payload.created_by, "u1");
        assert_eq!(sent.payload.target_user_id, "u2");
        assert_eq!(sent.payload.body, "Ada Lovelace started following you");
        assert_eq!(sent.payload.action.as_deref(), Some("/profile/ada"));

        let stats = dispatcher.stats();
        assert_eq!((stats.enqueued, stats.delivered, stats.failed), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_with_same_id() {
        let bus = Arc::new(InMemoryBus::new());
        bus.fail_next(2);
        let dispatcher = NotificationDispatcher::start(bus.clone(), records().await, fast_config());

        dispatcher.publish("audit", &serde_json::json!({"k": 1})).await;
        dispatcher.shutdown().await;

        assert_eq!(bus.attempts(), 3);
        assert_eq!(bus.messages().len(), 1);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_outage_is_counted_not_raised() {
        let bus = Arc::new(InMemoryBus::new());
        bus.fail_always();
        let dispatcher = NotificationDispatcher::start(bus.clone(), records().await, fast_config());

        assert!(dispatcher.notify_follow("u1", "u2").await);
        dispatcher.shutdown().await;

        assert_eq!(bus.attempts(), 3);
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_events_after_shutdown_are_dropped() {
        let bus = Arc::new(InMemoryBus::new());
        let dispatcher = NotificationDispatcher::start(bus.clone(), records().await, fast_config());
        dispatcher.shutdown().await;

        assert!(!dispatcher.notify_follow("u1", "u2").await);
        assert_eq!(dispatcher.stats().dropped, 1);
        assert!(bus.messages().is_empty());
    }
}
