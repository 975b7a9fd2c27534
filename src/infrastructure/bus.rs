//! Message bus used by the notification dispatcher.
//!
//! The dispatcher only needs hand-off: a publish succeeds once the bus has
//! accepted the message. Downstream consumers (push, email) are external.

use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Header JetStream uses to deduplicate redelivered messages.
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// One outbound message. `id` is stable across retries of the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub id: Uuid,
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: &BusMessage) -> AppResult<()>;

    /// Flush anything buffered client-side. Called on shutdown.
    async fn flush(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Long-lived NATS producer shared by every publish.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    pub async fn connect(url: &str, name: &str) -> AppResult<Self> {
        info!("Connecting to NATS at {}", url);

        let client = ConnectOptions::new()
            .name(name)
            .connection_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| AppError::Configuration(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS at {}", url);
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, message: &BusMessage) -> AppResult<()> {
        let mut headers = HeaderMap::new();
        headers.insert(MSG_ID_HEADER, message.id.to_string().as_str());

        self.client
            .publish_with_headers(message.topic.clone(), headers, message.payload.clone())
            .await
            .map_err(|e| AppError::Internal(format!("Publish failed: {}", e)))
    }

    async fn flush(&self) -> AppResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| AppError::Internal(format!("Flush failed: {}", e)))
    }
}

/// Messages an `InMemoryBus` keeps unless told otherwise.
pub const DEFAULT_RETAINED_MESSAGES: usize = 1024;

/// Bus that keeps the most recent messages in memory. Used for local runs and
/// tests; can be told to fail the next N publishes to simulate an outage.
/// Older messages are evicted once `capacity` is reached.
pub struct InMemoryBus {
    messages: Mutex<VecDeque<BusMessage>>,
    capacity: usize,
    accepted: AtomicUsize,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
    published: Notify,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_MESSAGES)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_RETAINED_MESSAGES))),
            capacity,
            accepted: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            published: Notify::new(),
        }
    }

    /// Fail the next `count` publish calls.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail every publish call.
    pub fn fail_always(&self) {
        self.fail_next(usize::MAX);
    }

    /// Retained messages, oldest first.
    pub fn messages(&self) -> Vec<BusMessage> {
        self.messages
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages accepted since creation, including evicted ones.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn messages_for(&self, topic: &str) -> Vec<BusMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Total publish calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages were accepted or `limit` elapses.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        let waiting = async {
            loop {
                let notified = self.published.notified();
                if self.accepted() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, waiting).await.is_ok()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: &BusMessage) -> AppResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == 0 {
                    None
                } else if n == usize::MAX {
                    Some(n)
                } else {
                    Some(n - 1)
                }
            })
            .is_ok();
        if failing {
            return Err(AppError::Internal("bus unavailable".to_string()));
        }

        {
            let mut messages = self
                .messages
                .lock()
                .map_err(|_| AppError::Internal("in-memory bus poisoned".to_string()))?;
            if messages.len() == self.capacity {
                messages.pop_front();
            }
            messages.push_back(message.clone());
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        self.published.notify_waiters();
        Ok(())
    }
}
