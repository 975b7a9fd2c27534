use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::services::{DiscoveryConfig, DispatcherConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub graph_store: StoreConfig,
    pub record_store: StoreConfig,
    /// Per-call bound applied to both stores
    pub store_timeout_ms: u64,
    pub notifications: NotificationConfig,
    pub discovery: DiscoverySettings,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Memory,
    Nats,
}

impl FromStr for BusKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BusKind::Memory),
            "nats" => Ok(BusKind::Nats),
            other => Err(AppError::Configuration(format!(
                "NOTIFICATION_BUS must be 'memory' or 'nats', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub bus: BusKind,
    pub nats_url: String,
    /// Messages the in-memory bus retains before evicting the oldest
    pub memory_capacity: usize,
    pub topic: String,
    pub queue_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub profile_path_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// 0 disables the periodic job
    pub interval_secs: u64,
    pub batch_size: u32,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            server: ServerConfig {
                host: text("SERVER_HOST", "0.0.0.0"),
                port: parse(&lookup, "SERVER_PORT", 3000)?,
            },
            graph_store: StoreConfig {
                url: text("GRAPH_DATABASE_URL", "sqlite:data/social_graph.db"),
                max_connections: parse(&lookup, "GRAPH_MAX_CONNECTIONS", 5)?,
            },
            record_store: StoreConfig {
                url: text("RECORD_DATABASE_URL", "sqlite:data/records.db"),
                max_connections: parse(&lookup, "RECORD_MAX_CONNECTIONS", 5)?,
            },
            store_timeout_ms: parse(&lookup, "STORE_TIMEOUT_MS", 2000)?,
            notifications: NotificationConfig {
                bus: parse(&lookup, "NOTIFICATION_BUS", BusKind::Memory)?,
                nats_url: text("NATS_URL", "nats://localhost:4222"),
                memory_capacity: parse(&lookup, "NOTIFICATION_MEMORY_CAPACITY", 1024)?,
                topic: text("NOTIFICATION_TOPIC", "notifications"),
                queue_capacity: parse(&lookup, "NOTIFICATION_QUEUE_CAPACITY", 1024)?,
                enqueue_timeout_ms: parse(&lookup, "NOTIFICATION_ENQUEUE_TIMEOUT_MS", 50)?,
                max_attempts: parse(&lookup, "NOTIFICATION_MAX_ATTEMPTS", 3)?,
                retry_backoff_ms: parse(&lookup, "NOTIFICATION_RETRY_BACKOFF_MS", 200)?,
                profile_path_prefix: text("PROFILE_PATH_PREFIX", "/profile"),
            },
            discovery: DiscoverySettings {
                default_limit: parse(&lookup, "DISCOVER_DEFAULT_LIMIT", 5)?,
                max_limit: parse(&lookup, "DISCOVER_MAX_LIMIT", 50)?,
            },
            reconcile: ReconcileConfig {
                interval_secs: parse(&lookup, "RECONCILE_INTERVAL_SECS", 0)?,
                batch_size: parse(&lookup, "RECONCILE_BATCH_SIZE", 200)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        let positive = [
            ("GRAPH_MAX_CONNECTIONS", self.graph_store.max_connections as u64),
            ("RECORD_MAX_CONNECTIONS", self.record_store.max_connections as u64),
            ("STORE_TIMEOUT_MS", self.store_timeout_ms),
            ("NOTIFICATION_QUEUE_CAPACITY", self.notifications.queue_capacity as u64),
            ("NOTIFICATION_MEMORY_CAPACITY", self.notifications.memory_capacity as u64),
            ("NOTIFICATION_MAX_ATTEMPTS", self.notifications.max_attempts as u64),
            ("DISCOVER_DEFAULT_LIMIT", self.discovery.default_limit as u64),
            ("RECONCILE_BATCH_SIZE", self.reconcile.batch_size as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Configuration(format!("{} must be positive", name)));
        }
        if self.discovery.default_limit > self.discovery.max_limit {
            return Err(AppError::Configuration(
                "DISCOVER_DEFAULT_LIMIT exceeds DISCOVER_MAX_LIMIT".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let n = &self.notifications;
        DispatcherConfig {
            topic: n.topic.clone(),
            queue_capacity: n.queue_capacity,
            enqueue_timeout: Duration::from_millis(n.enqueue_timeout_ms),
            max_attempts: n.max_attempts,
            retry_backoff: Duration::from_millis(n.retry_backoff_ms),
            profile_path_prefix: n.profile_path_prefix.clone(),
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            default_limit: self.discovery.default_limit,
            max_limit: self.discovery.max_limit,
        }
    }

    /// `None` when periodic reconciliation is disabled.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile.interval_secs > 0).then(|| Duration::from_secs(self.reconcile.interval_secs))
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Configuration(format!("{}='{}': {}", key, raw, e))),
    }
}
