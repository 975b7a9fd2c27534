use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    config::{BusKind, Config},
    error::AppResult,
    infrastructure::{
        GraphStore, InMemoryBus, MessageBus, NatsBus, RecordStore, SqliteGraphStore,
        SqliteRecordStore, TimeoutGraphStore, TimeoutRecordStore,
    },
    services::{
        NodeSync, NotificationDispatcher, ProjectionService, RecommendationEngine, Reconciler,
        RelationshipEngine,
    },
};

/// Every long-lived dependency, built once at start-up and shared by handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub graph: Arc<dyn GraphStore>,
    pub records: Arc<dyn RecordStore>,
    pub node_sync: NodeSync,
    pub relationships: RelationshipEngine,
    pub projection: ProjectionService,
    pub recommendations: RecommendationEngine,
    pub reconciler: Reconciler,
    pub dispatcher: Arc<NotificationDispatcher>,
    reconcile_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<Self> {
        let graph = SqliteGraphStore::connect(
            &config.graph_store.url,
            config.graph_store.max_connections,
        )
        .await?;
        info!("Graph store ready at {}", config.graph_store.url);

        let records = SqliteRecordStore::connect(
            &config.record_store.url,
            config.record_store.max_connections,
        )
        .await?;
        info!("Record store ready at {}", config.record_store.url);

        let bus: Arc<dyn MessageBus> = match config.notifications.bus {
            BusKind::Nats => {
                Arc::new(NatsBus::connect(&config.notifications.nats_url, "social-graph").await?)
            }
            BusKind::Memory => {
                warn!(
                    "Using in-memory notification bus; only the last {} messages are kept",
                    config.notifications.memory_capacity
                );
                Arc::new(InMemoryBus::with_capacity(config.notifications.memory_capacity))
            }
        };

        let state = Self::from_parts(config, Arc::new(graph), Arc::new(records), bus);
        if let Some(interval) = state.config.reconcile_interval() {
            state.start_reconciliation(interval);
        }
        Ok(state)
    }

    /// Wire services over already-built stores and bus. Both stores get the
    /// configured per-call timeout.
    pub fn from_parts(
        config: Config,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let timeout = config.store_timeout();
        let graph: Arc<dyn GraphStore> = Arc::new(TimeoutGraphStore::new(graph, timeout));
        let records: Arc<dyn RecordStore> = Arc::new(TimeoutRecordStore::new(records, timeout));

        let dispatcher = Arc::new(NotificationDispatcher::start(
            bus,
            Arc::clone(&records),
            config.dispatcher_config(),
        ));

        Self {
            node_sync: NodeSync::new(Arc::clone(&graph)),
            relationships: RelationshipEngine::new(Arc::clone(&graph), Arc::clone(&dispatcher)),
            projection: ProjectionService::new(Arc::clone(&graph), Arc::clone(&records)),
            recommendations: RecommendationEngine::new(
                Arc::clone(&graph),
                Arc::clone(&records),
                config.discovery_config(),
            ),
            reconciler: Reconciler::new(
                Arc::clone(&graph),
                Arc::clone(&records),
                config.reconcile.batch_size,
            ),
            dispatcher,
            graph,
            records,
            config,
            reconcile_task: Arc::new(Mutex::new(None)),
        }
    }

    fn start_reconciliation(&self, interval: std::time::Duration) {
        info!("Periodic reconciliation every {:?}", interval);
        let handle = self.reconciler.clone().spawn_periodic(interval);
        if let Ok(mut task) = self.reconcile_task.lock() {
            *task = Some(handle);
        }
    }

    /// Stop background work and drain queued notifications.
    pub async fn shutdown(&self) {
        let task = self.reconcile_task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            task.abort();
        }
        self.dispatcher.shutdown().await;
        info!("Application state shut down");
    }
}
