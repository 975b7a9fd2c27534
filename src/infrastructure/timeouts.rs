// Timeout Decorators - bound every graph-store and record-store call
// An elapsed call surfaces as a transient Internal error instead of waiting
// indefinitely on the store.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::GraphStore;
use crate::infrastructure::record_store::RecordStore;
use crate::models::{EdgeType, GraphNode, NeighborQuery, NodeId, Record, WriteSummary};

/// Run `operation`, failing with `AppError::Internal` once `limit` elapses.
pub async fn bounded<T, F>(store: &str, operation: &str, limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} {} timed out after {:?}", store, operation, limit);
            Err(AppError::Internal(format!(
                "{} {} timed out after {}ms",
                store,
                operation,
                limit.as_millis()
            )))
        }
    }
}

pub struct TimeoutGraphStore {
    inner: Arc<dyn GraphStore>,
    limit: Duration,
}

impl TimeoutGraphStore {
    pub fn new(inner: Arc<dyn GraphStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

const GRAPH: &str = "graph store";

#[async_trait]
impl GraphStore for TimeoutGraphStore {
    async fn create_node(&self, node: &GraphNode) -> AppResult<WriteSummary> {
        bounded(GRAPH, "create_node", self.limit, self.inner.create_node(node)).await
    }

    async fn node(&self, id: &str) -> AppResult<Option<GraphNode>> {
        bounded(GRAPH, "node", self.limit, self.inner.node(id)).await
    }

    async fn create_edge_if_absent(
        &self,
        edge: EdgeType,
        source: &str,
        target: &str,
    ) -> AppResult<WriteSummary> {
        bounded(
            GRAPH,
            "create_edge_if_absent",
            self.limit,
            self.inner.create_edge_if_absent(edge, source, target),
        )
        .await
    }

    async fn delete_edge(
        &self,
        edge: EdgeType,
        source: &str,
        target: &str,
    ) -> AppResult<WriteSummary> {
        bounded(
            GRAPH,
            "delete_edge",
            self.limit,
            self.inner.delete_edge(edge, source, target),
        )
        .await
    }

    async fn neighbors(&self, origin: &str, query: NeighborQuery) -> AppResult<Vec<NodeId>> {
        bounded(GRAPH, "neighbors", self.limit, self.inner.neighbors(origin, query)).await
    }

    async fn outgoing_many(
        &self,
        edge: EdgeType,
        sources: &[NodeId],
    ) -> AppResult<Vec<(NodeId, NodeId)>> {
        bounded(
            GRAPH,
            "outgoing_many",
            self.limit,
            self.inner.outgoing_many(edge, sources),
        )
        .await
    }
}

pub struct TimeoutRecordStore {
    inner: Arc<dyn RecordStore>,
    limit: Duration,
}

impl TimeoutRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

const RECORDS: &str = "record store";

#[async_trait]
impl RecordStore for TimeoutRecordStore {
    async fn find_many(&self, ids: &[NodeId]) -> AppResult<Vec<Record>> {
        bounded(RECORDS, "find_many", self.limit, self.inner.find_many(ids)).await
    }

    async fn find_unique(&self, id: &str) -> AppResult<Option<Record>> {
        bounded(RECORDS, "find_unique", self.limit, self.inner.find_unique(id)).await
    }

    async fn upsert(&self, record: &Record) -> AppResult<()> {
        bounded(RECORDS, "upsert", self.limit, self.inner.upsert(record)).await
    }

    async fn list_ids(&self, after: Option<&str>, limit: u32) -> AppResult<Vec<NodeId>> {
        bounded(RECORDS, "list_ids", self.limit, self.inner.list_ids(after, limit)).await
    }
}
