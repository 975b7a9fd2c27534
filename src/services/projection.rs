// Query/Projection Layer - read-side neighborhoods
// Graph store for ids (in graph order), record store for the records,
// hydration to put them back in graph order. Pure reads.

use std::sync::Arc;

use crate::error::AppResult;
use crate::infrastructure::graph_store::{neighborhoods, GraphStore};
use crate::infrastructure::record_store::RecordStore;
use crate::models::{NeighborQuery, NodeId, Record};
use crate::services::hydration::hydrate_in_order;

#[derive(Clone)]
pub struct ProjectionService {
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
}

impl ProjectionService {
    pub fn new(graph: Arc<dyn GraphStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { graph, records }
    }

    /// Users and pages following `id`.
    pub async fn followers(&self, id: &str) -> AppResult<Vec<Record>> {
        self.project(id, neighborhoods::FOLLOWERS).await
    }

    /// Users and pages `id` follows.
    pub async fn following(&self, id: &str) -> AppResult<Vec<Record>> {
        self.project(id, neighborhoods::FOLLOWING).await
    }

    /// Pages managed by user `id`.
    pub async fn pages(&self, id: &str) -> AppResult<Vec<Record>> {
        self.project(id, neighborhoods::MANAGED_PAGES).await
    }

    /// Users managing page `id`.
    pub async fn managers(&self, id: &str) -> AppResult<Vec<Record>> {
        self.project(id, neighborhoods::PAGE_MANAGERS).await
    }

    /// Ids `id` follows, with `id` itself appended last. Callers use the
    /// result as an "already visible" set, which includes the origin.
    pub async fn following_ids(&self, id: &str) -> AppResult<Vec<NodeId>> {
        let mut ids = self.graph.neighbors(id, neighborhoods::FOLLOWING).await?;
        ids.push(id.to_string());
        Ok(ids)
    }

    async fn project(&self, id: &str, query: NeighborQuery) -> AppResult<Vec<Record>> {
        let ids = self.graph.neighbors(id, query).await?;
        hydrate_in_order(self.records.as_ref(), &ids).await
    }
}
