// Graph Store Interface - node/edge persistence used by every graph component
// Writes report change counters so callers can classify outcomes without a
// separate existence check.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{EdgeType, GraphNode, NeighborQuery, NodeId, NodeKind, WriteSummary};

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert `node` unless a node with the same id exists.
    /// `nodes_created` is 0 when nothing was written.
    async fn create_node(&self, node: &GraphNode) -> AppResult<WriteSummary>;

    async fn node(&self, id: &str) -> AppResult<Option<GraphNode>>;

    /// Create `source -[edge]-> target` in one atomic step, only if both
    /// endpoints exist with kinds allowed for `edge` and the edge is absent.
    ///
    /// `matched` is 1 when both endpoints were found, whether or not an edge
    /// was created.
    async fn create_edge_if_absent(
        &self,
        edge: EdgeType,
        source: &str,
        target: &str,
    ) -> AppResult<WriteSummary>;

    /// Delete `source -[edge]-> target` if present.
    async fn delete_edge(
        &self,
        edge: EdgeType,
        source: &str,
        target: &str,
    ) -> AppResult<WriteSummary>;

    /// Ids of the nodes adjacent to `origin`, in edge creation order.
    /// An unknown origin yields an empty list.
    async fn neighbors(&self, origin: &str, query: NeighborQuery) -> AppResult<Vec<NodeId>>;

    /// All `(source, target)` pairs of `edge` whose source is in `sources`.
    async fn outgoing_many(&self, edge: EdgeType, sources: &[NodeId])
        -> AppResult<Vec<(NodeId, NodeId)>>;
}

/// Neighborhood shapes used by the projection layer.
pub mod neighborhoods {
    use super::*;
    use crate::models::Direction;

    pub const FOLLOWERS: NeighborQuery = NeighborQuery {
        edge: EdgeType::Follow,
        direction: Direction::Incoming,
        origin_kinds: &NodeKind::ALL,
        neighbor_kinds: &NodeKind::ALL,
    };

    pub const FOLLOWING: NeighborQuery = NeighborQuery {
        edge: EdgeType::Follow,
        direction: Direction::Outgoing,
        origin_kinds: &NodeKind::ALL,
        neighbor_kinds: &NodeKind::ALL,
    };

    pub const MANAGED_PAGES: NeighborQuery = NeighborQuery {
        edge: EdgeType::Manages,
        direction: Direction::Outgoing,
        origin_kinds: &[NodeKind::User],
        neighbor_kinds: &[NodeKind::Page],
    };

    pub const PAGE_MANAGERS: NeighborQuery = NeighborQuery {
        edge: EdgeType::Manages,
        direction: Direction::Incoming,
        origin_kinds: &[NodeKind::Page],
        neighbor_kinds: &[NodeKind::User],
    };
}
