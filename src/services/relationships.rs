// Relationship Engine - FOLLOW edge mutations
// Uniqueness comes from the store's conditional write, never from a read
// followed by an insert, so concurrent follows of the same pair are safe.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::GraphStore;
use crate::models::EdgeType;
use crate::services::notifications::NotificationDispatcher;

pub const RELATIONSHIP_CREATED: &str = "Relationship created";
pub const RELATIONSHIP_DELETED: &str = "Relationship deleted";

#[derive(Clone)]
pub struct RelationshipEngine {
    graph: Arc<dyn GraphStore>,
    notifications: Arc<NotificationDispatcher>,
}

impl RelationshipEngine {
    pub fn new(graph: Arc<dyn GraphStore>, notifications: Arc<NotificationDispatcher>) -> Self {
        Self {
            graph,
            notifications,
        }
    }

    /// `user_id` starts following `target_id`.
    ///
    /// Fails with `NotFound` when either node is missing and `Conflict` when
    /// the edge already exists. On success a notification is queued; queueing
    /// problems are logged by the dispatcher and never reach the caller.
    pub async fn follow(&self, user_id: &str, target_id: &str) -> AppResult<&'static str> {
        validate_pair(user_id, target_id)?;

        let summary = self
            .graph
            .create_edge_if_absent(EdgeType::Follow, user_id, target_id)
            .await?;

        match (summary.relationships_created, summary.matched) {
            (0, 0) => Err(AppError::NotFound(format!(
                "user {} or target {} not found",
                user_id, target_id
            ))),
            (0, _) => Err(AppError::Conflict("already following".to_string())),
            (1, _) => {
                info!("{} now follows {}", user_id, target_id);
                self.notifications.notify_follow(user_id, target_id).await;
                Ok(RELATIONSHIP_CREATED)
            }
            (created, _) => Err(AppError::Internal(format!(
                "follow {} -> {} created {} edges",
                user_id, target_id, created
            ))),
        }
    }

    /// Remove the `user_id -> target_id` follow edge. No notification is sent.
    pub async fn unfollow(&self, user_id: &str, target_id: &str) -> AppResult<&'static str> {
        validate_pair(user_id, target_id)?;

        let summary = self
            .graph
            .delete_edge(EdgeType::Follow, user_id, target_id)
            .await?;

        if summary.relationships_deleted == 0 {
            debug!("unfollow {} -> {}: nothing to delete", user_id, target_id);
            return Err(AppError::NotFound("Follow relation not found".to_string()));
        }

        info!("{} unfollowed {}", user_id, target_id);
        Ok(RELATIONSHIP_DELETED)
    }
}

fn validate_pair(user_id: &str, target_id: &str) -> AppResult<()> {
    if user_id.trim().is_empty() || target_id.trim().is_empty() {
        return Err(AppError::Validation("user and target ids are required".to_string()));
    }
    if user_id == target_id {
        return Err(AppError::Validation("cannot follow yourself".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::InMemoryBus;
    use crate::infrastructure::record_store::SqliteRecordStore;
    use crate::infrastructure::sqlite_graph_store::SqliteGraphStore;
    use crate::models::{GraphNode, NodeKind};
    use crate::services::notifications::DispatcherConfig;

    async fn engine() -> (RelationshipEngine, Arc<SqliteGraphStore>, Arc<NotificationDispatcher>) {
        let graph = Arc::new(SqliteGraphStore::new_in_memory().await.unwrap());
        for id in ["u1", "u2", "u3"] {
            graph
                .create_node(&GraphNode {
                    id: id.to_string(),
                    kind: NodeKind::User,
                    email: None,
                })
                .await
                .unwrap();
        }
        let records = Arc::new(SqliteRecordStore::new_in_memory().await.unwrap());
        let dispatcher = Arc::new(NotificationDispatcher::start(
            Arc::new(InMemoryBus::new()),
            records,
            DispatcherConfig::default(),
        ));
        (
            RelationshipEngine::new(graph.clone(), dispatcher.clone()),
            graph,
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_follow_twice_conflicts() {
        let (engine, graph, _) = engine().await;

        assert_eq!(engine.follow("u1", "u2").await.unwrap(), RELATIONSHIP_CREATED);
        let err = engine.follow("u1", "u2").await.unwrap_err();
        assert_eq!(err, AppError::Conflict("already following".to_string()));
        assert_eq!(graph.edge_count(EdgeType::Follow, "u1", "u2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_self_follow_rejected_before_store() {
        let (engine, graph, _) = engine().await;
        let err = engine.follow("u1", "u1").await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(graph.edge_count(EdgeType::Follow, "u1", "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_follow_missing_node() {
        let (engine, _, _) = engine().await;
        assert_eq!(engine.follow("u1", "ghost").await.unwrap_err().kind(), "not_found");
        assert_eq!(engine.follow("", "u2").await.unwrap_err().kind(), "validation");
    }

    #[tokio::test]
    async fn test_unfollow_lifecycle() {
        let (engine, graph, _) = engine().await;

        assert_eq!(engine.unfollow("u1", "u3").await.unwrap_err().kind(), "not_found");

        engine.follow("u1", "u2").await.unwrap();
        assert_eq!(engine.unfollow("u1", "u2").await.unwrap(), RELATIONSHIP_DELETED);
        assert_eq!(graph.edge_count(EdgeType::Follow, "u1", "u2").await.unwrap(), 0);
        assert_eq!(engine.unfollow("u1", "u2").await.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn test_only_successful_follow_notifies() {
        let (engine, _, dispatcher) = engine().await;

        engine.follow("u1", "u2").await.unwrap();
        let _ = engine.follow("u1", "u2").await;
        engine.unfollow("u1", "u2").await.unwrap();

        assert_eq!(dispatcher.stats().enqueued, 1);
    }

    #[tokio::test]
    async fn test_concurrent_follows_create_one_edge() {
        // file-backed with several connections, so attempts really overlap
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("graph.db").display());
        let graph = Arc::new(SqliteGraphStore::connect(&url, 4).await.unwrap());
        for id in ["u1", "u2"] {
            graph
                .create_node(&GraphNode {
                    id: id.to_string(),
                    kind: NodeKind::User,
                    email: None,
                })
                .await
                .unwrap();
        }
        let dispatcher = Arc::new(NotificationDispatcher::start(
            Arc::new(InMemoryBus::new()),
            Arc::new(SqliteRecordStore::new_in_memory().await.unwrap()),
            DispatcherConfig::default(),
        ));
        let engine = RelationshipEngine::new(graph.clone(), dispatcher);

        let attempts = (0..8).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.follow("u1", "u2").await })
        });
        let results = futures::future::join_all(attempts).await;

        let ok = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(AppError::Conflict(_)))))
            .count();
        assert_eq!((ok, conflicts), (1, 7));
        assert_eq!(graph.edge_count(EdgeType::Follow, "u1", "u2").await.unwrap(), 1);
    }
}
