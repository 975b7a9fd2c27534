use std::sync::Arc;
use std::time::Duration;

use social_graph::{
    app_state::AppState,
    config::Config,
    infrastructure::{GraphStore, InMemoryBus, RecordStore, SqliteGraphStore, SqliteRecordStore},
    models::{EdgeType, FollowNotification, Record},
    AppError,
};

struct Harness {
    state: AppState,
    graph: Arc<SqliteGraphStore>,
    bus: Arc<InMemoryBus>,
}

async fn harness() -> Harness {
    let config = Config::from_lookup(|key| match key {
        "NOTIFICATION_RETRY_BACKOFF_MS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();

    let graph = Arc::new(SqliteGraphStore::new_in_memory().await.unwrap());
    let records = Arc::new(SqliteRecordStore::new_in_memory().await.unwrap());
    let bus = Arc::new(InMemoryBus::new());
    let state = AppState::from_parts(config, graph.clone(), records, bus.clone());

    Harness { state, graph, bus }
}

async fn add_users(state: &AppState, ids: &[&str]) {
    for id in ids {
        let record = Record::user(id, id, id, None);
        state.records.upsert(&record).await.unwrap();
        state.node_sync.create_node(&record).await.unwrap();
    }
}

#[tokio::test]
async fn test_follow_succeeds_once_then_conflicts() {
    let h = harness().await;
    add_users(&h.state, &["u1", "u2"]).await;

    assert!(h.state.relationships.follow("u1", "u2").await.is_ok());
    let second = h.state.relationships.follow("u1", "u2").await.unwrap_err();
    assert!(matches!(second, AppError::Conflict(_)));

    assert_eq!(h.graph.edge_count(EdgeType::Follow, "u1", "u2").await.unwrap(), 1);
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_self_follow_never_creates_edge() {
    let h = harness().await;
    add_users(&h.state, &["u1"]).await;

    let err = h.state.relationships.follow("u1", "u1").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.graph.edge_count(EdgeType::Follow, "u1", "u1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unfollow_without_edge_is_not_found() {
    let h = harness().await;
    add_users(&h.state, &["u1", "u2", "u3"]).await;

    let err = h.state.relationships.unfollow("u1", "u3").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    h.state.relationships.follow("u1", "u2").await.unwrap();
    h.state.relationships.unfollow("u1", "u2").await.unwrap();
    assert_eq!(h.graph.edge_count(EdgeType::Follow, "u1", "u2").await.unwrap(), 0);

    let again = h.state.relationships.unfollow("u1", "u2").await.unwrap_err();
    assert!(matches!(again, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_following_ids_include_origin() {
    let h = harness().await;
    add_users(&h.state, &["a", "b", "c"]).await;
    h.state.relationships.follow("a", "b").await.unwrap();
    h.state.relationships.follow("a", "c").await.unwrap();

    let ids = h.state.projection.following_ids("a").await.unwrap();
    assert_eq!(ids, vec!["b", "c", "a"]);
}

#[tokio::test]
async fn test_discover_common_neighbors() {
    let h = harness().await;
    add_users(&h.state, &["A", "B", "C", "D"]).await;
    for (s, t) in [("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")] {
        h.state.relationships.follow(s, t).await.unwrap();
    }

    let found = h.state.recommendations.discover("A", Some(5)).await.unwrap();
    let d = found.iter().find(|r| r.record.id == "D").unwrap();
    assert_eq!(d.common_connections, 2);
    assert!(found
        .iter()
        .all(|r| !["A", "B", "C"].contains(&r.record.id.as_str())));
}

#[tokio::test]
async fn test_discover_respects_limit_and_order() {
    let h = harness().await;
    add_users(&h.state, &["o", "f1", "f2", "f3", "x", "y", "z", "w"]).await;
    let edges = [
        ("o", "f1"),
        ("o", "f2"),
        ("o", "f3"),
        ("f1", "x"),
        ("f2", "x"),
        ("f3", "x"),
        ("f1", "y"),
        ("f2", "y"),
        ("f1", "z"),
        ("z", "w"),
        ("f1", "o"),
    ];
    for (s, t) in edges {
        h.state.relationships.follow(s, t).await.unwrap();
    }

    let found = h.state.recommendations.discover("o", Some(2)).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].record.id, "x");
    assert_eq!(found[1].record.id, "y");

    let all = h.state.recommendations.discover("o", Some(50)).await.unwrap();
    assert!(all.windows(2).all(|w| w[0].common_connections >= w[1].common_connections));
    assert!(all.iter().all(|r| r.record.id != "o"));
    assert!(all.iter().any(|r| r.record.id == "w"));
}

#[tokio::test]
async fn test_follow_publishes_notification() {
    let h = harness().await;
    let ada = Record::user("u1", "ada", "ada", Some("lovelace"));
    h.state.records.upsert(&ada).await.unwrap();
    h.state.node_sync.create_node(&ada).await.unwrap();
    add_users(&h.state, &["u2"]).await;

    h.state.relationships.follow("u1", "u2").await.unwrap();
    assert!(h.bus.wait_for(1, Duration::from_secs(2)).await);

    let messages = h.bus.messages_for("notifications");
    let notification: FollowNotification = serde_json::from_slice(&messages[0].payload).unwrap();
    assert_eq!(notification.payload.title, "New follower");
    assert_eq!(notification.payload.body, "Ada Lovelace started following you");
    assert_eq!(notification.payload.target_user_id, "u2");
    assert_eq!(notification.payload.action.as_deref(), Some("/profile/ada"));
}

#[tokio::test]
async fn test_bus_outage_does_not_fail_follow() {
    let h = harness().await;
    add_users(&h.state, &["u1", "u2"]).await;
    h.bus.fail_always();

    let result = h.state.relationships.follow("u1", "u2").await;
    assert!(result.is_ok());
    assert_eq!(h.graph.edge_count(EdgeType::Follow, "u1", "u2").await.unwrap(), 1);

    h.state.shutdown().await;
    assert!(h.bus.messages().is_empty());
    assert_eq!(h.state.dispatcher.stats().failed, 1);
}

#[tokio::test]
async fn test_reconciler_backfills_records_missing_from_graph() {
    let h = harness().await;
    let owner = Record::user("owner", "owner", "Owner", None);
    let page = Record::page("page", "page", "Page", "owner");
    h.state.records.upsert(&owner).await.unwrap();
    h.state.records.upsert(&page).await.unwrap();

    assert!(matches!(
        h.state.relationships.follow("owner", "page").await,
        Err(AppError::NotFound(_))
    ));

    let report = h.state.reconciler.run_once().await.unwrap();
    assert_eq!(report.nodes_created, 2);
    assert_eq!(report.manages_created, 1);

    h.state.relationships.follow("owner", "page").await.unwrap();
    let pages = h.state.projection.pages("owner").await.unwrap();
    assert_eq!(pages[0].id, "page");
    assert!(h.graph.node("page").await.unwrap().is_some());
}
