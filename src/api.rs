// HTTP transport - thin axum router over the graph services
// Identity comes in the request body as `user_id`; authentication is handled
// upstream of this service.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    models::{current_time_millis, NodeId, NodeKind, Record, Recommendation},
    services::ManagesLink,
};

#[derive(Debug, Deserialize)]
pub struct RelationshipRequest {
    pub user_id: String,
    pub target_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    pub limit: Option<usize>,
}

/// Body of `POST /records`. `created_at` defaults to now.
#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub id: String,
    pub kind: NodeKind,
    pub email: String,
    pub username: String,
    pub firstname: String,
    pub lastname: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: Option<i64>,
}

impl From<RecordRequest> for Record {
    fn from(req: RecordRequest) -> Self {
        Record {
            id: req.id,
            kind: req.kind,
            email: req.email,
            username: req.username,
            firstname: req.firstname,
            lastname: req.lastname,
            owner_id: req.owner_id,
            created_at: req.created_at.unwrap_or_else(current_time_millis),
        }
    }
}

// HTTP Handlers

pub async fn follow_handler(
    State(state): State<AppState>,
    Json(req): Json<RelationshipRequest>,
) -> AppResult<Json<Value>> {
    let message = state.relationships.follow(&req.user_id, &req.target_id).await?;
    Ok(Json(json!({ "message": message })))
}

pub async fn unfollow_handler(
    State(state): State<AppState>,
    Json(req): Json<RelationshipRequest>,
) -> AppResult<Json<Value>> {
    let message = state.relationships.unfollow(&req.user_id, &req.target_id).await?;
    Ok(Json(json!({ "message": message })))
}

pub async fn followers_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Record>>> {
    Ok(Json(state.projection.followers(&id).await?))
}

pub async fn following_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Record>>> {
    Ok(Json(state.projection.following(&id).await?))
}

pub async fn pages_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Record>>> {
    Ok(Json(state.projection.pages(&id).await?))
}

pub async fn managers_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Record>>> {
    Ok(Json(state.projection.managers(&id).await?))
}

pub async fn following_ids_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<NodeId>>> {
    Ok(Json(state.projection.following_ids(&id).await?))
}

pub async fn discover_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DiscoverQuery>,
) -> AppResult<Json<Vec<Recommendation>>> {
    Ok(Json(state.recommendations.discover(&id, params.limit).await?))
}

/// Write the primary record, then mirror it into the graph.
pub async fn create_record_handler(
    State(state): State<AppState>,
    Json(req): Json<RecordRequest>,
) -> AppResult<Json<Value>> {
    let record = Record::from(req);
    if record.id.trim().is_empty() {
        return Err(AppError::Validation("record id must not be empty".to_string()));
    }

    state.records.upsert(&record).await?;
    debug!("Stored {} record {}", record.kind, record.id);

    let page = state.node_sync.sync_record(&record).await?;
    let manages = page.map(|report| match report.manages {
        ManagesLink::Created => "created".to_string(),
        ManagesLink::AlreadyPresent => "already_present".to_string(),
        ManagesLink::OwnerNotFound => "owner_not_found".to_string(),
        ManagesLink::Failed(reason) => format!("failed: {}", reason),
    });

    Ok(Json(json!({
        "id": record.id,
        "kind": record.kind,
        "manages": manages,
    })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Relationship mutations
        .route("/follow", post(follow_handler))
        .route("/unfollow", post(unfollow_handler))

        // Neighborhood projections
        .route("/nodes/{id}/followers", get(followers_handler))
        .route("/nodes/{id}/following", get(following_handler))
        .route("/nodes/{id}/following-ids", get(following_ids_handler))
        .route("/nodes/{id}/pages", get(pages_handler))
        .route("/nodes/{id}/managers", get(managers_handler))

        // Recommendations
        .route("/nodes/{id}/discover", get(discover_handler))

        // Primary record writes with graph mirroring
        .route("/records", post(create_record_handler))

        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::infrastructure::{InMemoryBus, SqliteGraphStore, SqliteRecordStore};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app() -> Router {
        let config = Config::from_lookup(|_| None).unwrap();
        let state = AppState::from_parts(
            config,
            Arc::new(SqliteGraphStore::new_in_memory().await.unwrap()),
            Arc::new(SqliteRecordStore::new_in_memory().await.unwrap()),
            Arc::new(InMemoryBus::new()),
        );
        router(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn user(id: &str, firstname: &str) -> Value {
        json!({
            "id": id,
            "kind": "user",
            "email": format!("{}@example.com", id),
            "username": id,
            "firstname": firstname,
        })
    }

    #[tokio::test]
    async fn test_follow_flow_over_http() {
        let app = app().await;
        for (id, name) in [("ann", "Ann"), ("ben", "Ben")] {
            let (status, _) = send(&app, "POST", "/records", Some(user(id, name))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let follow = json!({ "user_id": "ann", "target_id": "ben" });
        let (status, body) = send(&app, "POST", "/follow", Some(follow.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Relationship created");

        let (status, body) = send(&app, "POST", "/follow", Some(follow.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");

        let (_, body) = send(&app, "GET", "/nodes/ben/followers", None).await;
        assert_eq!(body[0]["id"], "ann");

        let (_, body) = send(&app, "GET", "/nodes/ann/following-ids", None).await;
        assert_eq!(body, json!(["ben", "ann"]));

        let (status, body) = send(&app, "POST", "/unfollow", Some(follow)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Relationship deleted");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app().await;
        send(&app, "POST", "/records", Some(user("ann", "Ann"))).await;

        let (status, _) = send(
            &app,
            "POST",
            "/follow",
            Some(json!({ "user_id": "ann", "target_id": "ann" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/unfollow",
            Some(json!({ "user_id": "ann", "target_id": "ghost" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");

        let (status, _) = send(&app, "GET", "/nodes/ann/discover?limit=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_page_record_links_owner() {
        let app = app().await;
        send(&app, "POST", "/records", Some(user("ann", "Ann"))).await;

        let page = json!({
            "id": "shop",
            "kind": "page",
            "email": "shop@example.com",
            "username": "shop",
            "firstname": "Shop",
            "owner_id": "ann",
        });
        let (status, body) = send(&app, "POST", "/records", Some(page)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["manages"], "created");

        let (_, body) = send(&app, "GET", "/nodes/ann/pages", None).await;
        assert_eq!(body[0]["id"], "shop");
        let (_, body) = send(&app, "GET", "/nodes/shop/managers", None).await;
        assert_eq!(body[0]["id"], "ann");
    }
}
