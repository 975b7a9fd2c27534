use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, QueryBuilder, Row, Sqlite};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::GraphStore;
use crate::infrastructure::sqlite::{connect_pool, push_kind_filter, ID_CHUNK_SIZE};
use crate::models::{
    current_time_millis, Direction, EdgeType, GraphNode, NeighborQuery, NodeId, WriteSummary,
};

/// SQLite-backed graph store. Nodes and edges live in two tables; every
/// statement is parameterised.
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let store = Self::new(connect_pool(url, max_connections).await?);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn new_in_memory() -> AppResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create graph tables and indexes if they do not exist
    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_nodes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                email TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create graph_nodes table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_edges (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL REFERENCES graph_nodes(id),
                target_id TEXT NOT NULL REFERENCES graph_nodes(id),
                edge_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (source_id, target_id, edge_type),
                CHECK (source_id <> target_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create graph_edges table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id, edge_type)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create source index: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id, edge_type)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create target index: {}", e)))?;

        Ok(())
    }

    /// Number of `edge` rows between `source` and `target`. Used by tests and diagnostics.
    pub async fn edge_count(&self, edge: EdgeType, source: &str, target: &str) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM graph_edges WHERE edge_type = ? AND source_id = ? AND target_id = ?",
        )
        .bind(edge.as_str())
        .bind(source)
        .bind(target)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// Appends the endpoint predicate shared by the edge insert and the match count.
fn push_endpoint_match<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    edge: EdgeType,
    source: &'a str,
    target: &'a str,
) {
    let (source_kinds, target_kinds) = edge.endpoint_kinds();
    qb.push(" FROM graph_nodes a, graph_nodes b WHERE a.id = ");
    qb.push_bind(source);
    qb.push(" AND b.id = ");
    qb.push_bind(target);
    qb.push(" AND a.id <> b.id AND ");
    push_kind_filter(qb, "a.kind", source_kinds);
    qb.push(" AND ");
    push_kind_filter(qb, "b.kind", target_kinds);
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn create_node(&self, node: &GraphNode) -> AppResult<WriteSummary> {
        let result = sqlx::query(
            "INSERT INTO graph_nodes (id, kind, email, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&node.id)
        .bind(node.kind.as_str())
        .bind(node.email.as_deref())
        .bind(current_time_millis())
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected();
        Ok(WriteSummary {
            matched: created,
            nodes_created: created,
            ..WriteSummary::default()
        })
    }

    async fn node(&self, id: &str) -> AppResult<Option<GraphNode>> {
        let row = sqlx::query("SELECT id, kind, email FROM graph_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(GraphNode {
                id: row.get("id"),
                kind: row.get::<String, _>("kind").parse()?,
                email: row.get("email"),
            })),
            None => Ok(None),
        }
    }

    async fn create_edge_if_absent(
        &self,
        edge: EdgeType,
        source: &str,
        target: &str,
    ) -> AppResult<WriteSummary> {
        let mut tx = self.pool.begin().await?;

        let mut insert = QueryBuilder::<Sqlite>::new(
            "INSERT INTO graph_edges (source_id, target_id, edge_type, created_at) SELECT a.id, b.id, ",
        );
        insert.push_bind(edge.as_str());
        insert.push(", ");
        insert.push_bind(current_time_millis());
        push_endpoint_match(&mut insert, edge, source, target);
        insert.push(" ON CONFLICT(source_id, target_id, edge_type) DO NOTHING");

        let created = insert.build().execute(&mut *tx).await?.rows_affected();

        let matched = if created > 0 {
            created
        } else {
            let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
            push_endpoint_match(&mut count, edge, source, target);
            count.build_query_scalar::<i64>().fetch_one(&mut *tx).await? as u64
        };

        tx.commit().await?;

        debug!(
            "create {} {} -> {}: matched={}, created={}",
            edge, source, target, matched, created
        );

        Ok(WriteSummary {
            matched,
            relationships_created: created,
            ..WriteSummary::default()
        })
    }

    async fn delete_edge(
        &self,
        edge: EdgeType,
        source: &str,
        target: &str,
    ) -> AppResult<WriteSummary> {
        let (source_kinds, target_kinds) = edge.endpoint_kinds();

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM graph_edges WHERE edge_type = ");
        qb.push_bind(edge.as_str());
        qb.push(" AND source_id = ");
        qb.push_bind(source);
        qb.push(" AND target_id = ");
        qb.push_bind(target);
        qb.push(" AND source_id IN (SELECT id FROM graph_nodes WHERE ");
        push_kind_filter(&mut qb, "kind", source_kinds);
        qb.push(") AND target_id IN (SELECT id FROM graph_nodes WHERE ");
        push_kind_filter(&mut qb, "kind", target_kinds);
        qb.push(")");

        let deleted = qb.build().execute(&self.pool).await?.rows_affected();

        debug!("delete {} {} -> {}: deleted={}", edge, source, target, deleted);

        Ok(WriteSummary {
            matched: deleted,
            relationships_deleted: deleted,
            ..WriteSummary::default()
        })
    }

    async fn neighbors(&self, origin: &str, query: NeighborQuery) -> AppResult<Vec<NodeId>> {
        let (origin_col, neighbor_col) = match query.direction {
            Direction::Outgoing => ("source_id", "target_id"),
            Direction::Incoming => ("target_id", "source_id"),
        };

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT e.{neighbor} AS neighbor_id FROM graph_nodes o \
             JOIN graph_edges e ON e.{origin} = o.id \
             JOIN graph_nodes n ON n.id = e.{neighbor} \
             WHERE o.id = ",
            neighbor = neighbor_col,
            origin = origin_col,
        ));
        qb.push_bind(origin);
        qb.push(" AND e.edge_type = ");
        qb.push_bind(query.edge.as_str());
        qb.push(" AND ");
        push_kind_filter(&mut qb, "o.kind", query.origin_kinds);
        qb.push(" AND ");
        push_kind_filter(&mut qb, "n.kind", query.neighbor_kinds);
        qb.push(" ORDER BY e.created_at, e.seq");

        let ids = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn outgoing_many(
        &self,
        edge: EdgeType,
        sources: &[NodeId],
    ) -> AppResult<Vec<(NodeId, NodeId)>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        // (created_at, seq, source, target), merged across chunks below
        let mut edges: Vec<(i64, i64, NodeId, NodeId)> = Vec::new();
        for chunk in sources.chunks(ID_CHUNK_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT created_at, seq, source_id, target_id FROM graph_edges WHERE edge_type = ",
            );
            qb.push_bind(edge.as_str());
            qb.push(" AND source_id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            edges.extend(rows.into_iter().map(|row| {
                (
                    row.get("created_at"),
                    row.get("seq"),
                    row.get("source_id"),
                    row.get("target_id"),
                )
            }));
        }

        edges.sort_by_key(|(created_at, seq, _, _)| (*created_at, *seq));
        Ok(edges
            .into_iter()
            .map(|(_, _, source, target)| (source, target))
            .collect())
    }
}
