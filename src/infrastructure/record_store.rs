// Record Store Adapter - narrow view of the primary entity store
// The primary store owns identity and every descriptive attribute; the graph
// engine only looks records up (and upserts them when seeding).

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, sqlite::SqliteRow, QueryBuilder, Row, Sqlite};

use crate::error::{AppError, AppResult};
use crate::infrastructure::sqlite::{connect_pool, ID_CHUNK_SIZE};
use crate::models::{NodeId, Record};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records for `ids`. No ordering guarantee; unknown ids are skipped.
    async fn find_many(&self, ids: &[NodeId]) -> AppResult<Vec<Record>>;

    async fn find_unique(&self, id: &str) -> AppResult<Option<Record>>;

    async fn upsert(&self, record: &Record) -> AppResult<()>;

    /// Ids in ascending order, strictly after `after`, at most `limit` of them.
    async fn list_ids(&self, after: Option<&str>, limit: u32) -> AppResult<Vec<NodeId>>;
}

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
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

    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                email TEXT NOT NULL,
                username TEXT NOT NULL,
                firstname TEXT NOT NULL,
                lastname TEXT,
                owner_id TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create records table: {}", e)))?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> AppResult<Record> {
        Ok(Record {
            id: row.get("id"),
            kind: row.get::<String, _>("kind").parse()?,
            email: row.get("email"),
            username: row.get("username"),
            firstname: row.get("firstname"),
            lastname: row.get("lastname"),
            owner_id: row.get("owner_id"),
            created_at: row.get("created_at"),
        })
    }
}

const RECORD_COLUMNS: &str =
    "SELECT id, kind, email, username, firstname, lastname, owner_id, created_at FROM records";

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_many(&self, ids: &[NodeId]) -> AppResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new(RECORD_COLUMNS);
            qb.push(" WHERE id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                records.push(Self::from_row(row)?);
            }
        }
        Ok(records)
    }

    async fn find_unique(&self, id: &str) -> AppResult<Option<Record>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", RECORD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn upsert(&self, record: &Record) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO records (id, kind, email, username, firstname, lastname, owner_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                username = excluded.username,
                firstname = excluded.firstname,
                lastname = excluded.lastname,
                owner_id = excluded.owner_id
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(&record.email)
        .bind(&record.username)
        .bind(&record.firstname)
        .bind(record.lastname.as_deref())
        .bind(record.owner_id.as_deref())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to upsert record {}: {}", record.id, e)))?;
        Ok(())
    }

    async fn list_ids(&self, after: Option<&str>, limit: u32) -> AppResult<Vec<NodeId>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM records WHERE id > ? ORDER BY id LIMIT ?",
        )
        .bind(after.unwrap_or(""))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
