// SQLite pool construction shared by the graph and record stores

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::NodeKind;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pool for `url`, creating the database file and its directory if needed.
///
/// In-memory databases live inside a single connection, so the pool is pinned
/// to exactly one connection that is never recycled.
pub async fn connect_pool(url: &str, max_connections: u32) -> AppResult<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(url)
        .map_err(|e| AppError::Configuration(format!("invalid database url '{}': {}", url, e)))?
        .create_if_missing(true);

    let in_memory = is_in_memory(url);
    if !in_memory {
        ensure_parent_dir(url)?;
        // concurrent writers on separate connections wait instead of failing
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| AppError::Internal(format!("failed to connect to {}: {}", url, e)))?;

    info!("Connected to {}", url);
    Ok(pool)
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn ensure_parent_dir(url: &str) -> AppResult<()> {
    let path = url
        .trim_start_matches("sqlite:")
        .trim_start_matches("//")
        .split('?')
        .next()
        .unwrap_or_default();

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Configuration(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Ids bound per statement in multi-id lookups. Larger sets are split so a
/// statement stays well under SQLite's bound-variable limit.
pub(crate) const ID_CHUNK_SIZE: usize = 500;

/// Append `column IN (?, ?, ..)` bound to the given kinds.
pub(crate) fn push_kind_filter<'a>(
    qb: &mut QueryBuilder<'a, sqlx::Sqlite>,
    column: &str,
    kinds: &[NodeKind],
) {
    qb.push(column);
    qb.push(" IN (");
    let mut separated = qb.separated(", ");
    for kind in kinds {
        separated.push_bind(kind.as_str());
    }
    separated.push_unseparated(")");
}
