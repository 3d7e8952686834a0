//! SQLite-backed Store (SqliteStore). Persistent across process restarts.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::params;

use crate::memory::store::{Item, Namespace, Store, StoreError};

fn ns_to_key(ns: &Namespace) -> Result<String, StoreError> {
    Ok(serde_json::to_string(ns)?)
}

fn millis_to_system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_millis(millis.max(0) as u64)
}

fn system_time_to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// SQLite-backed Store. Key: (namespace, key). Value stored as JSON text.
///
/// Uses spawn_blocking for async. The `seq` column breaks ties between rows
/// updated within the same millisecond.
pub struct SqliteStore {
    db_path: std::path::PathBuf,
}

impl SqliteStore {
    /// Creates a new SQLite store and ensures the table exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS store_kv (
                ns TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                seq INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (ns, key)
            )
            "#,
            [],
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let ns = ns_to_key(namespace)?;
        let key = key.to_string();
        let value_str = serde_json::to_string(value)?;
        let db_path = self.db_path.clone();
        let now = system_time_to_millis(SystemTime::now());

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            // Keep created_at of an existing row.
            let existing_created: Option<i64> = conn
                .query_row(
                    "SELECT created_at FROM store_kv WHERE ns = ?1 AND key = ?2",
                    params![ns, key],
                    |row| row.get(0),
                )
                .ok();
            let created_at = existing_created.unwrap_or(now);
            let seq: i64 = conn
                .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM store_kv", [], |row| {
                    row.get(0)
                })
                .map_err(storage)?;
            conn.execute(
                "INSERT OR REPLACE INTO store_kv (ns, key, value, created_at, updated_at, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ns, key, value_str, created_at, now, seq],
            )
            .map_err(storage)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage)?
    }

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, StoreError> {
        let ns_str = ns_to_key(namespace)?;
        let ns_clone = namespace.clone();
        let key = key.to_string();
        let db_path = self.db_path.clone();

        let row = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let mut stmt = conn
                .prepare(
                    "SELECT value, created_at, updated_at FROM store_kv WHERE ns = ?1 AND key = ?2",
                )
                .map_err(storage)?;
            let mut rows = stmt.query(params![ns_str, key]).map_err(storage)?;
            let Some(row) = rows.next().map_err(storage)? else {
                return Ok::<_, StoreError>(None);
            };
            let value: String = row.get(0).map_err(storage)?;
            let created: i64 = row.get(1).map_err(storage)?;
            let updated: i64 = row.get(2).map_err(storage)?;
            Ok(Some((key, value, created, updated)))
        })
        .await
        .map_err(storage)??;

        let Some((key, value, created, updated)) = row else {
            return Ok(None);
        };
        Ok(Some(Item {
            value: serde_json::from_str(&value)?,
            key,
            namespace: ns_clone,
            created_at: millis_to_system_time(created),
            updated_at: millis_to_system_time(updated),
        }))
    }

    async fn list(&self, namespace: &Namespace, limit: usize) -> Result<Vec<Item>, StoreError> {
        let ns_str = ns_to_key(namespace)?;
        let db_path = self.db_path.clone();
        let limit = limit as i64;

        let rows = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let mut stmt = conn
                .prepare(
                    "SELECT key, value, created_at, updated_at FROM store_kv WHERE ns = ?1
                     ORDER BY updated_at DESC, seq DESC LIMIT ?2",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ns_str, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)??;

        rows.into_iter()
            .map(|(key, value, created, updated)| {
                Ok(Item {
                    value: serde_json::from_str(&value)?,
                    key,
                    namespace: namespace.clone(),
                    created_at: millis_to_system_time(created),
                    updated_at: millis_to_system_time(updated),
                })
            })
            .collect()
    }
}
