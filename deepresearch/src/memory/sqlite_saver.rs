//! SQLite-backed checkpointer (SqliteSaver). Persistent across process restarts.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::params;

use crate::memory::checkpoint::{
    Checkpoint, CheckpointListItem, CheckpointMetadata, CheckpointNext, CheckpointSource,
    PendingWrite,
};
use crate::memory::checkpointer::{window, CheckpointError, Checkpointer};
use crate::memory::config::RunnableConfig;
use crate::memory::serializer::Serializer;

fn storage(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}

/// SQLite-backed checkpointer. Key: (thread_id, checkpoint_ns, checkpoint_id).
///
/// Rows are ordered by an autoincrement `seq`, so "latest" is the last one written.
/// Uses spawn_blocking for async.
///
/// **Interaction**: Used as `Arc<dyn Checkpointer<S>>` in `StateGraph::compile_with_checkpointer`.
pub struct SqliteSaver<S> {
    db_path: std::path::PathBuf,
    serializer: Arc<dyn Serializer<S>>,
}

impl<S> SqliteSaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Creates a new SQLite checkpointer and ensures the table exists.
    pub fn new(
        path: impl AsRef<Path>,
        serializer: Arc<dyn Serializer<S>>,
    ) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                checkpoint_ns TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                payload BLOB NOT NULL,
                next TEXT NOT NULL,
                metadata_source TEXT NOT NULL,
                metadata_step INTEGER NOT NULL,
                metadata_created_at TEXT NOT NULL,
                parent_id TEXT,
                pending_writes TEXT NOT NULL DEFAULT '[]',
                UNIQUE (thread_id, checkpoint_ns, checkpoint_id)
            );
            CREATE INDEX IF NOT EXISTS checkpoints_thread
                ON checkpoints (thread_id, checkpoint_ns, seq);
            "#,
        )
        .map_err(storage)?;
        Ok(Self {
            db_path,
            serializer,
        })
    }

    fn thread_id_required(config: &RunnableConfig) -> Result<String, CheckpointError> {
        config
            .thread_id
            .clone()
            .ok_or(CheckpointError::ThreadIdRequired)
    }
}

type RowData = (
    String,
    String,
    Vec<u8>,
    String,
    String,
    i64,
    String,
    Option<String>,
    String,
);

#[async_trait]
impl<S> Checkpointer<S> for SqliteSaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Checkpoint<S>,
    ) -> Result<String, CheckpointError> {
        let thread_id = Self::thread_id_required(config)?;
        let checkpoint_ns = config.checkpoint_ns.clone();
        let payload = self.serializer.serialize(&checkpoint.state)?;
        let next = serde_json::to_string(&checkpoint.next)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let pending_writes = serde_json::to_string(&checkpoint.pending_writes)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let id = checkpoint.id.clone();
        let ts = checkpoint.ts.clone();
        let metadata = checkpoint.metadata.clone();

        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO checkpoints
                (thread_id, checkpoint_ns, checkpoint_id, ts, payload, next,
                 metadata_source, metadata_step, metadata_created_at, parent_id, pending_writes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    thread_id,
                    checkpoint_ns,
                    id,
                    ts,
                    payload,
                    next,
                    metadata.source.as_str(),
                    metadata.step,
                    metadata.created_at,
                    metadata.parent_id,
                    pending_writes,
                ],
            )
            .map_err(storage)?;
            Ok::<String, CheckpointError>(id)
        })
        .await
        .map_err(storage)?
    }

    async fn get_tuple(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let thread_id = Self::thread_id_required(config)?;
        let checkpoint_ns = config.checkpoint_ns.clone();
        let want_id = config.checkpoint_id.clone();
        let db_path = self.db_path.clone();

        let row: Option<RowData> = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let columns = "checkpoint_id, ts, payload, next, metadata_source, metadata_step,
                           metadata_created_at, parent_id, pending_writes";
            let sql = if want_id.is_some() {
                format!(
                    "SELECT {} FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                    columns
                )
            } else {
                format!(
                    "SELECT {} FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2
                     ORDER BY seq DESC LIMIT 1",
                    columns
                )
            };
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let mut rows = match &want_id {
                Some(cid) => stmt.query(params![thread_id, checkpoint_ns, cid]),
                None => stmt.query(params![thread_id, checkpoint_ns]),
            }
            .map_err(storage)?;
            let Some(row) = rows.next().map_err(storage)? else {
                return Ok::<_, CheckpointError>(None);
            };
            Ok(Some((
                row.get(0).map_err(storage)?,
                row.get(1).map_err(storage)?,
                row.get(2).map_err(storage)?,
                row.get(3).map_err(storage)?,
                row.get(4).map_err(storage)?,
                row.get(5).map_err(storage)?,
                row.get(6).map_err(storage)?,
                row.get(7).map_err(storage)?,
                row.get(8).map_err(storage)?,
            )))
        })
        .await
        .map_err(storage)??;

        let Some((id, ts, payload, next_json, source, step, created_at, parent_id, pending_json)) =
            row
        else {
            return Ok(None);
        };
        let state = self.serializer.deserialize(&payload)?;
        let next: CheckpointNext = serde_json::from_str(&next_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let pending_writes: Vec<PendingWrite> = serde_json::from_str(&pending_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(Some(Checkpoint {
            id,
            ts,
            state,
            next,
            metadata: CheckpointMetadata {
                source: CheckpointSource::parse(&source),
                step,
                created_at,
                parent_id,
            },
            pending_writes,
        }))
    }

    async fn list(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        let thread_id = Self::thread_id_required(config)?;
        let checkpoint_ns = config.checkpoint_ns.clone();
        let db_path = self.db_path.clone();

        let items = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let mut stmt = conn
                .prepare(
                    "SELECT checkpoint_id, metadata_source, metadata_step, metadata_created_at, parent_id
                     FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2
                     ORDER BY seq ASC",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![thread_id, checkpoint_ns], |row| {
                    Ok(CheckpointListItem {
                        checkpoint_id: row.get(0)?,
                        metadata: CheckpointMetadata {
                            source: CheckpointSource::parse(&row.get::<_, String>(1)?),
                            step: row.get(2)?,
                            created_at: row.get(3)?,
                            parent_id: row.get(4)?,
                        },
                    })
                })
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)??;

        Ok(window(items, limit, before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::serializer::JsonSerializer;

    fn saver(dir: &tempfile::TempDir) -> SqliteSaver<Vec<String>> {
        SqliteSaver::new(
            dir.path().join("cp.db"),
            Arc::new(JsonSerializer::<Vec<String>>::new()),
        )
        .unwrap()
    }

    /// **Scenario**: A checkpoint written by one saver is read back by a fresh saver on the same file.
    #[tokio::test]
    async fn put_then_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnableConfig::for_thread("t1");
        let cp = Checkpoint::new(
            vec!["a".to_string()],
            CheckpointNext::node("worker"),
            CheckpointSource::Loop,
            3,
            None,
        );
        saver(&dir).put(&config, &cp).await.unwrap();

        let loaded = saver(&dir).get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(loaded.id, cp.id);
        assert_eq!(loaded.state, vec!["a".to_string()]);
        assert_eq!(loaded.next, CheckpointNext::node("worker"));
        assert_eq!(loaded.metadata.step, 3);
        assert_eq!(loaded.metadata.source, CheckpointSource::Loop);
    }

    /// **Scenario**: Finished fan-out dispatches stored on a checkpoint are read back in order.
    #[tokio::test]
    async fn pending_writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnableConfig::for_thread("t1");
        let writes = vec![
            PendingWrite {
                task_index: 1,
                node: "worker".into(),
                update: serde_json::json!({"completed": ["b"]}),
            },
            PendingWrite {
                task_index: 0,
                node: "worker".into(),
                update: serde_json::json!({"failed": ["a"]}),
            },
        ];
        let cp = Checkpoint::new(
            vec!["a".to_string()],
            CheckpointNext::Route {
                source: "supervisor".into(),
            },
            CheckpointSource::Pending,
            2,
            None,
        )
        .with_pending_writes(writes.clone());
        saver(&dir).put(&config, &cp).await.unwrap();

        let loaded = saver(&dir).get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(loaded.pending_writes, writes);
        assert_eq!(loaded.metadata.source, CheckpointSource::Pending);
    }

    /// **Scenario**: Latest is the last written, even when written within the same millisecond.
    #[tokio::test]
    async fn latest_is_last_written() {
        let dir = tempfile::tempdir().unwrap();
        let s = saver(&dir);
        let config = RunnableConfig::for_thread("t1");
        let mut last_id = String::new();
        for step in 0..5 {
            let cp = Checkpoint::new(
                vec![step.to_string()],
                CheckpointNext::End,
                CheckpointSource::Loop,
                step,
                None,
            );
            last_id = s.put(&config, &cp).await.unwrap();
        }
        let latest = s.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(latest.id, last_id);
        let list = s.list(&config, Some(2), None, None).await.unwrap();
        let steps: Vec<i64> = list.iter().map(|i| i.metadata.step).collect();
        assert_eq!(steps, vec![3, 4]);
    }

    /// **Scenario**: Unknown thread and missing thread_id.
    #[tokio::test]
    async fn unknown_thread_and_missing_thread_id() {
        let dir = tempfile::tempdir().unwrap();
        let s = saver(&dir);
        assert!(s
            .get_tuple(&RunnableConfig::for_thread("nope"))
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            s.get_tuple(&RunnableConfig::default()).await,
            Err(CheckpointError::ThreadIdRequired)
        ));
    }
}
