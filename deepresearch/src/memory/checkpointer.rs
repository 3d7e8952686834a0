//! Checkpointer trait and CheckpointError.
//!
//! Saves and loads checkpoints by (thread_id, checkpoint_ns, checkpoint_id).

use async_trait::async_trait;

use crate::memory::checkpoint::{Checkpoint, CheckpointListItem};
use crate::memory::config::RunnableConfig;

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("thread_id required")]
    ThreadIdRequired,
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Saves and loads checkpoints by (thread_id, checkpoint_ns, checkpoint_id).
///
/// Implementations: `MemorySaver` (in-memory), `SqliteSaver` (persistent).
///
/// **Interaction**: Injected at compile via `StateGraph::compile_with_checkpointer`;
/// the compiled graph writes one checkpoint per superstep and on every pause.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Persist a checkpoint for the thread. Returns the checkpoint id used.
    async fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Checkpoint<S>,
    ) -> Result<String, CheckpointError>;

    /// Load the latest checkpoint for the thread (or the one given by `config.checkpoint_id`).
    async fn get_tuple(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<Checkpoint<S>>, CheckpointError>;

    /// List checkpoints for the thread, oldest first. `limit` keeps the newest `limit`.
    async fn list(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError>;
}

/// Applies the shared `after` / `before` / `limit` window to an oldest-first list.
pub(crate) fn window(
    mut items: Vec<CheckpointListItem>,
    limit: Option<usize>,
    before: Option<&str>,
    after: Option<&str>,
) -> Vec<CheckpointListItem> {
    if let Some(a) = after {
        if let Some(pos) = items.iter().position(|i| i.checkpoint_id == a) {
            items = items.split_off(pos + 1);
        }
    }
    if let Some(b) = before {
        if let Some(pos) = items.iter().position(|i| i.checkpoint_id == b) {
            items.truncate(pos);
        }
    }
    if let Some(n) = limit {
        let len = items.len();
        if len > n {
            items = items.split_off(len - n);
        }
    }
    items
}
