//! In-memory checkpointer (MemorySaver). Not persistent; for dev and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::checkpoint::{Checkpoint, CheckpointListItem};
use crate::memory::checkpointer::{window, CheckpointError, Checkpointer};
use crate::memory::config::RunnableConfig;

/// In-memory checkpointer. Key: (thread_id, checkpoint_ns); each thread has a list of
/// checkpoints, newest last.
///
/// **Interaction**: Used as `Arc<dyn Checkpointer<S>>` in `StateGraph::compile_with_checkpointer`.
pub struct MemorySaver<S> {
    by_thread: Arc<RwLock<HashMap<String, Vec<Checkpoint<S>>>>>,
}

impl<S> MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            by_thread: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn thread_key(config: &RunnableConfig) -> Result<String, CheckpointError> {
        let thread_id = config
            .thread_id
            .as_deref()
            .ok_or(CheckpointError::ThreadIdRequired)?;
        Ok(format!("{}:{}", thread_id, config.checkpoint_ns))
    }
}

impl<S> Default for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn put(
        &self,
        config: &RunnableConfig,
        checkpoint: &Checkpoint<S>,
    ) -> Result<String, CheckpointError> {
        let key = Self::thread_key(config)?;
        let mut guard = self.by_thread.write().await;
        let list = guard.entry(key).or_default();
        list.retain(|cp| cp.id != checkpoint.id);
        list.push(checkpoint.clone());
        Ok(checkpoint.id.clone())
    }

    async fn get_tuple(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let key = Self::thread_key(config)?;
        let guard = self.by_thread.read().await;
        let Some(list) = guard.get(&key) else {
            return Ok(None);
        };
        Ok(match &config.checkpoint_id {
            Some(cid) => list.iter().find(|cp| &cp.id == cid).cloned(),
            None => list.last().cloned(),
        })
    }

    async fn list(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        let key = Self::thread_key(config)?;
        let guard = self.by_thread.read().await;
        let items = guard
            .get(&key)
            .map(|list| {
                list.iter()
                    .map(|cp| CheckpointListItem {
                        checkpoint_id: cp.id.clone(),
                        metadata: cp.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(window(items, limit, before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::checkpoint::{CheckpointNext, CheckpointSource};

    fn cp(state: i32, step: i64) -> Checkpoint<i32> {
        Checkpoint::new(state, CheckpointNext::End, CheckpointSource::Loop, step, None)
    }

    /// **Scenario**: put without thread_id fails with ThreadIdRequired.
    #[tokio::test]
    async fn put_requires_thread_id() {
        let saver = MemorySaver::<i32>::new();
        let err = saver
            .put(&RunnableConfig::default(), &cp(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::ThreadIdRequired));
    }

    /// **Scenario**: get_tuple returns the latest by default and a specific one by id.
    #[tokio::test]
    async fn get_tuple_latest_and_by_id() {
        let saver = MemorySaver::<i32>::new();
        let config = RunnableConfig::for_thread("t1");
        let first = cp(1, 0);
        let second = cp(2, 1);
        saver.put(&config, &first).await.unwrap();
        saver.put(&config, &second).await.unwrap();

        let latest = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(latest.state, 2);

        let by_id = saver
            .get_tuple(&config.clone().with_checkpoint(first.id.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.state, 1);
    }

    /// **Scenario**: Threads are isolated; an unknown thread yields None and an empty list.
    #[tokio::test]
    async fn threads_are_isolated() {
        let saver = MemorySaver::<i32>::new();
        saver
            .put(&RunnableConfig::for_thread("a"), &cp(1, 0))
            .await
            .unwrap();
        let other = RunnableConfig::for_thread("b");
        assert!(saver.get_tuple(&other).await.unwrap().is_none());
        assert!(saver.list(&other, None, None, None).await.unwrap().is_empty());
    }

    /// **Scenario**: list returns checkpoints oldest first with their steps.
    #[tokio::test]
    async fn list_oldest_first() {
        let saver = MemorySaver::<i32>::new();
        let config = RunnableConfig::for_thread("t");
        for step in 0..3 {
            saver.put(&config, &cp(step as i32, step)).await.unwrap();
        }
        let list = saver.list(&config, None, None, None).await.unwrap();
        let steps: Vec<i64> = list.iter().map(|i| i.metadata.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }
}
