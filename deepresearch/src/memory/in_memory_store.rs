//! In-memory Store. Not persistent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::store::{Item, Namespace, Store, StoreError};

/// Key for the inner map: namespace joined by "\0", then key.
fn map_key(namespace: &Namespace, key: &str) -> String {
    format!("{}\0{}", namespace.join("\0"), key)
}

/// In-memory Store. Not persistent.
///
/// Each entry carries a write sequence number so `list` is newest first even when
/// two writes share a timestamp.
///
/// **Interaction**: Used as `Arc<dyn Store>` through `ConversationStore` in tests and
/// by the CLI's `--in-memory` mode.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<HashMap<String, (u64, Item)>>>,
    seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let k = map_key(namespace, key);
        match guard.get_mut(&k) {
            Some((entry_seq, item)) => {
                item.value = value.clone();
                item.updated_at = SystemTime::now();
                *entry_seq = seq;
            }
            None => {
                guard.insert(
                    k,
                    (
                        seq,
                        Item::new(namespace.clone(), key.to_string(), value.clone()),
                    ),
                );
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.get(&map_key(namespace, key)).map(|(_, item)| item.clone()))
    }

    async fn list(&self, namespace: &Namespace, limit: usize) -> Result<Vec<Item>, StoreError> {
        let guard = self.inner.read().await;
        let mut items: Vec<&(u64, Item)> = guard
            .values()
            .filter(|(_, item)| &item.namespace == namespace)
            .collect();
        items.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(items
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }
}
