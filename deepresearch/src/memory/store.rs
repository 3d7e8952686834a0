//! Store trait and StoreError for cross-thread (long-term) memory.
//!
//! A namespaced key/value store: `put`, `get`, `list`. The research workflow keeps
//! finished conversations under `[user_id, "conversations"]` (see
//! `research::history::ConversationStore`).

use std::time::SystemTime;

use async_trait::async_trait;

/// Namespace for Store: e.g. `[user_id, "conversations"]`.
pub type Namespace = Vec<String>;

/// Error for store operations. Backend errors are flattened to strings.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization: {0}")]
    Serialization(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("not found")]
    NotFound,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A stored value with its key, namespace, and timestamps.
#[derive(Debug, Clone)]
pub struct Item {
    pub value: serde_json::Value,
    pub key: String,
    pub namespace: Namespace,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Item {
    pub fn new(namespace: Namespace, key: String, value: serde_json::Value) -> Self {
        let now = SystemTime::now();
        Self {
            value,
            key,
            namespace,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Namespaced key/value store.
///
/// **Interaction**: `InMemoryStore` and `SqliteStore` implement it; `ResearchRunner`
/// writes a conversation record through `ConversationStore` when a run is approved.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace. Replacing keeps `created_at`.
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, StoreError>;

    /// Items in exactly `namespace`, most recently updated first, at most `limit`.
    async fn list(&self, namespace: &Namespace, limit: usize) -> Result<Vec<Item>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: serde_json errors convert into StoreError::Serialization.
    #[test]
    fn store_error_from_serde_json() {
        let err: StoreError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn item_new_sets_equal_timestamps() {
        let item = Item::new(vec!["u".into()], "k".into(), serde_json::json!(1));
        assert_eq!(item.created_at, item.updated_at);
        assert_eq!(item.namespace, vec!["u".to_string()]);
    }
}
