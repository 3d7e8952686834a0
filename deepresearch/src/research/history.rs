//! Finished conversations in the long-term store, namespaced per user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::{Namespace, Store, StoreError};

use super::model::{Finding, ResearchBrief};

/// A finished research conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub user_query: String,
    #[serde(default)]
    pub research_brief: Option<ResearchBrief>,
    /// Aggregated findings.
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub report_content: String,
    /// RFC 3339.
    pub created_at: String,
}

/// Listing entry of `ConversationStore::list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub user_query: String,
    pub created_at: String,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            conversation_id: record.conversation_id.clone(),
            user_query: record.user_query.clone(),
            created_at: record.created_at.clone(),
        }
    }
}

fn namespace(user_id: &str) -> Namespace {
    vec![user_id.to_string(), "conversations".to_string()]
}

/// Per-user conversation records. Implemented for every `Store`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn put_conversation(
        &self,
        user_id: &str,
        record: &ConversationRecord,
    ) -> Result<(), StoreError>;

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Newest first, at most `limit`.
    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError>;
}

#[async_trait]
impl<T> ConversationStore for T
where
    T: Store + ?Sized,
{
    async fn put_conversation(
        &self,
        user_id: &str,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.put(&namespace(user_id), &record.conversation_id, &value)
            .await
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        match self.get(&namespace(user_id), conversation_id).await? {
            Some(item) => Ok(Some(serde_json::from_value(item.value)?)),
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let items = self.list(&namespace(user_id), limit).await?;
        let mut summaries = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<ConversationRecord>(item.value) {
                Ok(record) => summaries.push(ConversationSummary::from(&record)),
                Err(e) => tracing::warn!(key = %item.key, error = %e, "skipping unreadable conversation"),
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::InMemoryStore;

    fn record(id: &str) -> ConversationRecord {
        ConversationRecord {
            conversation_id: id.into(),
            user_query: format!("query {}", id),
            research_brief: None,
            findings: Vec::new(),
            report_content: "# r".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    /// **Scenario**: Records are scoped by user and listed newest first.
    #[tokio::test]
    async fn put_get_list_per_user() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store.put_conversation("alice", &record("c1")).await.unwrap();
        store.put_conversation("alice", &record("c2")).await.unwrap();
        store.put_conversation("bob", &record("c3")).await.unwrap();

        let got = store.get_conversation("alice", "c1").await.unwrap();
        assert_eq!(got, Some(record("c1")));
        assert_eq!(store.get_conversation("bob", "c1").await.unwrap(), None);

        let listed = store.list_conversations("alice", 10).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
        assert_eq!(store.list_conversations("alice", 1).await.unwrap().len(), 1);
    }
}
