//! Invoke config: thread_id, checkpoint_id, checkpoint_ns, user_id.
//!
//! Used by `CompiledStateGraph::invoke` / `resume` and every `Checkpointer` call.

/// Config for a single run. Identifies the thread and optional checkpoint.
///
/// When using a checkpointer, a run must provide at least `thread_id`. On resume,
/// `checkpoint_id` acts as the resume token: it must name the latest checkpoint.
#[derive(Debug, Clone, Default)]
pub struct RunnableConfig {
    /// Unique id for this conversation/thread. Required when using a checkpointer.
    pub thread_id: Option<String>,
    /// Resume token / explicit checkpoint to load instead of the latest.
    pub checkpoint_id: Option<String>,
    /// Optional namespace for checkpoints. Default is empty.
    pub checkpoint_ns: String,
    /// Optional user id; used for the long-term conversation store namespace.
    pub user_id: Option<String>,
}

impl RunnableConfig {
    /// Config for a thread with no explicit checkpoint.
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}
