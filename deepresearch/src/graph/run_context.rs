//! Run context passed into nodes.
//!
//! Holds the runnable config, the resume value (set only when re-entering a paused
//! stage), the cancellation token for the whole run, and the optional stream sender.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::memory::RunnableConfig;
use crate::stream::{StreamEvent, StreamMode};

use super::GraphState;

/// Run context passed into `Node::run_with_context`.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = RunContext::<WorkflowState>::new(config).with_resume_value(json!({"action": "approve"}));
/// let outcome = graph.resume_with_context(ctx).await?;
/// ```
#[derive(Clone)]
pub struct RunContext<S>
where
    S: GraphState,
{
    /// Config for the current run (thread_id, checkpoint_id, user_id).
    pub config: RunnableConfig,
    /// Value supplied by the caller when resuming a paused stage. `None` on a normal run.
    pub resume_value: Option<serde_json::Value>,
    /// Cancels the run at the next suspension point. Child tokens are handed to stages.
    pub cancel: CancellationToken,
    /// Optional sender for streaming events.
    pub stream_tx: Option<mpsc::Sender<StreamEvent<S>>>,
    /// Enabled stream modes.
    pub stream_mode: HashSet<StreamMode>,
}

impl<S> RunContext<S>
where
    S: GraphState,
{
    pub fn new(config: RunnableConfig) -> Self {
        Self {
            config,
            resume_value: None,
            cancel: CancellationToken::new(),
            stream_tx: None,
            stream_mode: HashSet::new(),
        }
    }

    pub fn with_resume_value(mut self, value: serde_json::Value) -> Self {
        self.resume_value = Some(value);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stream(
        mut self,
        tx: mpsc::Sender<StreamEvent<S>>,
        modes: impl Into<HashSet<StreamMode>>,
    ) -> Self {
        self.stream_tx = Some(tx);
        self.stream_mode = modes.into();
        self
    }

    /// True when any of `modes` is enabled (and a stream sender is attached).
    pub fn streams_any(&self, modes: &[StreamMode]) -> bool {
        self.stream_tx.is_some() && modes.iter().any(|m| self.stream_mode.contains(m))
    }

    /// Sends an event when a sender is attached. A dropped receiver is ignored.
    pub async fn emit(&self, event: StreamEvent<S>) {
        if let Some(tx) = &self.stream_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Context handed to one stage invocation: same config and stream, child cancel token.
    pub(crate) fn for_stage(&self) -> Self {
        Self {
            config: self.config.clone(),
            resume_value: self.resume_value.clone(),
            cancel: self.cancel.child_token(),
            stream_tx: self.stream_tx.clone(),
            stream_mode: self.stream_mode.clone(),
        }
    }
}
