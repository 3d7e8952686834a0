//! `ResearchRunner`: the boundary the CLI (or any front end) talks to.
//!
//! `start` and `resume` return a stream of events naming the stage that ran and the
//! fields it changed. Runs are persisted per thread through the checkpointer, so a
//! review pause survives restarts. Approved runs are archived in the long-term store.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::EngineError;
use crate::graph::{CompilationError, CompiledStateGraph, RunContext, RunOutcome, StateSnapshot};
use crate::memory::{CheckpointNext, Checkpointer, RunnableConfig, Store, StoreError};
use crate::stream::{StreamEvent, StreamMode};

use super::aggregate::aggregate;
use super::collaborators::Collaborators;
use super::config::ResearchConfig;
use super::graph::build_research_graph_with_checkpointer;
use super::history::{ConversationRecord, ConversationStore, ConversationSummary};
use super::model::{Message, ReviewDecision};
use super::state::WorkflowState;

/// Event type streamed by the runner.
pub type ResearchEvent = StreamEvent<WorkflowState>;

pub struct ResearchRunner {
    graph: CompiledStateGraph<WorkflowState>,
    store: Option<Arc<dyn Store>>,
    config: ResearchConfig,
    stream_modes: HashSet<StreamMode>,
}

impl ResearchRunner {
    pub fn new(
        collaborators: Collaborators,
        config: ResearchConfig,
        checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
        store: Option<Arc<dyn Store>>,
    ) -> Result<Self, CompilationError> {
        let graph = build_research_graph_with_checkpointer(collaborators, &config, checkpointer)?;
        Ok(Self {
            graph,
            store,
            config,
            stream_modes: HashSet::from([StreamMode::Updates]),
        })
    }

    /// Replaces the default `Updates` stream mode.
    pub fn with_stream_modes(mut self, modes: impl IntoIterator<Item = StreamMode>) -> Self {
        self.stream_modes = modes.into_iter().collect();
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    fn thread_config(&self, thread_id: &str) -> RunnableConfig {
        RunnableConfig::for_thread(thread_id).with_user(self.config.user_id.clone())
    }

    /// Starts (or continues) a conversation with a user message.
    ///
    /// A new thread starts fresh. A thread whose scope stage is still asking
    /// questions gets the message appended and re-runs from the start; a thread
    /// that already has a brief starts a new research run. Fails with `ThreadBusy`
    /// while the thread waits for review.
    pub async fn start(
        &self,
        user_message: &str,
        thread_id: Option<String>,
    ) -> Result<(String, ReceiverStream<ResearchEvent>), EngineError> {
        let thread_id = thread_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let config = self.thread_config(&thread_id);

        let state = match self.graph.get_state(&config).await? {
            Some(snapshot) if matches!(snapshot.next, CheckpointNext::Interrupted { .. }) => {
                return Err(EngineError::ThreadBusy(thread_id));
            }
            Some(snapshot) if snapshot.state.brief.is_none() => {
                let mut state = snapshot.state;
                state.messages.push(Message::user(user_message));
                state
            }
            _ => WorkflowState::new(self.config.budget(), user_message),
        };
        tracing::info!(thread_id = %thread_id, "starting research run");

        let (tx, rx) = mpsc::channel(128);
        let ctx = RunContext::new(config).with_stream(tx.clone(), self.stream_modes.clone());
        let graph = self.graph.clone();
        let archive = self.archiver(thread_id.clone());
        tokio::spawn(async move {
            let result = graph.invoke_with_context(state, ctx).await;
            archive.after_run(result, &tx).await;
        });
        Ok((thread_id, ReceiverStream::new(rx)))
    }

    /// Resumes a thread paused for review with the reviewer's decision.
    pub async fn resume(
        &self,
        thread_id: &str,
        decision: ReviewDecision,
    ) -> Result<ReceiverStream<ResearchEvent>, EngineError> {
        let config = self.thread_config(thread_id);
        let snapshot = self
            .graph
            .get_state(&config)
            .await?
            .ok_or_else(|| EngineError::UnknownThread(thread_id.to_string()))?;
        if !matches!(snapshot.next, CheckpointNext::Interrupted { .. }) {
            return Err(EngineError::NotInterrupted(thread_id.to_string()));
        }
        let value = serde_json::to_value(&decision).map_err(|e| {
            EngineError::Checkpoint(crate::memory::CheckpointError::Serialization(e.to_string()))
        })?;
        tracing::info!(thread_id = %thread_id, action = ?decision.action, "resuming after review");

        let (tx, rx) = mpsc::channel(128);
        let ctx = RunContext::new(config.with_checkpoint(snapshot.checkpoint_id))
            .with_resume_value(value)
            .with_stream(tx.clone(), self.stream_modes.clone());
        let graph = self.graph.clone();
        let archive = self.archiver(thread_id.to_string());
        tokio::spawn(async move {
            let result = graph.resume_with_context(ctx).await;
            archive.after_run(result, &tx).await;
        });
        Ok(ReceiverStream::new(rx))
    }

    /// Latest persisted state of a thread.
    pub async fn state(
        &self,
        thread_id: &str,
    ) -> Result<Option<StateSnapshot<WorkflowState>>, EngineError> {
        self.graph.get_state(&self.thread_config(thread_id)).await
    }

    /// Checkpoint history of a thread, oldest first.
    pub async fn state_history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StateSnapshot<WorkflowState>>, EngineError> {
        self.graph
            .state_history(&self.thread_config(thread_id), limit)
            .await
    }

    /// Archived conversations of a user, newest first. Empty without a store.
    pub async fn history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        match &self.store {
            Some(store) => store.list_conversations(user_id, limit).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        match &self.store {
            Some(store) => store.get_conversation(user_id, conversation_id).await,
            None => Ok(None),
        }
    }

    fn archiver(&self, thread_id: String) -> Archiver {
        Archiver {
            store: self.store.clone(),
            user_id: self.config.user_id.clone(),
            thread_id,
        }
    }
}

/// Saves a finished, reviewed run to the long-term store.
struct Archiver {
    store: Option<Arc<dyn Store>>,
    user_id: String,
    thread_id: String,
}

impl Archiver {
    async fn after_run(
        &self,
        result: Result<RunOutcome<WorkflowState>, EngineError>,
        tx: &mpsc::Sender<ResearchEvent>,
    ) {
        let Ok(RunOutcome::Completed(state)) = result else {
            return;
        };
        let Some(store) = &self.store else {
            return;
        };
        if state.brief.is_none() || state.report_content.is_empty() {
            return;
        }
        let record = ConversationRecord {
            conversation_id: self.thread_id.clone(),
            user_query: state.user_query().unwrap_or_default().to_string(),
            research_brief: state.brief.clone(),
            findings: aggregate(&state.findings),
            report_content: state.report_content.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        match store.put_conversation(&self.user_id, &record).await {
            Ok(()) => tracing::info!(thread_id = %self.thread_id, "conversation archived"),
            Err(e) => {
                tracing::error!(thread_id = %self.thread_id, error = %e, "failed to archive conversation");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: format!("failed to archive conversation: {}", e),
                    })
                    .await;
            }
        }
    }
}
