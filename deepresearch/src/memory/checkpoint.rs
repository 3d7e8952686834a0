//! Checkpoint and metadata types.
//!
//! A checkpoint is `(thread, step, state)` plus where the run goes next, so a
//! crashed or paused run can continue without replaying completed stages.

use serde::{Deserialize, Serialize};

use crate::graph::Interrupt;

/// Where the run continues from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointNext {
    /// Run this node next.
    Node { node: String },
    /// Re-evaluate the conditional router of `source` against the stored state.
    Route { source: String },
    /// Paused inside `node`; resume re-enters it with the caller's value.
    Interrupted { node: String, interrupt: Interrupt },
    /// The run finished.
    End,
}

impl CheckpointNext {
    pub fn node(id: impl Into<String>) -> Self {
        CheckpointNext::Node { node: id.into() }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, CheckpointNext::End)
    }
}

/// Source of the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Written before the first stage runs.
    #[default]
    Input,
    /// Written after a superstep.
    Loop,
    /// Written when a stage pauses.
    Interrupt,
    /// Written as fan-out dispatches finish; carries their updates.
    Pending,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointSource::Input => "input",
            CheckpointSource::Loop => "loop",
            CheckpointSource::Interrupt => "interrupt",
            CheckpointSource::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "input" => CheckpointSource::Input,
            "interrupt" => CheckpointSource::Interrupt,
            "pending" => CheckpointSource::Pending,
            _ => CheckpointSource::Loop,
        }
    }
}

/// Metadata for a single checkpoint (source, step, created_at, parent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// -1 for input, 0 for the first superstep, and so on.
    pub step: i64,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Id of the checkpoint this one follows, if any.
    pub parent_id: Option<String>,
}

/// Update of one fan-out dispatch that finished before the superstep did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Position of the dispatch in the router's `Send` list.
    pub task_index: usize,
    pub node: String,
    /// The serialized update (success or failure).
    pub update: serde_json::Value,
}

/// Snapshot of a thread at one step.
#[derive(Debug, Clone)]
pub struct Checkpoint<S> {
    pub id: String,
    /// RFC 3339 timestamp.
    pub ts: String,
    pub state: S,
    pub next: CheckpointNext,
    pub metadata: CheckpointMetadata,
    /// Finished dispatches of the in-flight fan-out named by `next`, in arrival order.
    /// Empty outside a fan-out.
    pub pending_writes: Vec<PendingWrite>,
}

impl<S> Checkpoint<S> {
    /// Creates a checkpoint with a fresh v4 id and the current time.
    pub fn new(
        state: S,
        next: CheckpointNext,
        source: CheckpointSource,
        step: i64,
        parent_id: Option<String>,
    ) -> Self {
        let ts = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: ts.clone(),
            state,
            next,
            metadata: CheckpointMetadata {
                source,
                step,
                created_at: ts,
                parent_id,
            },
            pending_writes: Vec::new(),
        }
    }

    pub fn with_pending_writes(mut self, writes: Vec<PendingWrite>) -> Self {
        self.pending_writes = writes;
        self
    }
}

/// Entry returned by `Checkpointer::list`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointListItem {
    pub checkpoint_id: String,
    pub metadata: CheckpointMetadata,
}
