//! Stage and engine error types.
//!
//! `StageError` is local to one stage invocation: the engine catches it at the
//! invocation boundary and turns it into state. `EngineError` is an engine-level
//! invariant violation and is the only error a caller of the engine ever sees.

use std::time::Duration;

use thiserror::Error;

use crate::graph::GraphInterrupt;
use crate::memory::CheckpointError;

/// Failure of a single stage invocation.
///
/// Returned by `Node::run`. Never unwinds past the engine: the compiled graph converts
/// it into a state update via `GraphState::failure_update` and a fallback route.
#[derive(Debug, Error)]
pub enum StageError {
    /// Execution failed with a message (e.g. malformed input, missing brief).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// An external collaborator (model, tool, store) failed or returned garbage.
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// The stage exceeded its time budget.
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),

    /// The stage task panicked.
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// The stage paused for external input (human-in-the-loop).
    ///
    /// Outside a fan-out the engine checkpoints and returns `RunOutcome::Interrupted`;
    /// inside a fan-out it is treated as a failure of that dispatch.
    #[error("graph interrupted: {0}")]
    Interrupted(GraphInterrupt),
}

impl From<GraphInterrupt> for StageError {
    fn from(interrupt: GraphInterrupt) -> Self {
        StageError::Interrupted(interrupt)
    }
}

/// Engine-level failure surfaced to the caller. No partial state is returned with it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("empty graph")]
    EmptyGraph,

    #[error("thread_id required")]
    ThreadIdRequired,

    /// Resume was requested for a thread with no checkpoint.
    #[error("unknown thread: {0}")]
    UnknownThread(String),

    /// Resume token does not name the latest checkpoint; it was already consumed.
    #[error("stale checkpoint {requested} for thread {thread_id} (latest is {latest})")]
    StaleCheckpoint {
        thread_id: String,
        requested: String,
        latest: String,
    },

    /// Resume value supplied but the thread is not paused.
    #[error("thread {0} is not waiting for input")]
    NotInterrupted(String),

    /// New input supplied while the thread is paused at an interrupt.
    #[error("thread {0} is waiting for review; resume it instead")]
    ThreadBusy(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Fan-out targets resolved to different successors after fan-in.
    #[error("fan-in successors diverge: {0:?}")]
    DivergentFanIn(Vec<String>),

    #[error("step limit {0} exceeded")]
    StepLimitExceeded(usize),

    #[error("run cancelled")]
    Cancelled,

    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
}
