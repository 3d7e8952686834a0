//! Streaming types for graph runs.
//!
//! Defines stream modes and events emitted by `CompiledStateGraph::stream` and
//! `ResearchRunner`. `Updates` carries only the partial update a stage returned,
//! so consumers see exactly the fields that stage changed.

use serde::Serialize;
use serde_json::{json, Value};

use crate::graph::{GraphState, Interrupt};

/// Stream mode selector: which kinds of events to emit.
///
/// `Interrupt` and `Error` events are always emitted regardless of mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// Emit full state after each superstep.
    Values,
    /// Emit the partial update of every stage invocation.
    Updates,
    /// Emit checkpoint events when checkpoints are written.
    Checkpoints,
    /// Emit task start/end events for each stage invocation.
    Tasks,
    /// Emit both checkpoints and tasks events.
    Debug,
}

/// Checkpoint event emitted when a checkpoint is written.
#[derive(Clone, Debug)]
pub struct CheckpointEvent<S> {
    pub checkpoint_id: String,
    pub timestamp: String,
    /// Step number (-1 for input, 0+ for supersteps).
    pub step: i64,
    pub state: S,
    pub thread_id: Option<String>,
}

/// Streamed event emitted while running a graph.
#[derive(Clone, Debug)]
pub enum StreamEvent<S>
where
    S: GraphState,
{
    /// Full state after a superstep is merged.
    Values(S),
    /// Partial update returned by one stage invocation. `task_index` is set for fan-out dispatches.
    Updates {
        node_id: String,
        task_index: Option<usize>,
        update: S::Update,
    },
    Checkpoint(CheckpointEvent<S>),
    TaskStart {
        node_id: String,
        task_index: Option<usize>,
    },
    TaskEnd {
        node_id: String,
        task_index: Option<usize>,
        /// Ok(()) for success, Err(message) for a stage failure.
        result: Result<(), String>,
    },
    /// A stage paused; the run stops here until resumed.
    Interrupt {
        node_id: String,
        interrupt: Interrupt,
    },
    /// Engine-level failure; the run stopped.
    Error { message: String },
}

impl<S> StreamEvent<S>
where
    S: GraphState + Serialize,
{
    /// JSON form used by the CLI's `--json` output (one object per event, `type` tagged).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            StreamEvent::Values(state) => json!({"type": "values", "state": state}),
            StreamEvent::Updates {
                node_id,
                task_index,
                update,
            } => json!({
                "type": "updates",
                "node_id": node_id,
                "task_index": task_index,
                "update": serde_json::to_value(update)?,
            }),
            StreamEvent::Checkpoint(cp) => json!({
                "type": "checkpoint",
                "checkpoint_id": cp.checkpoint_id,
                "timestamp": cp.timestamp,
                "step": cp.step,
                "thread_id": cp.thread_id,
            }),
            StreamEvent::TaskStart {
                node_id,
                task_index,
            } => json!({"type": "task_start", "node_id": node_id, "task_index": task_index}),
            StreamEvent::TaskEnd {
                node_id,
                task_index,
                result,
            } => json!({
                "type": "task_end",
                "node_id": node_id,
                "task_index": task_index,
                "error": result.as_ref().err(),
            }),
            StreamEvent::Interrupt { node_id, interrupt } => json!({
                "type": "interrupt",
                "node_id": node_id,
                "value": interrupt.value,
                "id": interrupt.id,
            }),
            StreamEvent::Error { message } => json!({"type": "error", "message": message}),
        })
    }
}
