//! Pause points for human-in-the-loop stages.
//!
//! A stage pauses by returning `StageError::Interrupted`. The engine persists the
//! interrupt inside the checkpoint (`CheckpointNext::Interrupted`) so the pause
//! survives process restarts; `CompiledStateGraph::resume` re-enters the same stage
//! with the resume value in `RunContext::resume_value`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload handed to the caller when a stage pauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// The payload exposed to the caller (any JSON value).
    pub value: serde_json::Value,
    /// Optional id for telling interrupts apart.
    pub id: Option<String>,
}

impl Interrupt {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value, id: None }
    }

    pub fn with_id(value: serde_json::Value, id: impl Into<String>) -> Self {
        Self {
            value,
            id: Some(id.into()),
        }
    }
}

/// Error raised by a stage that pauses.
#[derive(Debug, Clone, Error)]
#[error("graph interrupted: {0:?}")]
pub struct GraphInterrupt(pub Interrupt);

impl From<Interrupt> for GraphInterrupt {
    fn from(interrupt: Interrupt) -> Self {
        GraphInterrupt(interrupt)
    }
}
