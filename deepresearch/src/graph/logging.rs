//! Logging utilities for graph execution.
//!
//! Structured `tracing` events for node execution, fan-out/fan-in, stage failures,
//! and run start/finish.

use std::fmt::Debug;

use crate::error::{EngineError, StageError};

use super::Next;

pub fn log_node_start(node_id: &str, task_index: Option<usize>) {
    tracing::debug!(node_id = node_id, ?task_index, "Starting node execution");
}

/// Log the state a node receives.
pub fn log_node_state<S: Debug>(node_id: &str, state: &S) {
    tracing::trace!(node_id = node_id, state = ?state, "Node execution: state");
}

pub fn log_node_complete(node_id: &str, next: &Next) {
    tracing::debug!(node_id = node_id, ?next, "Node execution complete");
}

pub fn log_fan_out(from: &str, targets: &[String]) {
    tracing::debug!(from = from, count = targets.len(), ?targets, "Fan-out");
}

/// Log one result arriving at the fan-in.
pub fn log_fan_in(node_id: &str, task_index: usize, arrived: usize, total: usize) {
    tracing::debug!(node_id, task_index, arrived, total, "Fan-in result");
}

/// Log a stage failure caught at the invocation boundary.
pub fn log_stage_failure(node_id: &str, task_index: Option<usize>, error: &StageError) {
    tracing::error!(node_id = node_id, ?task_index, %error, "Stage failed");
}

pub fn log_graph_start(thread_id: Option<&str>) {
    tracing::info!(thread_id = ?thread_id, "Starting graph execution");
}

pub fn log_graph_complete(thread_id: Option<&str>, steps: i64) {
    tracing::info!(thread_id = ?thread_id, steps, "Graph execution complete");
}

pub fn log_graph_interrupted(thread_id: Option<&str>, node_id: &str) {
    tracing::info!(thread_id = ?thread_id, node_id, "Graph execution paused");
}

pub fn log_graph_error(error: &EngineError) {
    tracing::error!(?error, "Graph execution error");
}
