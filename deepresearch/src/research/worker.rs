//! Worker stage: executes one task from its narrowed state.
//!
//! Holds a tool lease for the whole invocation; the lease is released on every
//! exit path, including timeout and panic, because dropping it releases the tools.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StageError;
use crate::graph::{Next, Node};

use super::collaborators::{CitationExtractor, ExecutionOutput, TaskExecutor, ToolRegistry};
use super::delegation::parse_delegation;
use super::model::Task;
use super::state::{StateUpdate, WorkflowState};
use super::WORKER;

pub struct WorkerNode {
    tools: Arc<dyn ToolRegistry>,
    executor: Arc<dyn TaskExecutor>,
    extractor: Arc<dyn CitationExtractor>,
    /// Used when the brief enables no sources.
    default_sources: Vec<String>,
}

impl WorkerNode {
    pub fn new(
        tools: Arc<dyn ToolRegistry>,
        executor: Arc<dyn TaskExecutor>,
        extractor: Arc<dyn CitationExtractor>,
        default_sources: Vec<String>,
    ) -> Self {
        Self {
            tools,
            executor,
            extractor,
            default_sources,
        }
    }
}

fn failed(task: &Task, reason: impl std::fmt::Display, searches_used: u32) -> StateUpdate {
    tracing::warn!(task_id = %task.id, %reason, "task failed");
    StateUpdate {
        failed: vec![task.id.clone()],
        errors: vec![format!("Task {} failed: {}", task.id, reason)],
        searches_used,
        ..Default::default()
    }
}

fn count_searches(output: &ExecutionOutput) -> u32 {
    output
        .tool_results
        .iter()
        .filter(|r| r.tool.to_lowercase().contains("search"))
        .count() as u32
}

fn raw_text(output: &ExecutionOutput) -> String {
    output
        .tool_results
        .iter()
        .map(|r| format!("[Source: {}]\n{}", r.tool, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Node<WorkflowState> for WorkerNode {
    fn id(&self) -> &str {
        WORKER
    }

    async fn run(&self, state: WorkflowState) -> Result<(StateUpdate, Next), StageError> {
        let Some(task) = state.active_task.clone() else {
            return Err(StageError::ExecutionFailed(
                "worker dispatched without a task".into(),
            ));
        };
        if state.completed.contains(&task.id) || state.failed.contains(&task.id) {
            tracing::debug!(task_id = %task.id, "task already finished; skipping");
            return Ok((StateUpdate::default(), Next::Continue));
        }

        let sources = match state.brief.as_ref() {
            Some(brief) if !brief.enabled_sources.is_empty() => brief.enabled_sources.clone(),
            _ => self.default_sources.clone(),
        };
        let lease = match self.tools.acquire(&sources).await {
            Ok(lease) if !lease.tools.is_empty() => lease,
            Ok(_) => return Ok((failed(&task, "No tools available", 0), Next::Continue)),
            Err(e) => return Ok((failed(&task, e, 0), Next::Continue)),
        };
        tracing::debug!(task_id = %task.id, tools = lease.tools.len(), "executing task");

        let output = match self
            .executor
            .execute(&task, &lease.tools, state.budget.max_searches_per_worker)
            .await
        {
            Ok(output) => output,
            Err(e) => return Ok((failed(&task, e, 0), Next::Continue)),
        };
        let searches_used = count_searches(&output);
        if output.tool_results.is_empty() {
            return Ok((
                failed(&task, "No tool results", searches_used),
                Next::Continue,
            ));
        }

        let findings = match self.extractor.extract(&raw_text(&output), &task.topic).await {
            Ok(findings) => findings,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "citation extraction failed");
                Vec::new()
            }
        };

        let delegated: Vec<Task> = parse_delegation(&task.id, &output.output, task.priority)
            .into_iter()
            .filter(|t| !state.task_history.iter().any(|known| known.id == t.id))
            .collect();
        if let Some(t) = delegated.first() {
            tracing::info!(task_id = %task.id, delegated = %t.id, "delegation requested");
        }
        tracing::info!(
            task_id = %task.id,
            findings = findings.len(),
            searches_used,
            "task completed"
        );
        drop(lease);

        Ok((
            StateUpdate {
                findings,
                task_history: delegated,
                completed: vec![task.id],
                searches_used,
                ..Default::default()
            },
            Next::Continue,
        ))
    }
}
