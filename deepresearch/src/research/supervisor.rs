//! Supervisor stage: one planning turn of the research loop.
//!
//! Each turn advances the budget by exactly one iteration, then either stops
//! (budget exhausted, analyzer failed, analyzer satisfied) or plans more tasks.
//! The router fans out one worker per pending task.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StageError;
use crate::graph::{Dispatch, Next, Node, Route};

use super::aggregate::findings_digest;
use super::collaborators::{GapAnalyzer, GapContext};
use super::model::Gaps;
use super::state::{StateUpdate, WorkflowState};
use super::{REPORT, SUPERVISOR, WORKER};

pub struct SupervisorNode {
    analyzer: Arc<dyn GapAnalyzer>,
}

impl SupervisorNode {
    pub fn new(analyzer: Arc<dyn GapAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Node<WorkflowState> for SupervisorNode {
    fn id(&self) -> &str {
        SUPERVISOR
    }

    async fn run(&self, state: WorkflowState) -> Result<(StateUpdate, Next), StageError> {
        if state.is_complete {
            tracing::debug!("research already complete; supervisor turn skipped");
            return Ok((StateUpdate::default(), Next::Continue));
        }

        let budget = state.budget.advance();
        let done = |mut update: StateUpdate| -> Result<(StateUpdate, Next), StageError> {
            update.budget = Some(budget);
            update.is_complete = Some(true);
            Ok((update, Next::Continue))
        };

        if budget.is_exhausted(state.findings.len()) {
            tracing::info!(
                iterations = budget.iterations,
                findings = state.findings.len(),
                "research budget exhausted"
            );
            return done(StateUpdate::default());
        }

        let Some(brief) = state.brief.clone() else {
            return done(StateUpdate::error(
                "Supervisor analysis failed: no research brief",
            ));
        };

        let context = GapContext {
            brief,
            findings_digest: findings_digest(&state.findings),
            total_findings: state.findings.len(),
            budget,
            completed: state.completed.clone(),
            failed: state.failed.clone(),
            pending: state.pending_tasks().into_iter().cloned().collect(),
            first_turn: state.budget.iterations == 0,
        };
        let analysis = match self.analyzer.analyze(context).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!(error = %e, "gap analysis failed");
                return done(StateUpdate::error(format!(
                    "Supervisor analysis failed: {}",
                    e
                )));
            }
        };

        let mut known: HashSet<String> = state.task_history.iter().map(|t| t.id.clone()).collect();
        let new_tasks: Vec<_> = analysis
            .new_tasks
            .into_iter()
            .filter(|t| known.insert(t.id.clone()))
            .collect();
        let is_complete = analysis.is_complete && !analysis.has_gaps;
        tracing::info!(
            iteration = budget.iterations,
            new_tasks = new_tasks.len(),
            is_complete,
            "supervisor turn"
        );

        Ok((
            StateUpdate {
                task_history: new_tasks,
                budget: Some(budget),
                is_complete: Some(is_complete),
                gaps: Some(Gaps {
                    has_gaps: analysis.has_gaps,
                    gaps_identified: analysis.gaps_identified,
                    reasoning: analysis.reasoning,
                }),
                ..Default::default()
            },
            Next::Continue,
        ))
    }
}

/// After a supervisor turn: one worker per pending task, or the report when there
/// is nothing left to do.
pub fn route_after_supervisor(state: &WorkflowState) -> Route<WorkflowState> {
    if state.is_complete {
        return Route::to(REPORT);
    }
    let pending = state.pending_tasks();
    if pending.is_empty() {
        tracing::debug!("no pending tasks; proceeding to report");
        return Route::to(REPORT);
    }
    Route::Send(
        pending
            .into_iter()
            .map(|task| Dispatch::new(WORKER, state.for_task(task)))
            .collect(),
    )
}
