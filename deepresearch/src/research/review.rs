//! Review stage: the human-in-the-loop pause after the report.
//!
//! First entry pauses with `{"type": "review_request", "report": ...}`. On resume the
//! decision picks the route: approve ends, refine rewrites the report with feedback,
//! re_research queues one reviewer task and reopens the supervisor loop.

use async_trait::async_trait;
use serde_json::json;

use crate::error::StageError;
use crate::graph::{GraphInterrupt, Interrupt, Next, Node, RunContext};

use super::model::{Requester, ReviewAction, ReviewDecision, Task};
use super::state::{StateUpdate, WorkflowState};
use super::{REPORT, REVIEW, SUPERVISOR};

/// Topic of tasks the reviewer asks for.
pub const REVIEWER_TOPIC: &str = "user_requested";

#[derive(Default)]
pub struct ReviewNode;

impl ReviewNode {
    pub fn new() -> Self {
        Self
    }

    fn decide(decision: ReviewDecision) -> (StateUpdate, Next) {
        tracing::info!(action = ?decision.action, "review decision");
        match decision.action {
            ReviewAction::Approve | ReviewAction::Unknown => (StateUpdate::default(), Next::End),
            ReviewAction::Refine => (
                StateUpdate {
                    reviewer_feedback: Some(decision.feedback),
                    ..Default::default()
                },
                Next::Node(REPORT.to_string()),
            ),
            ReviewAction::ReResearch => {
                let id = format!("task_reviewer_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
                let query = decision
                    .feedback
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| "Additional research requested by reviewer".to_string());
                let task = Task::new(id, REVIEWER_TOPIC, query, 1, Requester::Reviewer);
                (
                    StateUpdate {
                        task_history: vec![task],
                        reviewer_feedback: Some(None),
                        is_complete: Some(false),
                        ..Default::default()
                    },
                    Next::Node(SUPERVISOR.to_string()),
                )
            }
        }
    }
}

#[async_trait]
impl Node<WorkflowState> for ReviewNode {
    fn id(&self) -> &str {
        REVIEW
    }

    /// Outside a resume there is no decision yet; pause.
    async fn run(&self, state: WorkflowState) -> Result<(StateUpdate, Next), StageError> {
        Err(GraphInterrupt(Interrupt::with_id(
            json!({"type": "review_request", "report": state.report_content}),
            REVIEW,
        ))
        .into())
    }

    async fn run_with_context(
        &self,
        state: WorkflowState,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<(StateUpdate, Next), StageError> {
        match &ctx.resume_value {
            Some(value) => Ok(Self::decide(ReviewDecision::from_value(value))),
            None => self.run(state).await,
        }
    }
}
