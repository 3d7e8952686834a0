//! Shared workflow state and its partial update.
//!
//! Merge policies per field:
//!
//! | field | policy |
//! |---|---|
//! | findings, task_history, completed, failed, errors, messages | Append |
//! | budget.searches_used (via `searches_used`) | Sum |
//! | brief, budget, gaps, is_complete, report_content, reviewer_feedback | LastWriterWins |

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StageError;
use crate::graph::{GraphState, MergePolicy};

use super::model::{pending_tasks, Budget, Finding, Gaps, Message, ResearchBrief, Task};
use super::{REPORT, SUPERVISOR};

/// Per-field merge policy of `WorkflowState`.
pub const MERGE_POLICIES: &[(&str, MergePolicy)] = &[
    ("brief", MergePolicy::LastWriterWins),
    ("findings", MergePolicy::Append),
    ("task_history", MergePolicy::Append),
    ("completed", MergePolicy::Append),
    ("failed", MergePolicy::Append),
    ("budget", MergePolicy::LastWriterWins),
    ("searches_used", MergePolicy::Sum),
    ("gaps", MergePolicy::LastWriterWins),
    ("is_complete", MergePolicy::LastWriterWins),
    ("errors", MergePolicy::Append),
    ("messages", MergePolicy::Append),
    ("report_content", MergePolicy::LastWriterWins),
    ("reviewer_feedback", MergePolicy::LastWriterWins),
];

/// The single shared record threaded through every stage of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub brief: Option<ResearchBrief>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub task_history: Vec<Task>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub gaps: Option<Gaps>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub report_content: String,
    #[serde(default)]
    pub reviewer_feedback: Option<String>,
    /// Set only in the narrowed state handed to one worker dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<Task>,
}

impl WorkflowState {
    /// Fresh conversation with the given budget and first user message.
    pub fn new(budget: Budget, user_message: impl Into<String>) -> Self {
        Self {
            budget,
            messages: vec![Message::user(user_message)],
            ..Default::default()
        }
    }

    /// Tasks not yet completed or failed.
    pub fn pending_tasks(&self) -> Vec<&Task> {
        pending_tasks(&self.task_history, &self.completed, &self.failed)
    }

    /// Narrowed copy for one worker dispatch.
    pub fn for_task(&self, task: &Task) -> Self {
        Self {
            active_task: Some(task.clone()),
            ..self.clone()
        }
    }

    /// First user message of the conversation.
    pub fn user_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == super::model::Role::User)
            .map(|m| m.content.as_str())
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// `null` is a write that clears the field; an absent key is no write.
fn clearable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Partial update returned by a stage. Empty fields mean "not written".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brief: Option<ResearchBrief>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_history: Vec<Task>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    /// Delta added to `budget.searches_used`.
    #[serde(skip_serializing_if = "is_zero")]
    pub searches_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gaps: Option<Gaps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_content: Option<String>,
    /// `Some(None)` clears the feedback.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "clearable"
    )]
    pub reviewer_feedback: Option<Option<String>>,
}

impl StateUpdate {
    /// True when this update writes the named field.
    pub fn writes(&self, field: &str) -> bool {
        match field {
            "brief" => self.brief.is_some(),
            "findings" => !self.findings.is_empty(),
            "task_history" => !self.task_history.is_empty(),
            "completed" => !self.completed.is_empty(),
            "failed" => !self.failed.is_empty(),
            "budget" => self.budget.is_some(),
            "searches_used" => self.searches_used != 0,
            "gaps" => self.gaps.is_some(),
            "is_complete" => self.is_complete.is_some(),
            "errors" => !self.errors.is_empty(),
            "messages" => !self.messages.is_empty(),
            "report_content" => self.report_content.is_some(),
            "reviewer_feedback" => self.reviewer_feedback.is_some(),
            _ => false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Default::default()
        }
    }
}

impl GraphState for WorkflowState {
    type Update = StateUpdate;

    fn apply(&mut self, update: &StateUpdate) {
        if let Some(brief) = &update.brief {
            self.brief = Some(brief.clone());
        }
        self.findings.extend(update.findings.iter().cloned());
        self.task_history.extend(update.task_history.iter().cloned());
        self.completed.extend(update.completed.iter().cloned());
        self.failed.extend(update.failed.iter().cloned());
        if let Some(budget) = update.budget {
            self.budget = budget;
        }
        self.budget.searches_used = self.budget.searches_used.saturating_add(update.searches_used);
        if let Some(gaps) = &update.gaps {
            self.gaps = Some(gaps.clone());
        }
        if let Some(done) = update.is_complete {
            self.is_complete = done;
        }
        self.errors.extend(update.errors.iter().cloned());
        self.messages.extend(update.messages.iter().cloned());
        if let Some(report) = &update.report_content {
            self.report_content = report.clone();
        }
        if let Some(feedback) = &update.reviewer_feedback {
            self.reviewer_feedback = feedback.clone();
        }
    }

    /// A failed worker dispatch marks its task failed; a timed-out one is charged its
    /// full search allowance. A failed supervisor turn ends the loop so the report still runs.
    fn failure_update(node_id: &str, input: &Self, error: &StageError) -> StateUpdate {
        if let Some(task) = &input.active_task {
            let searches_used = match error {
                StageError::Timeout(_) => input.budget.max_searches_per_worker,
                _ => 0,
            };
            return StateUpdate {
                failed: vec![task.id.clone()],
                errors: vec![format!("Task {} failed: {}", task.id, error)],
                searches_used,
                ..Default::default()
            };
        }
        let mut update = StateUpdate::error(format!("{} failed: {}", node_id, error));
        match node_id {
            SUPERVISOR => {
                update.budget = Some(input.budget.advance());
                update.is_complete = Some(true);
            }
            REPORT => {
                update.report_content = Some(format!("Error generating report: {}", error));
            }
            _ => {}
        }
        update
    }

    fn conflicting_writes(updates: &[StateUpdate]) -> Vec<&'static str> {
        MERGE_POLICIES
            .iter()
            .filter(|(_, policy)| *policy == MergePolicy::LastWriterWins)
            .filter(|(field, _)| updates.iter().filter(|u| u.writes(field)).count() > 1)
            .map(|(field, _)| *field)
            .collect()
    }
}
