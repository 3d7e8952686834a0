//! Scope stage: turns the user conversation into a research brief, or asks clarifying
//! questions and ends the run until the user answers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StageError;
use crate::graph::{Next, Node, Route};

use super::collaborators::{CollaboratorError, ScopeClarifier};
use super::model::{Message, ResearchBrief, Role};
use super::state::{StateUpdate, WorkflowState};
use super::{SCOPE, SUPERVISOR};

pub struct ScopeNode {
    clarifier: Arc<dyn ScopeClarifier>,
}

impl ScopeNode {
    pub fn new(clarifier: Arc<dyn ScopeClarifier>) -> Self {
        Self { clarifier }
    }

    async fn clarify(
        &self,
        user_query: &str,
        history: &[Message],
    ) -> Result<StateUpdate, CollaboratorError> {
        let check = self.clarifier.check_completion(user_query, history).await?;
        tracing::debug!(is_complete = check.is_complete, reasoning = %check.reasoning, "scope check");

        if check.is_complete {
            let brief = self.clarifier.generate_brief(user_query, history).await?;
            tracing::info!(scope = %brief.scope, sub_topics = brief.sub_topics.len(), "research brief created");
            return Ok(StateUpdate {
                messages: vec![Message::assistant(brief_message(&brief))],
                brief: Some(brief),
                ..Default::default()
            });
        }

        let clarification = self
            .clarifier
            .clarification_questions(user_query, history)
            .await?;
        Ok(StateUpdate {
            messages: vec![Message::assistant(clarification.to_message())],
            ..Default::default()
        })
    }
}

fn brief_message(brief: &ResearchBrief) -> String {
    let mut text = format!(
        "Research brief created. Proceeding with research on: {}",
        brief.scope
    );
    if !brief.sub_topics.is_empty() {
        text.push_str("\n\nSub-topics:");
        for topic in &brief.sub_topics {
            text.push_str("\n- ");
            text.push_str(topic);
        }
    }
    text
}

#[async_trait]
impl Node<WorkflowState> for ScopeNode {
    fn id(&self) -> &str {
        SCOPE
    }

    async fn run(&self, state: WorkflowState) -> Result<(StateUpdate, Next), StageError> {
        if state.brief.is_some() {
            return Ok((StateUpdate::default(), Next::Continue));
        }
        if !state.messages.iter().any(|m| m.role == Role::User) {
            return Ok((
                StateUpdate {
                    messages: vec![Message::assistant("Error: No user query provided.")],
                    ..Default::default()
                },
                Next::Continue,
            ));
        }
        let user_query = state.user_query().unwrap_or_default().to_string();
        let history = state.messages.get(1..).unwrap_or_default();

        let update = match self.clarify(&user_query, history).await {
            Ok(update) => update,
            Err(e) => {
                tracing::error!(error = %e, "scope clarification failed");
                StateUpdate {
                    messages: vec![Message::assistant(format!(
                        "Error processing your request: {}",
                        e
                    ))],
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        };
        Ok((update, Next::Continue))
    }
}

/// After scope: research once a brief exists, otherwise wait for the user.
pub fn route_after_scope(state: &WorkflowState) -> Route<WorkflowState> {
    if state.brief.is_some() {
        Route::to(SUPERVISOR)
    } else {
        Route::End
    }
}
