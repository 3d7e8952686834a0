//! Contracts of the external collaborators the stages depend on.
//!
//! Models, search tools and extractors live behind these traits; the stages only
//! see structured results or a `CollaboratorError`. Scripted implementations for
//! offline runs and tests are in `research::mock`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::StageError;

use super::model::{Budget, Finding, Message, ReportFormat, ResearchBrief, Task};

/// Failure of an external collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// May succeed on retry (rate limit, network).
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
    /// Returned something that does not fit the expected shape.
    #[error("malformed output: {0}")]
    Malformed(String),
}

impl From<CollaboratorError> for StageError {
    fn from(e: CollaboratorError) -> Self {
        StageError::Collaborator(e.to_string())
    }
}

/// Whether the conversation so far pins down what to research.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeCheck {
    pub is_complete: bool,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clarification {
    pub context: String,
    pub questions: Vec<String>,
}

impl Clarification {
    /// Single assistant message: context, blank line, numbered questions.
    pub fn to_message(&self) -> String {
        let numbered: Vec<String> = self
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect();
        format!("{}\n\n{}", self.context, numbered.join("\n"))
    }
}

/// Turns a user conversation into a research brief or clarification questions.
#[async_trait]
pub trait ScopeClarifier: Send + Sync {
    async fn check_completion(
        &self,
        user_query: &str,
        history: &[Message],
    ) -> Result<ScopeCheck, CollaboratorError>;

    async fn clarification_questions(
        &self,
        user_query: &str,
        history: &[Message],
    ) -> Result<Clarification, CollaboratorError>;

    async fn generate_brief(
        &self,
        user_query: &str,
        history: &[Message],
    ) -> Result<ResearchBrief, CollaboratorError>;
}

/// Everything the gap analyzer sees in one supervisor turn.
#[derive(Debug, Clone)]
pub struct GapContext {
    pub brief: ResearchBrief,
    /// Compact view from `aggregate::findings_digest`.
    pub findings_digest: String,
    pub total_findings: usize,
    /// Budget after this turn's advance.
    pub budget: Budget,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Planned tasks not yet run (e.g. queued by a reviewer or a delegation).
    pub pending: Vec<Task>,
    /// True on the first supervisor turn; the analyzer should plan from the sub-topics.
    pub first_turn: bool,
}

/// Result of one gap analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapAnalysis {
    pub has_gaps: bool,
    pub is_complete: bool,
    pub gaps_identified: Vec<String>,
    pub new_tasks: Vec<Task>,
    pub reasoning: String,
}

#[async_trait]
pub trait GapAnalyzer: Send + Sync {
    async fn analyze(&self, context: GapContext) -> Result<GapAnalysis, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub brief: ResearchBrief,
    /// Aggregated findings, most credible first.
    pub findings: Vec<Finding>,
    pub format: ReportFormat,
    pub reviewer_feedback: Option<String>,
}

/// Writes the markdown report.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write(&self, request: ReportRequest) -> Result<String, CollaboratorError>;
}

/// A tool a worker may call. `name` is what tool results are attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolHandle {
    pub name: String,
    pub source: String,
}

impl ToolHandle {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Tools held by one worker. Released when dropped, on every exit path.
pub struct ToolLease {
    pub tools: Vec<ToolHandle>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ToolLease {
    pub fn new(tools: Vec<ToolHandle>) -> Self {
        Self {
            tools,
            release: None,
        }
    }

    pub fn with_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }
}

impl Drop for ToolLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ToolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLease").field("tools", &self.tools).finish()
    }
}

/// Hands out tools for the enabled sources.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn acquire(&self, enabled_sources: &[String]) -> Result<ToolLease, CollaboratorError>;
}

/// One tool call's raw output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    /// Free text written by the executor; may carry delegation requests.
    pub output: String,
    pub tool_results: Vec<ToolResult>,
}

/// Runs one research task with the leased tools.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        tools: &[ToolHandle],
        max_searches: u32,
    ) -> Result<ExecutionOutput, CollaboratorError>;
}

/// Turns raw tool output into cited findings for a topic.
#[async_trait]
pub trait CitationExtractor: Send + Sync {
    async fn extract(&self, raw: &str, topic: &str) -> Result<Vec<Finding>, CollaboratorError>;
}

/// The full collaborator set of one research graph.
#[derive(Clone)]
pub struct Collaborators {
    pub scope: Arc<dyn ScopeClarifier>,
    pub gaps: Arc<dyn GapAnalyzer>,
    pub writer: Arc<dyn ReportWriter>,
    pub tools: Arc<dyn ToolRegistry>,
    pub executor: Arc<dyn TaskExecutor>,
    pub extractor: Arc<dyn CitationExtractor>,
}
