//! The research workflow: scope, supervisor loop with parallel workers, report,
//! human review.
//!
//! Stages are `Node<WorkflowState>` implementations wired by `graph::build_research_graph*`.
//! External services (models, search tools, extractors) sit behind the traits in
//! `collaborators`; `mock` has deterministic implementations.

pub mod aggregate;
pub mod collaborators;
pub mod config;
pub mod delegation;
pub mod graph;
pub mod history;
pub mod mock;
pub mod model;
pub mod report;
pub mod review;
pub mod runner;
pub mod scope;
pub mod state;
pub mod supervisor;
pub mod worker;

/// Stage ids.
pub const SCOPE: &str = "scope";
pub const SUPERVISOR: &str = "supervisor";
pub const WORKER: &str = "worker";
pub const REPORT: &str = "report";
pub const REVIEW: &str = "review";

pub use aggregate::{aggregate, findings_digest, MIN_CREDIBILITY};
pub use collaborators::{
    CitationExtractor, Clarification, CollaboratorError, Collaborators, ExecutionOutput,
    GapAnalysis, GapAnalyzer, GapContext, ReportRequest, ReportWriter, ScopeCheck,
    ScopeClarifier, TaskExecutor, ToolHandle, ToolLease, ToolRegistry, ToolResult,
};
pub use config::{ConfigError, ResearchConfig};
pub use graph::{build_research_graph, build_research_graph_with_checkpointer};
pub use history::{ConversationRecord, ConversationStore, ConversationSummary};
pub use model::{
    pending_tasks, Budget, Citation, Finding, Gaps, Message, ReportFormat, Requester,
    ResearchBrief, ReviewAction, ReviewDecision, Role, SourceType, Task,
};
pub use runner::{ResearchEvent, ResearchRunner};
pub use state::{StateUpdate, WorkflowState, MERGE_POLICIES};
