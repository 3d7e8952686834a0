//! Wiring of the research workflow.
//!
//! ```text
//! START -> scope -(brief?)-> supervisor -(pending)-> worker* -> supervisor
//!            \-> END            \-(complete)-> report -> review -(approve)-> END
//!                                                ^        |-(refine)-> report
//!                                                         \-(re_research)-> supervisor
//! ```

use std::sync::Arc;

use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::memory::Checkpointer;

use super::collaborators::Collaborators;
use super::config::ResearchConfig;
use super::report::ReportNode;
use super::review::ReviewNode;
use super::scope::{route_after_scope, ScopeNode};
use super::state::WorkflowState;
use super::supervisor::{route_after_supervisor, SupervisorNode};
use super::worker::WorkerNode;
use super::{REPORT, REVIEW, SCOPE, SUPERVISOR, WORKER};

fn build(collaborators: Collaborators, config: &ResearchConfig) -> StateGraph<WorkflowState> {
    let mut graph = StateGraph::<WorkflowState>::new();
    graph
        .add_node(SCOPE, Arc::new(ScopeNode::new(collaborators.scope)))
        .add_node(SUPERVISOR, Arc::new(SupervisorNode::new(collaborators.gaps)))
        .add_node(
            WORKER,
            Arc::new(WorkerNode::new(
                collaborators.tools,
                collaborators.executor,
                collaborators.extractor,
                config.enabled_sources.clone(),
            )),
        )
        .add_node(REPORT, Arc::new(ReportNode::new(collaborators.writer)))
        .add_node(REVIEW, Arc::new(ReviewNode::new()))
        .add_edge(START, SCOPE)
        .add_conditional_edges(SCOPE, Arc::new(route_after_scope), None)
        .add_conditional_edges(SUPERVISOR, Arc::new(route_after_supervisor), None)
        .add_edge(WORKER, SUPERVISOR)
        .add_edge(REPORT, REVIEW)
        .add_edge(REVIEW, END);

    graph
        .with_error_route(SUPERVISOR, REPORT)
        .with_error_route(REPORT, REVIEW)
        .with_node_timeout(WORKER, config.worker_timeout)
        .with_step_limit(config.step_limit)
}

/// Builds the research graph without persistence (single-shot runs, tests).
pub fn build_research_graph(
    collaborators: Collaborators,
    config: &ResearchConfig,
) -> Result<CompiledStateGraph<WorkflowState>, CompilationError> {
    build(collaborators, config).compile()
}

/// Builds the research graph with a checkpointer so runs can pause for review and resume.
pub fn build_research_graph_with_checkpointer(
    collaborators: Collaborators,
    config: &ResearchConfig,
    checkpointer: Arc<dyn Checkpointer<WorkflowState>>,
) -> Result<CompiledStateGraph<WorkflowState>, CompilationError> {
    build(collaborators, config).compile_with_checkpointer(checkpointer)
}
