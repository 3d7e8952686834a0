//! Graph compilation error.
//!
//! Returned by `StateGraph::compile` when edges reference unknown nodes or the
//! routing table is ambiguous.

use thiserror::Error;

/// Error when compiling a state graph.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// A node id in an edge was not registered via `add_node` (and is not START/END).
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No edge from START, or more than one.
    #[error("graph must have exactly one edge from START")]
    MissingStart,

    /// Neither an edge nor any conditional path reaches END.
    #[error("graph has no path to END")]
    MissingEnd,

    /// A node has more than one outgoing unconditional edge.
    #[error("node has more than one outgoing edge: {0}")]
    DuplicateEdge(String),

    /// A node has both an outgoing edge and conditional edges; it must have exactly one.
    #[error("node has both edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    /// A value in a conditional path_map is not a valid node id or END.
    #[error("conditional path_map invalid target: {0}")]
    InvalidConditionalPathMap(String),

    /// `with_error_route` names an unknown node or target.
    #[error("error route invalid: {0}")]
    InvalidErrorRoute(String),
}
