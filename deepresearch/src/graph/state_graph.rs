//! State graph builder: nodes, explicit edges (from → to) and conditional edges.
//!
//! Add nodes with `add_node`, wire them with `add_edge(from, to)` using `START` and
//! `END` for entry/exit, and use `add_conditional_edges` to route (or fan out) based
//! on state. Then `compile` or `compile_with_checkpointer` to get a
//! `CompiledStateGraph`.
//!
//! A node has either one outgoing `add_edge` or `add_conditional_edges`, not both.
//! A node with neither ends the run after it executes unless it returns `Next::Node`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::compile_error::CompilationError;
use super::compiled::CompiledStateGraph;
use super::conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
use super::node::Node;
use super::GraphState;
use crate::memory::Checkpointer;

/// Sentinel for graph entry: use as `from_id` in `add_edge(START, first_node_id)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: use as `to_id` in `add_edge(last_node_id, END)`.
pub const END: &str = "__end__";

/// Default bound on supersteps per invocation.
pub const DEFAULT_STEP_LIMIT: usize = 200;

/// State graph: nodes plus explicit edges and optional conditional edges.
///
/// **Interaction**: Accepts `Arc<dyn Node<S>>`; produces `CompiledStateGraph<S>`.
/// `research::build_research_graph` is the main user.
pub struct StateGraph<S>
where
    S: GraphState,
{
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    /// Edges (from_id, to_id).
    edges: Vec<(String, String)>,
    conditional_edges: HashMap<String, ConditionalRouter<S>>,
    /// Where a failed stage routes instead of `END`.
    error_routes: HashMap<String, String>,
    stage_timeout: Option<Duration>,
    node_timeouts: HashMap<String, Duration>,
    step_limit: usize,
}

impl<S> Default for StateGraph<S>
where
    S: GraphState,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateGraph<S>
where
    S: GraphState,
{
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: HashMap::new(),
            error_routes: HashMap::new(),
            stage_timeout: None,
            node_timeouts: HashMap::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Adds a node; id must be unique. Replaces if same id.
    pub fn add_node(&mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Adds an edge from `from_id` to `to_id`.
    ///
    /// Use `START` for graph entry and `END` for graph exit. Both ids (except
    /// START/END) must be registered via `add_node` before `compile()`.
    pub fn add_edge(&mut self, from_id: impl Into<String>, to_id: impl Into<String>) -> &mut Self {
        self.edges.push((from_id.into(), to_id.into()));
        self
    }

    /// Adds conditional edges from `source`: after it runs, `path(state)` decides.
    ///
    /// - `Route::To(key)`: next node is `path_map[key]` when mapped, otherwise `key`.
    /// - `Route::Send(dispatches)`: one concurrent invocation per dispatch, joined
    ///   before the updates are merged.
    /// - `Route::End`: stop.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// graph.add_conditional_edges(
    ///     "supervisor",
    ///     Arc::new(|s: &WorkflowState| {
    ///         if s.is_complete { Route::to("report") }
    ///         else { Route::Send(s.pending_tasks().into_iter().map(|t| Dispatch::new("worker", s.for_task(t))).collect()) }
    ///     }),
    ///     None,
    /// );
    /// ```
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        path: ConditionalRouterFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.conditional_edges
            .insert(source.into(), ConditionalRouter::new(path, path_map));
        self
    }

    /// When `node` fails, route to `target` (a node id or `END`) after merging the
    /// failure update. Without an error route a failed stage ends the run.
    pub fn with_error_route(mut self, node: impl Into<String>, target: impl Into<String>) -> Self {
        self.error_routes.insert(node.into(), target.into());
        self
    }

    /// Deadline for every stage invocation that has no per-node timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn with_node_timeout(mut self, node: impl Into<String>, timeout: Duration) -> Self {
        self.node_timeouts.insert(node.into(), timeout);
        self
    }

    /// Maximum supersteps per `invoke`/`resume` call. Guards against routing cycles.
    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Builds the executable graph without persistence.
    pub fn compile(self) -> Result<CompiledStateGraph<S>, CompilationError> {
        self.compile_internal(None)
    }

    /// Builds the executable graph with a checkpointer. Runs with `config.thread_id`
    /// are checkpointed once per superstep and on every pause.
    pub fn compile_with_checkpointer(
        self,
        checkpointer: Arc<dyn Checkpointer<S>>,
    ) -> Result<CompiledStateGraph<S>, CompilationError> {
        self.compile_internal(Some(checkpointer))
    }

    fn is_target(&self, id: &str) -> bool {
        id == END || self.nodes.contains_key(id)
    }

    fn compile_internal(
        self,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Result<CompiledStateGraph<S>, CompilationError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(CompilationError::NodeNotFound(from.clone()));
            }
            if !self.is_target(to) {
                return Err(CompilationError::NodeNotFound(to.clone()));
            }
        }
        for (source, router) in &self.conditional_edges {
            if !self.nodes.contains_key(source) {
                return Err(CompilationError::NodeNotFound(source.clone()));
            }
            if let Some(ref path_map) = router.path_map {
                for target in path_map.values() {
                    if !self.is_target(target) {
                        return Err(CompilationError::InvalidConditionalPathMap(target.clone()));
                    }
                }
            }
        }
        for (node, target) in &self.error_routes {
            if !self.nodes.contains_key(node) {
                return Err(CompilationError::InvalidErrorRoute(node.clone()));
            }
            if !self.is_target(target) {
                return Err(CompilationError::InvalidErrorRoute(target.clone()));
            }
        }

        let mut start_edges = self
            .edges
            .iter()
            .filter(|(f, _)| f == START)
            .map(|(_, t)| t.clone());
        let first = match (start_edges.next(), start_edges.next()) {
            (Some(first), None) if first != END => first,
            _ => return Err(CompilationError::MissingStart),
        };

        // Routers without a path map may return END directly.
        let has_end = self.edges.iter().any(|(_, t)| t == END)
            || self
                .conditional_edges
                .values()
                .any(|r| r.path_map.as_ref().map_or(true, |m| m.values().any(|v| v == END)));
        if !has_end {
            return Err(CompilationError::MissingEnd);
        }

        let mut edge_froms = HashSet::new();
        for (from, _) in self.edges.iter().filter(|(f, _)| f != START) {
            if !edge_froms.insert(from.clone()) {
                return Err(CompilationError::DuplicateEdge(from.clone()));
            }
        }
        for source in self.conditional_edges.keys() {
            if edge_froms.contains(source) {
                return Err(CompilationError::NodeHasBothEdgeAndConditional(
                    source.clone(),
                ));
            }
        }

        let mut next_map: HashMap<String, NextEntry<S>> = self
            .edges
            .iter()
            .filter(|(f, _)| f != START)
            .map(|(f, t)| (f.clone(), NextEntry::Unconditional(t.clone())))
            .collect();
        for (source, router) in self.conditional_edges {
            next_map.insert(source, NextEntry::Conditional(router));
        }

        Ok(CompiledStateGraph {
            nodes: self.nodes,
            first_node_id: first,
            next_map,
            error_routes: self.error_routes,
            checkpointer,
            stage_timeout: self.stage_timeout,
            node_timeouts: self.node_timeouts,
            step_limit: self.step_limit,
        })
    }
}
