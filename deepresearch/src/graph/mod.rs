//! State graph: nodes, edges, conditional routing and fan-out; compile, then invoke.
//!
//! `StateGraph` builds, `CompiledStateGraph` runs. Stages return partial updates
//! that the engine folds into the shared state with `merge`.

mod compile_error;
mod compiled;
mod conditional;
mod interrupt;
mod logging;
mod next;
mod node;
mod run_context;
pub(crate) mod state;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::{CompiledStateGraph, RunOutcome, StateSnapshot};
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use interrupt::{GraphInterrupt, Interrupt};
pub use logging::{
    log_fan_in, log_fan_out, log_graph_complete, log_graph_error, log_graph_interrupted,
    log_graph_start, log_node_complete, log_node_start, log_stage_failure,
};
pub use next::{Dispatch, Next, Route};
pub use node::Node;
pub use run_context::RunContext;
pub use state::{merge, GraphState, MergePolicy};
pub use state_graph::{StateGraph, DEFAULT_STEP_LIMIT, END, START};
