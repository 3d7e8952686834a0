//! Graph node trait: one stage in a StateGraph.
//!
//! Receives state `S`, returns a partial update and `Next`. The engine merges
//! the update; the node never mutates shared state.

use async_trait::async_trait;

use crate::error::StageError;

use super::{GraphState, Next, RunContext};

/// One stage in a graph: state in, (partial update, next step) out.
///
/// **Interaction**: Registered via `StateGraph::add_node`; run by `CompiledStateGraph`
/// inside its own tokio task, under the stage timeout.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: GraphState,
{
    /// Node id (e.g. `"supervisor"`, `"worker"`). Must be unique within a graph.
    fn id(&self) -> &str;

    /// One step: state in, (update, next step) out.
    async fn run(&self, state: S) -> Result<(S::Update, Next), StageError>;

    /// Variant with run context (resume value, config, cancellation).
    ///
    /// Default implementation calls `run` and ignores the context. Stages that pause
    /// override this to read `ctx.resume_value`.
    async fn run_with_context(
        &self,
        state: S,
        _ctx: &RunContext<S>,
    ) -> Result<(S::Update, Next), StageError> {
        self.run(state).await
    }
}
