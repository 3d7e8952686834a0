//! # deepresearch
//!
//! A budget-bounded research workflow on a small state-graph engine. One shared
//! state record flows through named stages; stages return partial updates and the
//! engine merges them with per-field policies.
//!
//! ## Design principles
//!
//! - **Partial updates, one merge**: stages never mutate shared state. The engine
//!   folds their updates in, single-threaded, after every superstep ([`merge`]).
//! - **Failures stay local**: each stage invocation runs in its own task under a
//!   timeout. Errors, panics and timeouts become state ([`GraphState::failure_update`])
//!   and a fallback route; only engine invariant violations reach the caller ([`EngineError`]).
//! - **Durable pause**: a stage pauses by returning an interrupt; the checkpoint records
//!   it, so [`CompiledStateGraph::resume`] works across process restarts.
//! - **Collaborators behind traits**: models, search tools and extractors are
//!   [`research::collaborators`] traits; [`research::mock`] has scripted ones.
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledStateGraph`], [`Node`], [`Next`], [`Route`],
//!   [`Dispatch`], [`RunContext`], [`GraphState`].
//! - [`memory`]: checkpoints ([`Checkpointer`], [`MemorySaver`], [`SqliteSaver`]) and the
//!   long-term [`Store`] ([`InMemoryStore`], [`SqliteStore`]).
//! - [`stream`]: [`StreamEvent`], [`StreamMode`].
//! - [`research`]: the workflow itself: stages, state, aggregation, [`ResearchRunner`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deepresearch::research::{mock::offline_collaborators, ResearchConfig, ReviewDecision};
//! use deepresearch::{MemorySaver, ResearchRunner, StreamEvent};
//! use tokio_stream::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = ResearchRunner::new(
//!     offline_collaborators(),
//!     ResearchConfig::default(),
//!     Arc::new(MemorySaver::new()),
//!     None,
//! )?;
//! let (thread_id, mut events) = runner.start("Compare heat pump costs in Europe", None).await?;
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::Interrupt { interrupt, .. } = event {
//!         println!("{}", interrupt.value["report"]);
//!     }
//! }
//! let mut events = runner.resume(&thread_id, ReviewDecision::approve()).await?;
//! while events.next().await.is_some() {}
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod memory;
pub mod research;
pub mod stream;

pub use error::{EngineError, StageError};
pub use graph::{
    merge, CompilationError, CompiledStateGraph, Dispatch, GraphInterrupt, GraphState,
    Interrupt, MergePolicy, Next, Node, Route, RunContext, RunOutcome, StateGraph,
    StateSnapshot, END, START,
};
pub use memory::{
    Checkpoint, CheckpointError, CheckpointNext, Checkpointer, InMemoryStore, JsonSerializer,
    MemorySaver, Namespace, RunnableConfig, SqliteSaver, SqliteStore, Store, StoreError,
};
pub use research::{
    ConversationStore, ResearchConfig, ResearchRunner, ReviewDecision, WorkflowState,
};
pub use stream::{CheckpointEvent, StreamEvent, StreamMode};
