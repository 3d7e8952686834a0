//! Shared state contract and the pure merge of partial updates.
//!
//! Stages never return a whole new state. They return a partial `Update`, and the
//! engine folds updates into the shared state with `merge`, single-threaded, after
//! fan-in. Each state type declares its per-field merge policies through
//! `GraphState::apply`:
//!
//! ```rust,ignore
//! impl GraphState for Counter {
//!     type Update = CounterUpdate;
//!     fn apply(&mut self, update: &CounterUpdate) {
//!         self.log.extend(update.log.iter().cloned()); // Append
//!         self.total += update.delta;                  // Sum
//!         if let Some(l) = &update.label { self.label = l.clone(); } // LastWriterWins
//!     }
//!     // ...
//! }
//! ```

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// How concurrent partial updates combine into one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Concatenate in arrival order.
    Append,
    /// One writer per turn expected; a later write replaces an earlier one.
    LastWriterWins,
    /// Add numeric deltas.
    Sum,
}

/// State threaded through a graph.
pub trait GraphState: Clone + Send + Sync + Debug + 'static {
    /// Partial update a stage returns. `Default` is the empty update.
    ///
    /// Updates of finished fan-out dispatches are persisted as JSON on the
    /// in-flight checkpoint, hence the serde bounds.
    type Update: Clone + Send + Sync + Debug + Default + Serialize + DeserializeOwned + 'static;

    /// Folds one update into the state according to the per-field policies.
    fn apply(&mut self, update: &Self::Update);

    /// Converts a stage failure into an update. `input` is the state the failed
    /// invocation received (the narrowed state for a fan-out dispatch).
    fn failure_update(node_id: &str, input: &Self, error: &StageError) -> Self::Update;

    /// Names of last-writer-wins fields written by more than one update of a batch.
    fn conflicting_writes(_updates: &[Self::Update]) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Pure merge: applies `updates` to a copy of `base` in order.
///
/// Conflicting last-writer-wins writes inside one batch are a programming error in
/// the stages; they are logged and the later write wins.
pub fn merge<S: GraphState>(base: &S, updates: &[S::Update]) -> S {
    let conflicts = S::conflicting_writes(updates);
    if !conflicts.is_empty() {
        tracing::warn!(fields = ?conflicts, "conflicting last-writer-wins writes in one batch");
    }
    let mut state = base.clone();
    for update in updates {
        state.apply(update);
    }
    state
}
