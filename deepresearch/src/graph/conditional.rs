//! Conditional edges: route to the next node (or fan out) based on state.
//!
//! **Interaction**: Used by `StateGraph::add_conditional_edges` and the
//! `CompiledStateGraph` run loop to resolve where to go after a node with
//! conditional edges runs. Also re-evaluated on resume when a checkpoint
//! recorded `CheckpointNext::Route`, so routers must be pure functions of state.

use std::collections::HashMap;
use std::sync::Arc;

use super::next::{Dispatch, Route};
use super::state_graph::END;

/// Router function: takes a reference to state and returns a routing decision.
pub type ConditionalRouterFn<S> = Arc<dyn Fn(&S) -> Route<S> + Send + Sync>;

/// Conditional edge definition: routing function plus optional path map.
///
/// When `path_map` is `Some(map)`, a `Route::To(key)` resolves to `map[key]` if
/// present, otherwise to the key itself. `Route::Send` targets are used as given.
#[derive(Clone)]
pub struct ConditionalRouter<S> {
    pub(super) path: ConditionalRouterFn<S>,
    pub(super) path_map: Option<HashMap<String, String>>,
}

impl<S> ConditionalRouter<S> {
    pub fn new(path: ConditionalRouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the route from the current state, applying the path map.
    ///
    /// `Route::To(END)` is normalised to `Route::End`.
    pub fn resolve(&self, state: &S) -> Route<S> {
        match (self.path)(state) {
            Route::To(key) => {
                let target = self
                    .path_map
                    .as_ref()
                    .and_then(|m| m.get(&key))
                    .cloned()
                    .unwrap_or(key);
                if target == END {
                    Route::End
                } else {
                    Route::To(target)
                }
            }
            Route::Send(dispatches) => Route::Send(
                dispatches
                    .into_iter()
                    .map(|d| Dispatch {
                        node: self.map_target(d.node),
                        state: d.state,
                    })
                    .collect(),
            ),
            Route::End => Route::End,
        }
    }

    fn map_target(&self, key: String) -> String {
        self.path_map
            .as_ref()
            .and_then(|m| m.get(&key))
            .cloned()
            .unwrap_or(key)
    }
}

/// How to determine the next node after a given node runs.
#[derive(Clone)]
pub enum NextEntry<S> {
    /// Single fixed next node (or END). The node's `Next` is still respected.
    Unconditional(String),
    /// Next step is decided by the router from state; the node's `Next` is ignored.
    Conditional(ConditionalRouter<S>),
}
