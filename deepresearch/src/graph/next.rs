//! Routing results: what a node asks for (`Next`) and what a router decides (`Route`).

/// Next step requested by a node after it runs.
///
/// - **Continue**: follow the node's unconditional edge.
/// - **Node(id)**: jump to the given node.
/// - **End**: stop.
///
/// Ignored when the node has conditional edges; the router decides instead.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Next {
    Continue,
    Node(String),
    End,
}

/// One invocation of a fan-out: the target node and its narrowed state.
#[derive(Debug, Clone)]
pub struct Dispatch<S> {
    pub node: String,
    pub state: S,
}

impl<S> Dispatch<S> {
    pub fn new(node: impl Into<String>, state: S) -> Self {
        Self {
            node: node.into(),
            state,
        }
    }
}

/// Decision returned by a conditional router.
///
/// `To(key)` goes to one node (the key may be mapped through the edge's path map),
/// `Send(dispatches)` fans out one invocation per dispatch and joins before merging,
/// `End` terminates the run.
#[derive(Debug, Clone)]
pub enum Route<S> {
    To(String),
    Send(Vec<Dispatch<S>>),
    End,
}

impl<S> Route<S> {
    pub fn to(node: impl Into<String>) -> Self {
        Route::To(node.into())
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Route::End)
    }
}
