//! Compiled state graph: the run loop.
//!
//! Built by `StateGraph::compile` or `compile_with_checkpointer`. Each superstep runs
//! either one node or a fan-out of `Dispatch`es; every invocation gets its own tokio
//! task, so a panic or timeout stays local to that stage. Updates are merged
//! single-threaded after fan-in. With a checkpointer and `config.thread_id`, a
//! checkpoint is written before the first stage, after every superstep, and on
//! every pause. Inside a fan-out, every finished dispatch is also saved as a pending
//! write, so resuming an interrupted fan-out only re-runs the dispatches that had
//! not finished.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::task::AbortOnDropHandle;

use crate::error::{EngineError, StageError};
use crate::memory::{
    Checkpoint, CheckpointError, CheckpointNext, CheckpointSource, Checkpointer, PendingWrite,
    RunnableConfig,
};
use crate::stream::{CheckpointEvent, StreamEvent, StreamMode};

use super::logging::{
    log_fan_in, log_fan_out, log_graph_complete, log_graph_error, log_graph_interrupted,
    log_graph_start, log_node_complete, log_node_start, log_node_state, log_stage_failure,
};
use super::state::merge;
use super::state_graph::END;
use super::{Dispatch, GraphState, Interrupt, Next, NextEntry, Node, Route, RunContext};

const TASK_MODES: &[StreamMode] = &[StreamMode::Tasks, StreamMode::Debug];
const CHECKPOINT_MODES: &[StreamMode] = &[StreamMode::Checkpoints, StreamMode::Debug];

/// Result of `invoke` / `resume`.
#[derive(Debug, Clone)]
pub enum RunOutcome<S> {
    /// The run reached END.
    Completed(S),
    /// A stage paused; call `resume` with the caller's input to continue.
    Interrupted { state: S, interrupt: Interrupt },
}

impl<S> RunOutcome<S> {
    pub fn state(&self) -> &S {
        match self {
            RunOutcome::Completed(state) => state,
            RunOutcome::Interrupted { state, .. } => state,
        }
    }

    pub fn into_state(self) -> S {
        match self {
            RunOutcome::Completed(state) => state,
            RunOutcome::Interrupted { state, .. } => state,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted { .. })
    }
}

/// Persisted view of a thread at one checkpoint.
#[derive(Debug, Clone)]
pub struct StateSnapshot<S> {
    pub state: S,
    pub next: CheckpointNext,
    pub checkpoint_id: String,
    pub step: i64,
    pub created_at: String,
}

impl<S> From<Checkpoint<S>> for StateSnapshot<S> {
    fn from(cp: Checkpoint<S>) -> Self {
        Self {
            state: cp.state,
            next: cp.next,
            checkpoint_id: cp.id,
            step: cp.metadata.step,
            created_at: cp.metadata.created_at,
        }
    }
}

/// Where the run goes after a superstep.
enum Step<S> {
    Run(String),
    FanOut {
        source: String,
        dispatches: Vec<Dispatch<S>>,
        /// Dispatches that finished before a crash or cancellation.
        finished: Vec<PendingWrite>,
    },
    End,
}

impl<S> Step<S> {
    fn checkpoint_next(&self) -> CheckpointNext {
        match self {
            Step::Run(node) => CheckpointNext::node(node.clone()),
            Step::FanOut { source, .. } => CheckpointNext::Route {
                source: source.clone(),
            },
            Step::End => CheckpointNext::End,
        }
    }
}

/// What one single-node superstep produced.
enum SingleOutcome<S: GraphState> {
    Done(S::Update, Next),
    Failed(S::Update),
    Interrupted(Interrupt),
}

/// Compiled graph: immutable structure, cheap to clone.
///
/// **Interaction**: Created by `StateGraph::compile()`; driven by `ResearchRunner`
/// through `invoke_with_context` / `resume_with_context`.
#[derive(Clone)]
pub struct CompiledStateGraph<S>
where
    S: GraphState,
{
    pub(super) nodes: HashMap<String, Arc<dyn Node<S>>>,
    /// First node to run (from START).
    pub(super) first_node_id: String,
    /// Node id → unconditional target or router.
    pub(super) next_map: HashMap<String, NextEntry<S>>,
    pub(super) error_routes: HashMap<String, String>,
    pub(super) checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    pub(super) stage_timeout: Option<Duration>,
    pub(super) node_timeouts: HashMap<String, Duration>,
    pub(super) step_limit: usize,
}

/// Runs one stage in its own task, under `timeout`. Panics become `StageError::Panicked`.
/// Dropping the returned future (cancellation) aborts the stage task.
async fn run_isolated<S: GraphState>(
    node: Arc<dyn Node<S>>,
    state: S,
    ctx: RunContext<S>,
    timeout: Option<Duration>,
) -> Result<(S::Update, Next), StageError> {
    let mut handle =
        AbortOnDropHandle::new(tokio::spawn(async move { node.run_with_context(state, &ctx).await }));
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(StageError::Timeout(limit));
            }
        },
        None => handle.await,
    };
    joined.map_err(|e| {
        if e.is_panic() {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            StageError::Panicked(message)
        } else {
            StageError::ExecutionFailed("stage task cancelled".into())
        }
    })?
}

impl<S> CompiledStateGraph<S>
where
    S: GraphState,
{
    fn node(&self, id: &str) -> Result<Arc<dyn Node<S>>, EngineError> {
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    fn timeout_for(&self, node_id: &str) -> Option<Duration> {
        self.node_timeouts
            .get(node_id)
            .copied()
            .or(self.stage_timeout)
    }

    fn run_step(&self, node: String) -> Result<Step<S>, EngineError> {
        if node == END {
            return Ok(Step::End);
        }
        if !self.nodes.contains_key(&node) {
            return Err(EngineError::NodeNotFound(node));
        }
        Ok(Step::Run(node))
    }

    fn step_from_route(&self, source: &str, route: Route<S>) -> Result<Step<S>, EngineError> {
        match route {
            Route::To(node) => self.run_step(node),
            Route::End => Ok(Step::End),
            Route::Send(dispatches) if dispatches.is_empty() => Ok(Step::End),
            Route::Send(dispatches) => {
                if let Some(d) = dispatches.iter().find(|d| !self.nodes.contains_key(&d.node)) {
                    return Err(EngineError::NodeNotFound(d.node.clone()));
                }
                Ok(Step::FanOut {
                    source: source.to_string(),
                    dispatches,
                    finished: Vec::new(),
                })
            }
        }
    }

    /// Re-evaluates the router of `source` against `state`.
    fn reroute(&self, source: &str, state: &S) -> Result<Step<S>, EngineError> {
        match self.next_map.get(source) {
            Some(NextEntry::Conditional(router)) => {
                let route = router.resolve(state);
                self.step_from_route(source, route)
            }
            _ => Err(EngineError::NodeNotFound(source.to_string())),
        }
    }

    /// Successor of a node that ran alone and succeeded.
    fn route_after(&self, node_id: &str, state: &S, next: Next) -> Result<Step<S>, EngineError> {
        match self.next_map.get(node_id) {
            Some(NextEntry::Conditional(router)) => {
                let route = router.resolve(state);
                tracing::debug!(from = %node_id, end = route.is_end(), "conditional routing");
                self.step_from_route(node_id, route)
            }
            Some(NextEntry::Unconditional(to)) => match next {
                Next::End => Ok(Step::End),
                Next::Node(id) => self.run_step(id),
                Next::Continue => self.run_step(to.clone()),
            },
            None => match next {
                Next::Node(id) => self.run_step(id),
                Next::Continue | Next::End => Ok(Step::End),
            },
        }
    }

    /// Successor after fan-in. All dispatched nodes must agree on where to go next.
    fn route_after_fan_in(&self, targets: &[String], state: &S) -> Result<Step<S>, EngineError> {
        if let [only] = targets {
            return self.route_after(only, state, Next::Continue);
        }
        let mut successors = HashSet::new();
        for target in targets {
            match self.next_map.get(target) {
                Some(NextEntry::Unconditional(to)) => {
                    successors.insert(to.clone());
                }
                Some(NextEntry::Conditional(_)) => {
                    successors.insert(format!("router:{}", target));
                }
                None => {
                    successors.insert(END.to_string());
                }
            }
        }
        let mut successors: Vec<String> = successors.into_iter().collect();
        if successors.len() == 1 {
            if let Some(next) = successors.pop() {
                return self.run_step(next);
            }
        }
        successors.sort();
        Err(EngineError::DivergentFanIn(successors))
    }

    /// Writes a checkpoint when persistence is active. Returns the id to use as parent next.
    async fn save_checkpoint(
        &self,
        ctx: &RunContext<S>,
        state: &S,
        next: CheckpointNext,
        source: CheckpointSource,
        step: i64,
        parent_id: Option<String>,
    ) -> Result<Option<String>, EngineError> {
        let (Some(cp), Some(thread_id)) = (&self.checkpointer, ctx.config.thread_id.as_deref())
        else {
            return Ok(parent_id);
        };
        let checkpoint = Checkpoint::new(state.clone(), next, source, step, parent_id);
        let id = cp.put(&ctx.config, &checkpoint).await?;
        tracing::info!(
            thread_id,
            checkpoint_id = %id,
            step,
            source = source.as_str(),
            "checkpoint saved"
        );
        if ctx.streams_any(CHECKPOINT_MODES) {
            ctx.emit(StreamEvent::Checkpoint(CheckpointEvent {
                checkpoint_id: id.clone(),
                timestamp: checkpoint.ts.clone(),
                step,
                state: state.clone(),
                thread_id: Some(thread_id.to_string()),
            }))
            .await;
        }
        Ok(Some(id))
    }

    async fn emit_update(
        &self,
        ctx: &RunContext<S>,
        node_id: &str,
        task_index: Option<usize>,
        update: &S::Update,
    ) {
        if ctx.streams_any(&[StreamMode::Updates]) {
            ctx.emit(StreamEvent::Updates {
                node_id: node_id.to_string(),
                task_index,
                update: update.clone(),
            })
            .await;
        }
    }

    async fn emit_task_end(
        &self,
        ctx: &RunContext<S>,
        node_id: &str,
        task_index: Option<usize>,
        result: Result<(), String>,
    ) {
        if ctx.streams_any(TASK_MODES) {
            ctx.emit(StreamEvent::TaskEnd {
                node_id: node_id.to_string(),
                task_index,
                result,
            })
            .await;
        }
    }

    /// Runs one node alone. Cancellation aborts the superstep.
    async fn run_single(
        &self,
        node_id: &str,
        state: &S,
        ctx: &RunContext<S>,
    ) -> Result<SingleOutcome<S>, EngineError> {
        let node = self.node(node_id)?;
        log_node_start(node_id, None);
        log_node_state(node_id, state);
        if ctx.streams_any(TASK_MODES) {
            ctx.emit(StreamEvent::TaskStart {
                node_id: node_id.to_string(),
                task_index: None,
            })
            .await;
        }

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = run_isolated(node, state.clone(), ctx.for_stage(), self.timeout_for(node_id)) => result,
        };

        match result {
            Ok((update, next)) => {
                log_node_complete(node_id, &next);
                self.emit_task_end(ctx, node_id, None, Ok(())).await;
                self.emit_update(ctx, node_id, None, &update).await;
                Ok(SingleOutcome::Done(update, next))
            }
            Err(StageError::Interrupted(interrupt)) => {
                self.emit_task_end(ctx, node_id, None, Err("interrupted".into()))
                    .await;
                Ok(SingleOutcome::Interrupted(interrupt.0))
            }
            Err(error) => {
                log_stage_failure(node_id, None, &error);
                self.emit_task_end(ctx, node_id, None, Err(error.to_string()))
                    .await;
                let update = S::failure_update(node_id, state, &error);
                self.emit_update(ctx, node_id, None, &update).await;
                Ok(SingleOutcome::Failed(update))
            }
        }
    }

    /// Saves the finished dispatches of the in-flight fan-out on top of `base`.
    #[allow(clippy::too_many_arguments)]
    async fn save_pending(
        &self,
        ctx: &RunContext<S>,
        base: &S,
        source: &str,
        writes: &mut Vec<PendingWrite>,
        finished: (usize, &str, &S::Update),
        step: i64,
        parent_id: &mut Option<String>,
    ) -> Result<(), EngineError> {
        let (Some(cp), Some(thread_id)) = (&self.checkpointer, ctx.config.thread_id.as_deref())
        else {
            return Ok(());
        };
        let (task_index, node, update) = finished;
        let update = serde_json::to_value(update)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        writes.push(PendingWrite {
            task_index,
            node: node.to_string(),
            update,
        });
        let checkpoint = Checkpoint::new(
            base.clone(),
            CheckpointNext::Route {
                source: source.to_string(),
            },
            CheckpointSource::Pending,
            step,
            parent_id.clone(),
        )
        .with_pending_writes(writes.clone());
        let id = cp.put(&ctx.config, &checkpoint).await?;
        tracing::debug!(
            thread_id,
            checkpoint_id = %id,
            finished = writes.len(),
            "fan-out progress saved"
        );
        *parent_id = Some(id);
        Ok(())
    }

    /// Decodes the pending writes that still match `dispatches`; returns them with
    /// their updates. A write naming another node at that index is dropped.
    fn restore_pending(
        &self,
        source: &str,
        dispatches: &[Dispatch<S>],
        finished: Vec<PendingWrite>,
    ) -> Result<(Vec<PendingWrite>, Vec<S::Update>), EngineError> {
        let mut writes = Vec::with_capacity(finished.len());
        let mut updates = Vec::with_capacity(finished.len());
        for write in finished {
            let matches = dispatches
                .get(write.task_index)
                .is_some_and(|d| d.node == write.node);
            if !matches || writes.iter().any(|w: &PendingWrite| w.task_index == write.task_index) {
                tracing::warn!(
                    source,
                    task_index = write.task_index,
                    node = %write.node,
                    "pending write does not match the dispatch list; ignored"
                );
                continue;
            }
            let update: S::Update = serde_json::from_value(write.update.clone())
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
            updates.push(update);
            writes.push(write);
        }
        if !writes.is_empty() {
            tracing::info!(
                source,
                restored = writes.len(),
                total = dispatches.len(),
                "restoring finished dispatches"
            );
        }
        Ok((writes, updates))
    }

    /// Runs every dispatch concurrently and returns their updates in arrival order.
    /// A failed dispatch contributes its failure update; siblings keep running.
    /// Dispatches listed in `finished` are not run again; their stored updates come first.
    #[allow(clippy::too_many_arguments)]
    async fn run_fan_out(
        &self,
        source: &str,
        dispatches: Vec<Dispatch<S>>,
        finished: Vec<PendingWrite>,
        base: &S,
        ctx: &RunContext<S>,
        step: i64,
        parent_id: &mut Option<String>,
    ) -> Result<Vec<S::Update>, EngineError> {
        let total = dispatches.len();
        let (mut writes, mut updates) = self.restore_pending(source, &dispatches, finished)?;
        let done: HashSet<usize> = writes.iter().map(|w| w.task_index).collect();
        let remaining: Vec<(usize, Dispatch<S>)> = dispatches
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !done.contains(index))
            .collect();
        let targets: Vec<String> = remaining.iter().map(|(_, d)| d.node.clone()).collect();
        log_fan_out(source, &targets);

        let mut set = JoinSet::new();
        for (index, dispatch) in remaining {
            let node = self.node(&dispatch.node)?;
            log_node_start(&dispatch.node, Some(index));
            if ctx.streams_any(TASK_MODES) {
                ctx.emit(StreamEvent::TaskStart {
                    node_id: dispatch.node.clone(),
                    task_index: Some(index),
                })
                .await;
            }
            let timeout = self.timeout_for(&dispatch.node);
            let stage_ctx = ctx.for_stage();
            set.spawn(async move {
                let result = run_isolated(node, dispatch.state.clone(), stage_ctx, timeout).await;
                (index, dispatch, result)
            });
        }

        updates.reserve(total.saturating_sub(updates.len()));
        loop {
            let joined = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    set.abort_all();
                    return Err(EngineError::Cancelled);
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            // Outer tasks only await the isolated stage, so they do not panic.
            let (index, dispatch, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, "fan-out task lost");
                    continue;
                }
            };
            log_fan_in(&dispatch.node, index, updates.len() + 1, total);
            let update = match result {
                Ok((update, next)) => {
                    log_node_complete(&dispatch.node, &next);
                    self.emit_task_end(ctx, &dispatch.node, Some(index), Ok(()))
                        .await;
                    update
                }
                Err(error) => {
                    log_stage_failure(&dispatch.node, Some(index), &error);
                    self.emit_task_end(ctx, &dispatch.node, Some(index), Err(error.to_string()))
                        .await;
                    S::failure_update(&dispatch.node, &dispatch.state, &error)
                }
            };
            self.emit_update(ctx, &dispatch.node, Some(index), &update)
                .await;
            self.save_pending(
                ctx,
                base,
                source,
                &mut writes,
                (index, &dispatch.node, &update),
                step,
                parent_id,
            )
            .await?;
            updates.push(update);
        }
        Ok(updates)
    }

    /// Shared run loop used by invoke and resume.
    async fn run_loop(
        &self,
        mut state: S,
        mut step: Step<S>,
        ctx: &mut RunContext<S>,
        mut step_index: i64,
        mut parent_id: Option<String>,
    ) -> Result<RunOutcome<S>, EngineError> {
        let thread_id = ctx.config.thread_id.clone();
        let mut supersteps = 0usize;
        loop {
            match step {
                Step::End => {
                    log_graph_complete(thread_id.as_deref(), step_index + 1);
                    return Ok(RunOutcome::Completed(state));
                }
                Step::Run(node_id) => {
                    supersteps += 1;
                    if supersteps > self.step_limit {
                        return Err(EngineError::StepLimitExceeded(self.step_limit));
                    }
                    let outcome = self.run_single(&node_id, &state, ctx).await?;
                    ctx.resume_value = None;
                    step = match outcome {
                        SingleOutcome::Done(update, next) => {
                            state = merge(&state, std::slice::from_ref(&update));
                            self.route_after(&node_id, &state, next)?
                        }
                        SingleOutcome::Failed(update) => {
                            state = merge(&state, std::slice::from_ref(&update));
                            let target = self
                                .error_routes
                                .get(&node_id)
                                .cloned()
                                .unwrap_or_else(|| END.to_string());
                            self.run_step(target)?
                        }
                        SingleOutcome::Interrupted(interrupt) => {
                            self.save_checkpoint(
                                ctx,
                                &state,
                                CheckpointNext::Interrupted {
                                    node: node_id.clone(),
                                    interrupt: interrupt.clone(),
                                },
                                CheckpointSource::Interrupt,
                                step_index + 1,
                                parent_id,
                            )
                            .await?;
                            ctx.emit(StreamEvent::Interrupt {
                                node_id: node_id.clone(),
                                interrupt: interrupt.clone(),
                            })
                            .await;
                            log_graph_interrupted(thread_id.as_deref(), &node_id);
                            return Ok(RunOutcome::Interrupted { state, interrupt });
                        }
                    };
                }
                Step::FanOut {
                    source,
                    dispatches,
                    finished,
                } => {
                    supersteps += 1;
                    if supersteps > self.step_limit {
                        return Err(EngineError::StepLimitExceeded(self.step_limit));
                    }
                    let mut targets: Vec<String> = Vec::new();
                    for d in &dispatches {
                        if !targets.contains(&d.node) {
                            targets.push(d.node.clone());
                        }
                    }
                    ctx.resume_value = None;
                    let updates = self
                        .run_fan_out(
                            &source,
                            dispatches,
                            finished,
                            &state,
                            ctx,
                            step_index,
                            &mut parent_id,
                        )
                        .await?;
                    state = merge(&state, &updates);
                    step = self.route_after_fan_in(&targets, &state)?;
                }
            }

            step_index += 1;
            parent_id = self
                .save_checkpoint(
                    ctx,
                    &state,
                    step.checkpoint_next(),
                    CheckpointSource::Loop,
                    step_index,
                    parent_id,
                )
                .await?;
            if ctx.streams_any(&[StreamMode::Values]) {
                ctx.emit(StreamEvent::Values(state.clone())).await;
            }
        }
    }

    async fn finish(
        &self,
        ctx: &RunContext<S>,
        result: Result<RunOutcome<S>, EngineError>,
    ) -> Result<RunOutcome<S>, EngineError> {
        if let Err(ref e) = result {
            log_graph_error(e);
            ctx.emit(StreamEvent::Error {
                message: e.to_string(),
            })
            .await;
        }
        result
    }

    /// Runs the graph from START with `state` as input.
    ///
    /// Fails with `ThreadBusy` when the thread is paused at an interrupt; resume it instead.
    pub async fn invoke(&self, state: S, config: RunnableConfig) -> Result<RunOutcome<S>, EngineError> {
        self.invoke_with_context(state, RunContext::new(config))
            .await
    }

    /// Like `invoke`, with a caller-built context (stream sender, cancellation token).
    pub async fn invoke_with_context(
        &self,
        state: S,
        mut ctx: RunContext<S>,
    ) -> Result<RunOutcome<S>, EngineError> {
        let result = self.start_run(state, &mut ctx).await;
        self.finish(&ctx, result).await
    }

    async fn start_run(
        &self,
        state: S,
        ctx: &mut RunContext<S>,
    ) -> Result<RunOutcome<S>, EngineError> {
        if self.nodes.is_empty() || !self.nodes.contains_key(&self.first_node_id) {
            return Err(EngineError::EmptyGraph);
        }
        log_graph_start(ctx.config.thread_id.as_deref());
        ctx.resume_value = None;

        let mut parent_id = None;
        if let (Some(cp), Some(thread_id)) = (&self.checkpointer, ctx.config.thread_id.clone()) {
            let mut latest_config = ctx.config.clone();
            latest_config.checkpoint_id = None;
            if let Some(latest) = cp.get_tuple(&latest_config).await? {
                if matches!(latest.next, CheckpointNext::Interrupted { .. }) {
                    return Err(EngineError::ThreadBusy(thread_id));
                }
                parent_id = Some(latest.id);
            }
        }

        let first = Step::Run(self.first_node_id.clone());
        let parent_id = self
            .save_checkpoint(
                ctx,
                &state,
                first.checkpoint_next(),
                CheckpointSource::Input,
                -1,
                parent_id,
            )
            .await?;
        self.run_loop(state, first, ctx, -1, parent_id).await
    }

    /// Continues a thread from its latest checkpoint.
    ///
    /// - paused: re-enters the paused node with `value` as its resume value;
    /// - crashed mid-run: continues from the recorded next step (value ignored);
    /// - finished: returns the final state without running anything.
    ///
    /// When `config.checkpoint_id` is set it must name the latest checkpoint; an older
    /// id means the pause was already consumed and yields `StaleCheckpoint`.
    pub async fn resume(
        &self,
        config: RunnableConfig,
        value: serde_json::Value,
    ) -> Result<RunOutcome<S>, EngineError> {
        self.resume_with_context(RunContext::new(config).with_resume_value(value))
            .await
    }

    /// Like `resume`, with a caller-built context. The value is `ctx.resume_value`.
    pub async fn resume_with_context(
        &self,
        mut ctx: RunContext<S>,
    ) -> Result<RunOutcome<S>, EngineError> {
        let result = self.resume_run(&mut ctx).await;
        self.finish(&ctx, result).await
    }

    async fn resume_run(&self, ctx: &mut RunContext<S>) -> Result<RunOutcome<S>, EngineError> {
        let thread_id = ctx
            .config
            .thread_id
            .clone()
            .ok_or(EngineError::ThreadIdRequired)?;
        let Some(cp) = &self.checkpointer else {
            return Err(EngineError::UnknownThread(thread_id));
        };
        let mut latest_config = ctx.config.clone();
        latest_config.checkpoint_id = None;
        let mut latest = cp
            .get_tuple(&latest_config)
            .await?
            .ok_or_else(|| EngineError::UnknownThread(thread_id.clone()))?;
        if let Some(requested) = &ctx.config.checkpoint_id {
            if requested != &latest.id {
                return Err(EngineError::StaleCheckpoint {
                    thread_id,
                    requested: requested.clone(),
                    latest: latest.id,
                });
            }
        }
        log_graph_start(Some(&thread_id));

        let step = match &latest.next {
            CheckpointNext::End => {
                tracing::info!(thread_id = %thread_id, "thread already finished");
                return Ok(RunOutcome::Completed(latest.state));
            }
            CheckpointNext::Interrupted { node, .. } => self.run_step(node.clone())?,
            CheckpointNext::Node { node } => {
                ctx.resume_value = None;
                self.run_step(node.clone())?
            }
            CheckpointNext::Route { source } => {
                ctx.resume_value = None;
                let mut step = self.reroute(source, &latest.state)?;
                if let Step::FanOut { finished, .. } = &mut step {
                    *finished = std::mem::take(&mut latest.pending_writes);
                }
                step
            }
        };
        let step_index = latest.metadata.step;
        self.run_loop(latest.state, step, ctx, step_index, Some(latest.id))
            .await
    }

    /// Streams a run from START. Engine errors arrive as `StreamEvent::Error`.
    pub fn stream(
        &self,
        state: S,
        config: RunnableConfig,
        stream_mode: impl Into<HashSet<StreamMode>>,
    ) -> ReceiverStream<StreamEvent<S>> {
        let (tx, rx) = mpsc::channel(128);
        let graph = self.clone();
        let ctx = RunContext::new(config).with_stream(tx, stream_mode);
        tokio::spawn(async move {
            let _ = graph.invoke_with_context(state, ctx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Streams a resumed run.
    pub fn stream_resume(
        &self,
        config: RunnableConfig,
        value: serde_json::Value,
        stream_mode: impl Into<HashSet<StreamMode>>,
    ) -> ReceiverStream<StreamEvent<S>> {
        let (tx, rx) = mpsc::channel(128);
        let graph = self.clone();
        let ctx = RunContext::new(config)
            .with_resume_value(value)
            .with_stream(tx, stream_mode);
        tokio::spawn(async move {
            let _ = graph.resume_with_context(ctx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Latest checkpoint of the thread (or the one named by `config.checkpoint_id`).
    pub async fn get_state(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<StateSnapshot<S>>, EngineError> {
        let Some(cp) = &self.checkpointer else {
            return Ok(None);
        };
        if config.thread_id.is_none() {
            return Err(EngineError::ThreadIdRequired);
        }
        Ok(cp.get_tuple(config).await?.map(StateSnapshot::from))
    }

    /// Checkpoints of the thread, oldest first; `limit` keeps the newest ones.
    pub async fn state_history(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
    ) -> Result<Vec<StateSnapshot<S>>, EngineError> {
        let Some(cp) = &self.checkpointer else {
            return Ok(Vec::new());
        };
        let items = cp.list(config, limit, None, None).await?;
        let mut snapshots = Vec::with_capacity(items.len());
        for item in items {
            let by_id = config.clone().with_checkpoint(item.checkpoint_id);
            if let Some(checkpoint) = cp.get_tuple(&by_id).await? {
                snapshots.push(StateSnapshot::from(checkpoint));
            }
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio_stream::StreamExt;

    use crate::graph::state::tests::{Counter, CounterUpdate};
    use crate::graph::{StateGraph, START};
    use crate::memory::MemorySaver;

    struct Add(&'static str, i64);

    #[async_trait]
    impl Node<Counter> for Add {
        fn id(&self) -> &str {
            self.0
        }
        async fn run(&self, _state: Counter) -> Result<(CounterUpdate, Next), StageError> {
            Ok((
                CounterUpdate {
                    log: vec![self.0.to_string()],
                    delta: self.1,
                    label: None,
                },
                Next::Continue,
            ))
        }
    }

    struct Fail(&'static str);

    #[async_trait]
    impl Node<Counter> for Fail {
        fn id(&self) -> &str {
            self.0
        }
        async fn run(&self, _state: Counter) -> Result<(CounterUpdate, Next), StageError> {
            Err(StageError::Collaborator("unreachable".into()))
        }
    }

    fn chain() -> StateGraph<Counter> {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Add("a", 1)));
        graph.add_node("b", Arc::new(Add("b", 10)));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        graph
    }

    /// **Scenario**: A linear chain runs every node once and merges their updates.
    #[tokio::test]
    async fn invoke_linear_chain() {
        let graph = chain().compile().unwrap();
        let out = graph
            .invoke(Counter::default(), RunnableConfig::default())
            .await
            .unwrap();
        let state = out.into_state();
        assert_eq!(state.log, vec!["a", "b"]);
        assert_eq!(state.total, 11);
    }

    /// **Scenario**: A failing stage without an error route merges its failure update and ends.
    #[tokio::test]
    async fn failed_stage_ends_run_with_failure_update() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Fail("a")));
        graph.add_node("b", Arc::new(Add("b", 10)));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        let out = graph
            .compile()
            .unwrap()
            .invoke(Counter::default(), RunnableConfig::default())
            .await
            .unwrap();
        let state = out.into_state();
        assert_eq!(state.total, 0);
        assert_eq!(state.log.len(), 1);
        assert!(state.log[0].starts_with("a failed"), "{:?}", state.log);
    }

    /// **Scenario**: With an error route the run continues at the route target.
    #[tokio::test]
    async fn failed_stage_follows_error_route() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Fail("a")));
        graph.add_node("b", Arc::new(Add("b", 10)));
        graph.add_node("c", Arc::new(Add("c", 100)));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        graph.add_edge("c", END);
        let out = graph
            .with_error_route("a", "c")
            .compile()
            .unwrap()
            .invoke(Counter::default(), RunnableConfig::default())
            .await
            .unwrap();
        assert_eq!(out.state().total, 100);
    }

    /// **Scenario**: Checkpoints are written for input and every superstep; the last says End.
    #[tokio::test]
    async fn checkpoints_per_superstep() {
        let saver = Arc::new(MemorySaver::<Counter>::new());
        let graph = chain().compile_with_checkpointer(saver).unwrap();
        let config = RunnableConfig::for_thread("t1");
        graph.invoke(Counter::default(), config.clone()).await.unwrap();

        let history = graph.state_history(&config, None).await.unwrap();
        let steps: Vec<i64> = history.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![-1, 0, 1]);
        assert_eq!(history[0].next, CheckpointNext::node("a"));
        assert_eq!(history[1].next, CheckpointNext::node("b"));
        assert!(history[2].next.is_end());
        let latest = graph.get_state(&config).await.unwrap().unwrap();
        assert_eq!(latest.state.total, 11);
    }

    /// **Scenario**: Resume of a finished thread returns the stored state without running anything.
    #[tokio::test]
    async fn resume_finished_thread_is_noop() {
        let saver = Arc::new(MemorySaver::<Counter>::new());
        let graph = chain().compile_with_checkpointer(saver).unwrap();
        let config = RunnableConfig::for_thread("t1");
        graph.invoke(Counter::default(), config.clone()).await.unwrap();
        let out = graph
            .resume(config.clone(), serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(out.state().total, 11);
        assert_eq!(graph.state_history(&config, None).await.unwrap().len(), 3);
    }

    /// **Scenario**: Resume of an unknown thread is an engine error.
    #[tokio::test]
    async fn resume_unknown_thread() {
        let saver = Arc::new(MemorySaver::<Counter>::new());
        let graph = chain().compile_with_checkpointer(saver).unwrap();
        let err = graph
            .resume(RunnableConfig::for_thread("ghost"), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownThread(ref t) if t == "ghost"));
    }

    /// **Scenario**: A cycle without an exit stops at the step limit.
    #[tokio::test]
    async fn step_limit_stops_cycles() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Add("a", 1)));
        graph.add_edge(START, "a");
        graph.add_conditional_edges(
            "a",
            Arc::new(|s: &Counter| if s.total < 0 { Route::End } else { Route::to("a") }),
            None,
        );
        let err = graph
            .with_step_limit(5)
            .compile()
            .unwrap()
            .invoke(Counter::default(), RunnableConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StepLimitExceeded(5)));
    }

    /// **Scenario**: Stream in Updates mode yields one Updates event per stage, then closes.
    #[tokio::test]
    async fn stream_updates_per_stage() {
        let graph = chain().compile().unwrap();
        let events: Vec<_> = graph
            .stream(
                Counter::default(),
                RunnableConfig::default(),
                [StreamMode::Updates],
            )
            .collect()
            .await;
        let nodes: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Updates { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(nodes, vec!["a", "b"]);
    }
}
