//! Pause and resume: interrupts are checkpointed, resume tokens are single-use,
//! paused threads survive a restart of the checkpointer, cancelled runs resume where they stopped.

use std::sync::Arc;
use std::time::Duration;

use deepresearch::graph::{Dispatch, Route, StateGraph, END, START};
use deepresearch::memory::{CheckpointNext, Checkpointer, JsonSerializer, MemorySaver, SqliteSaver};
use deepresearch::{EngineError, RunContext, RunOutcome, RunnableConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::common::{CountingWorker, Gate, Push, SlowOnce, Tally};

/// a -> gate -> b -> END
fn gated(checkpointer: Arc<dyn Checkpointer<Tally>>) -> deepresearch::CompiledStateGraph<Tally> {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("a", Arc::new(Push("a")))
        .add_node("gate", Arc::new(Gate))
        .add_node("b", Arc::new(Push("b")))
        .add_edge(START, "a")
        .add_edge("a", "gate")
        .add_edge("gate", "b")
        .add_edge("b", END);
    graph.compile_with_checkpointer(checkpointer).unwrap()
}

fn sqlite_saver(path: &std::path::Path) -> Arc<dyn Checkpointer<Tally>> {
    let serializer: JsonSerializer<Tally> = JsonSerializer::new();
    Arc::new(SqliteSaver::<Tally>::new(path, Arc::new(serializer)).unwrap())
}

/// **Scenario**: The gate pauses the run; resuming with a value finishes it.
#[tokio::test]
async fn interrupt_then_resume_completes() {
    let compiled = gated(Arc::new(MemorySaver::<Tally>::new()));
    let config = RunnableConfig::for_thread("t-gate");

    let outcome = compiled.invoke(Tally::default(), config.clone()).await.unwrap();
    let RunOutcome::Interrupted { state, interrupt } = outcome else {
        panic!("expected interrupt");
    };
    assert_eq!(state.log, vec!["a"]);
    assert_eq!(interrupt.id.as_deref(), Some("gate"));
    assert_eq!(interrupt.value["total"], 1);

    let snapshot = compiled.get_state(&config).await.unwrap().unwrap();
    assert!(matches!(snapshot.next, CheckpointNext::Interrupted { ref node, .. } if node == "gate"));

    let outcome = compiled.resume(config.clone(), json!("yes")).await.unwrap();
    assert!(!outcome.is_interrupted());
    assert_eq!(outcome.state().log, vec!["a", "gate:yes", "b"]);

    let snapshot = compiled.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, CheckpointNext::End);
}

/// **Scenario**: New input on a paused thread is rejected.
#[tokio::test]
async fn invoke_on_paused_thread_is_busy() {
    let compiled = gated(Arc::new(MemorySaver::<Tally>::new()));
    let config = RunnableConfig::for_thread("t-busy");
    compiled.invoke(Tally::default(), config.clone()).await.unwrap();
    let err = compiled.invoke(Tally::default(), config).await;
    assert!(matches!(err, Err(EngineError::ThreadBusy(ref t)) if t == "t-busy"));
}

/// **Scenario**: A resume token names one pause; reusing it after the run moved on is stale.
#[tokio::test]
async fn resume_token_is_single_use() {
    let compiled = gated(Arc::new(MemorySaver::<Tally>::new()));
    let config = RunnableConfig::for_thread("t-token");
    compiled.invoke(Tally::default(), config.clone()).await.unwrap();
    let token = compiled
        .get_state(&config)
        .await
        .unwrap()
        .unwrap()
        .checkpoint_id;

    let first = compiled
        .resume(config.clone().with_checkpoint(token.clone()), json!("once"))
        .await
        .unwrap();
    assert_eq!(first.state().log, vec!["a", "gate:once", "b"]);

    let second = compiled
        .resume(config.clone().with_checkpoint(token.clone()), json!("twice"))
        .await;
    assert!(matches!(
        second,
        Err(EngineError::StaleCheckpoint { ref requested, .. }) if *requested == token
    ));
    // The executed step did not run again.
    let state = compiled.get_state(&config).await.unwrap().unwrap().state;
    assert_eq!(state.log.iter().filter(|l| l.starts_with("gate:")).count(), 1);
}

/// **Scenario**: A pause written to SQLite is resumed by a graph built after a restart.
#[tokio::test]
async fn paused_thread_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let config = RunnableConfig::for_thread("t-restart");

    {
        let compiled = gated(sqlite_saver(&db));
        let outcome = compiled.invoke(Tally::default(), config.clone()).await.unwrap();
        assert!(outcome.is_interrupted());
    }

    let compiled = gated(sqlite_saver(&db));
    let snapshot = compiled.get_state(&config).await.unwrap().unwrap();
    assert!(matches!(snapshot.next, CheckpointNext::Interrupted { .. }));
    assert_eq!(snapshot.state.log, vec!["a"]);

    let outcome = compiled.resume(config.clone(), json!("later")).await.unwrap();
    assert_eq!(outcome.state().log, vec!["a", "gate:later", "b"]);
    let history = compiled.state_history(&config, None).await.unwrap();
    assert_eq!(history.last().map(|s| s.next.clone()), Some(CheckpointNext::End));
}

/// **Scenario**: Cancelling mid-stage returns `Cancelled`; resume continues at the cancelled stage.
#[tokio::test]
async fn cancelled_run_resumes_at_cancelled_stage() {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("a", Arc::new(Push("a")))
        .add_node("slow", Arc::new(SlowOnce::new()))
        .add_node("b", Arc::new(Push("b")))
        .add_edge(START, "a")
        .add_edge("a", "slow")
        .add_edge("slow", "b")
        .add_edge("b", END);
    let compiled = graph
        .compile_with_checkpointer(Arc::new(MemorySaver::<Tally>::new()))
        .unwrap();
    let config = RunnableConfig::for_thread("t-cancel");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let ctx = RunContext::new(config.clone()).with_cancellation(cancel);
    let result = compiled.invoke_with_context(Tally::default(), ctx).await;
    assert!(matches!(result, Err(EngineError::Cancelled)));

    let snapshot = compiled.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, CheckpointNext::node("slow"));
    assert_eq!(snapshot.state.log, vec!["a"]);

    let outcome = compiled.resume(config, json!(null)).await.unwrap();
    assert_eq!(outcome.state().log, vec!["a", "slow", "b"]);
}

/// **Scenario**: Cancelling a fan-out keeps the dispatches that already finished;
/// resume runs only the unfinished one, then the join.
#[tokio::test]
async fn cancelled_fan_out_resumes_unfinished_dispatches() {
    let worker = CountingWorker::default();
    let runs = worker.runs.clone();
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("plan", Arc::new(Push("plan")))
        .add_node("work", Arc::new(worker))
        .add_node("collect", Arc::new(Push("collect")))
        .add_edge(START, "plan")
        .add_conditional_edges(
            "plan",
            Arc::new(|state: &Tally| {
                Route::Send(
                    ["quick", "stall"]
                        .iter()
                        .map(|item| {
                            let mut narrowed = state.clone();
                            narrowed.item = Some(item.to_string());
                            Dispatch::new("work", narrowed)
                        })
                        .collect(),
                )
            }),
            None,
        )
        .add_edge("work", "collect")
        .add_edge("collect", END);
    let compiled = graph
        .compile_with_checkpointer(Arc::new(MemorySaver::<Tally>::new()))
        .unwrap();
    let config = RunnableConfig::for_thread("t-fan-cancel");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    let ctx = RunContext::new(config.clone()).with_cancellation(cancel);
    let result = compiled.invoke_with_context(Tally::default(), ctx).await;
    assert!(matches!(result, Err(EngineError::Cancelled)));

    let snapshot = compiled.get_state(&config).await.unwrap().unwrap();
    assert_eq!(
        snapshot.next,
        CheckpointNext::Route {
            source: "plan".into()
        }
    );
    assert_eq!(snapshot.state.log, vec!["plan"]);

    let outcome = compiled.resume(config, json!(null)).await.unwrap();
    assert_eq!(
        outcome.state().log,
        vec!["plan", "work:quick", "work:stall", "collect"]
    );
    let mut runs = runs.lock().unwrap().clone();
    runs.sort();
    assert_eq!(runs, vec!["quick", "stall", "stall"]);
}
