//! Fan-out / fan-in: every dispatch runs, failures stay local, merge follows arrival order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deepresearch::graph::{Dispatch, Route, StateGraph, END, START};
use deepresearch::{EngineError, RunnableConfig, StreamEvent, StreamMode};
use tokio_stream::StreamExt;

use crate::common::{ItemWorker, Push, Tally};

/// plan -> Send(work × items) -> collect -> END
fn fan_out_graph(items: &'static [&'static str]) -> StateGraph<Tally> {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("plan", Arc::new(Push("plan")))
        .add_node("work", Arc::new(ItemWorker))
        .add_node("collect", Arc::new(Push("collect")))
        .add_edge(START, "plan")
        .add_conditional_edges(
            "plan",
            Arc::new(move |state: &Tally| {
                Route::Send(
                    items
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
    graph
}

fn work_entries(state: &Tally) -> Vec<String> {
    let mut entries: Vec<String> = state
        .log
        .iter()
        .filter(|l| l.starts_with("work:"))
        .cloned()
        .collect();
    entries.sort();
    entries
}

/// **Scenario**: Three dispatches all run; their updates merge before the join node runs.
#[tokio::test]
async fn every_dispatch_runs_and_merges() {
    let compiled = fan_out_graph(&["a", "b", "c"]).compile().unwrap();
    let state = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap()
        .into_state();
    assert_eq!(work_entries(&state), vec!["work:a", "work:b", "work:c"]);
    assert_eq!(state.total, 5);
    assert_eq!(state.log.first().map(String::as_str), Some("plan"));
    assert_eq!(state.log.last().map(String::as_str), Some("collect"));
    assert!(state.failures.is_empty());
}

/// **Scenario**: An error and a panic in two dispatches leave the third intact and the run continues.
#[tokio::test]
async fn failing_dispatches_do_not_abort_siblings() {
    let compiled = fan_out_graph(&["fail-b", "ok", "panic-c"]).compile().unwrap();
    let state = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap()
        .into_state();
    assert_eq!(work_entries(&state), vec!["work:ok"]);
    assert_eq!(state.failures.len(), 2);
    assert!(state
        .failures
        .iter()
        .any(|f| f.starts_with("work:fail-b:") && f.contains("cannot do fail-b")));
    assert!(state
        .failures
        .iter()
        .any(|f| f.starts_with("work:panic-c:") && f.contains("panicked")));
    assert_eq!(state.log.last().map(String::as_str), Some("collect"));
}

/// **Scenario**: Results are merged in the order they arrive, not dispatch order.
#[tokio::test]
async fn merge_follows_arrival_order() {
    let compiled = fan_out_graph(&["wait400-a", "wait0-b", "wait200-c"])
        .compile()
        .unwrap();
    let mut stream = compiled.stream(
        Tally::default(),
        RunnableConfig::default(),
        [StreamMode::Updates, StreamMode::Values],
    );
    let mut indices = Vec::new();
    let mut last_values = None;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Updates {
                node_id,
                task_index,
                ..
            } if node_id == "work" => indices.push(task_index),
            StreamEvent::Values(state) => last_values = Some(state),
            _ => {}
        }
    }
    assert_eq!(indices, vec![Some(1), Some(2), Some(0)]);
    let state = last_values.expect("values events");
    let order: Vec<&str> = state
        .log
        .iter()
        .filter(|l| l.starts_with("work:"))
        .map(String::as_str)
        .collect();
    assert_eq!(order, vec!["work:wait0-b", "work:wait200-c", "work:wait400-a"]);
}

/// **Scenario**: A dispatch over its node timeout fails alone; the superstep does not wait for it.
#[tokio::test]
async fn dispatch_timeout_is_local_failure() {
    let compiled = fan_out_graph(&["slow-x", "quick"])
        .with_node_timeout("work", Duration::from_millis(100))
        .compile()
        .unwrap();
    let started = Instant::now();
    let state = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap()
        .into_state();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(work_entries(&state), vec!["work:quick"]);
    assert_eq!(state.failures.len(), 1);
    assert!(state.failures[0].starts_with("work:slow-x:"));
    assert!(state.failures[0].contains("timed out"));
}

/// **Scenario**: An empty dispatch list ends the run without running the join node.
#[tokio::test]
async fn empty_send_ends_run() {
    let compiled = fan_out_graph(&[]).compile().unwrap();
    let outcome = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap();
    assert!(!outcome.is_interrupted());
    assert_eq!(outcome.state().log, vec!["plan".to_string()]);
}

/// plan -> Send(left, right) -> left -> `left_to`, right -> `right_to`
fn two_target_graph(left_to: &'static str, right_to: &'static str) -> StateGraph<Tally> {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("plan", Arc::new(Push("plan")))
        .add_node("left", Arc::new(Push("left")))
        .add_node("right", Arc::new(Push("right")))
        .add_node("collect", Arc::new(Push("collect")))
        .add_node("audit", Arc::new(Push("audit")))
        .add_edge(START, "plan")
        .add_conditional_edges(
            "plan",
            Arc::new(|state: &Tally| {
                Route::Send(vec![
                    Dispatch::new("left", state.clone()),
                    Dispatch::new("right", state.clone()),
                ])
            }),
            None,
        )
        .add_edge("left", left_to)
        .add_edge("right", right_to)
        .add_edge("collect", END)
        .add_edge("audit", END);
    graph
}

/// **Scenario**: Dispatches to different nodes that share one successor join there once.
#[tokio::test]
async fn mixed_targets_join_shared_successor() {
    let compiled = two_target_graph("collect", "collect").compile().unwrap();
    let state = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap()
        .into_state();
    let mut middle: Vec<&str> = state.log[1..3].iter().map(String::as_str).collect();
    middle.sort();
    assert_eq!(middle, vec!["left", "right"]);
    assert_eq!(state.log.len(), 4);
    assert_eq!(state.log.last().map(String::as_str), Some("collect"));
}

/// **Scenario**: Dispatch targets with different successors fail the run, naming them sorted.
#[tokio::test]
async fn divergent_successors_fail_fan_in() {
    let compiled = two_target_graph("collect", "audit").compile().unwrap();
    let err = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap_err();
    match err {
        EngineError::DivergentFanIn(successors) => {
            assert_eq!(successors, vec!["audit".to_string(), "collect".to_string()]);
        }
        other => panic!("expected DivergentFanIn, got {:?}", other),
    }
}
