//! Single-stage failures: panics and timeouts become state and follow the error route.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deepresearch::graph::{StateGraph, END, START};
use deepresearch::{RunnableConfig, StreamEvent, StreamMode};
use tokio_stream::StreamExt;

use crate::common::{Explode, Push, SlowOnce, Tally};

/// **Scenario**: A panicking stage is recorded and the run continues at its error route.
#[tokio::test]
async fn panic_follows_error_route() {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("explode", Arc::new(Explode))
        .add_node("recover", Arc::new(Push("recover")))
        .add_node("never", Arc::new(Push("never")))
        .add_edge(START, "explode")
        .add_edge("explode", "never")
        .add_edge("never", END)
        .add_edge("recover", END);
    let compiled = graph.with_error_route("explode", "recover").compile().unwrap();

    let state = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap()
        .into_state();
    assert_eq!(state.log, vec!["recover"]);
    assert_eq!(state.failures.len(), 1);
    assert!(state.failures[0].starts_with("explode:-:stage panicked"));
}

/// **Scenario**: A stage over its timeout fails with `Timeout`; without an error route the run ends.
#[tokio::test]
async fn stage_timeout_ends_run() {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("slow", Arc::new(SlowOnce::new()))
        .add_node("after", Arc::new(Push("after")))
        .add_edge(START, "slow")
        .add_edge("slow", "after")
        .add_edge("after", END);
    let compiled = graph
        .with_stage_timeout(Duration::from_millis(50))
        .compile()
        .unwrap();

    let started = Instant::now();
    let state = compiled
        .invoke(Tally::default(), RunnableConfig::default())
        .await
        .unwrap()
        .into_state();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(state.log.is_empty());
    assert_eq!(state.failures.len(), 1);
    assert!(state.failures[0].contains("timed out"));
}

/// **Scenario**: Tasks mode reports start and end of each stage, with the failure message.
#[tokio::test]
async fn tasks_mode_reports_failures() {
    let mut graph = StateGraph::<Tally>::new();
    graph
        .add_node("a", Arc::new(Push("a")))
        .add_node("explode", Arc::new(Explode))
        .add_edge(START, "a")
        .add_edge("a", "explode")
        .add_edge("explode", END);
    let compiled = graph.compile().unwrap();

    let mut stream = compiled.stream(Tally::default(), RunnableConfig::default(), [StreamMode::Tasks]);
    let mut seen = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::TaskStart { node_id, .. } => seen.push(format!("start:{}", node_id)),
            StreamEvent::TaskEnd {
                node_id, result, ..
            } => seen.push(match result {
                Ok(()) => format!("ok:{}", node_id),
                Err(e) => format!("err:{}:{}", node_id, e.contains("panicked")),
            }),
            _ => {}
        }
    }
    assert_eq!(seen, vec!["start:a", "ok:a", "start:explode", "err:explode:true"]);
}
