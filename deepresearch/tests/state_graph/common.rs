//! Shared state and stages for the engine integration tests.
//!
//! `Tally` appends a log, sums a counter and records failures; the stages below push
//! labels, fan out over items, pause for input, sleep or panic on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deepresearch::graph::{GraphInterrupt, GraphState, Interrupt, Next, Node, RunContext};
use deepresearch::StageError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub log: Vec<String>,
    pub total: i64,
    /// Set only in a fan-out dispatch.
    pub item: Option<String>,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyUpdate {
    pub log: Vec<String>,
    pub delta: i64,
    pub failures: Vec<String>,
}

impl GraphState for Tally {
    type Update = TallyUpdate;

    fn apply(&mut self, update: &TallyUpdate) {
        self.log.extend(update.log.iter().cloned());
        self.total += update.delta;
        self.failures.extend(update.failures.iter().cloned());
    }

    fn failure_update(node_id: &str, input: &Self, error: &StageError) -> TallyUpdate {
        let item = input.item.as_deref().unwrap_or("-");
        TallyUpdate {
            failures: vec![format!("{}:{}:{}", node_id, item, error)],
            ..Default::default()
        }
    }
}

pub fn logged(label: impl Into<String>) -> TallyUpdate {
    TallyUpdate {
        log: vec![label.into()],
        delta: 1,
        ..Default::default()
    }
}

/// Logs its label and continues.
pub struct Push(pub &'static str);

#[async_trait]
impl Node<Tally> for Push {
    fn id(&self) -> &str {
        self.0
    }

    async fn run(&self, _state: Tally) -> Result<(TallyUpdate, Next), StageError> {
        Ok((logged(self.0), Next::Continue))
    }
}

/// Fan-out worker. Item names drive behaviour: `fail*` errors, `panic*` panics,
/// `slow*` sleeps for a minute, `wait<ms>*` sleeps that many milliseconds.
pub struct ItemWorker;

#[async_trait]
impl Node<Tally> for ItemWorker {
    fn id(&self) -> &str {
        "work"
    }

    async fn run(&self, state: Tally) -> Result<(TallyUpdate, Next), StageError> {
        let item = state
            .item
            .ok_or_else(|| StageError::ExecutionFailed("no item".into()))?;
        if item.starts_with("fail") {
            return Err(StageError::ExecutionFailed(format!("cannot do {}", item)));
        }
        if item.starts_with("panic") {
            panic!("worker blew up on {}", item);
        }
        if item.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if let Some(rest) = item.strip_prefix("wait") {
            let ms: u64 = rest
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        Ok((logged(format!("work:{}", item)), Next::Continue))
    }
}

/// Fan-out worker that records every run. `stall*` items sleep for a minute on
/// their first run only.
#[derive(Default)]
pub struct CountingWorker {
    pub runs: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Node<Tally> for CountingWorker {
    fn id(&self) -> &str {
        "work"
    }

    async fn run(&self, state: Tally) -> Result<(TallyUpdate, Next), StageError> {
        let item = state
            .item
            .ok_or_else(|| StageError::ExecutionFailed("no item".into()))?;
        let first_run = {
            let mut runs = self.runs.lock().unwrap();
            let first = !runs.contains(&item);
            runs.push(item.clone());
            first
        };
        if first_run && item.starts_with("stall") {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok((logged(format!("work:{}", item)), Next::Continue))
    }
}

/// Pauses until resumed; logs the resume value.
pub struct Gate;

#[async_trait]
impl Node<Tally> for Gate {
    fn id(&self) -> &str {
        "gate"
    }

    async fn run(&self, state: Tally) -> Result<(TallyUpdate, Next), StageError> {
        Err(GraphInterrupt(Interrupt::with_id(
            serde_json::json!({"question": "continue?", "total": state.total}),
            "gate",
        ))
        .into())
    }

    async fn run_with_context(
        &self,
        state: Tally,
        ctx: &RunContext<Tally>,
    ) -> Result<(TallyUpdate, Next), StageError> {
        match ctx.resume_value.as_ref().and_then(|v| v.as_str()) {
            Some(answer) => Ok((logged(format!("gate:{}", answer)), Next::Continue)),
            None => self.run(state).await,
        }
    }
}

/// Sleeps for a minute on its first run only; later runs log and continue.
pub struct SlowOnce {
    pub slept: Arc<AtomicBool>,
}

impl SlowOnce {
    pub fn new() -> Self {
        Self {
            slept: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Node<Tally> for SlowOnce {
    fn id(&self) -> &str {
        "slow"
    }

    async fn run(&self, _state: Tally) -> Result<(TallyUpdate, Next), StageError> {
        if !self.slept.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok((logged("slow"), Next::Continue))
    }
}

/// Panics every time.
pub struct Explode;

#[async_trait]
impl Node<Tally> for Explode {
    fn id(&self) -> &str {
        "explode"
    }

    async fn run(&self, _state: Tally) -> Result<(TallyUpdate, Next), StageError> {
        panic!("explode stage panicked");
    }
}
