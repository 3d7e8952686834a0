//! Library side of the `deepresearch` binary: runner construction and event rendering.
//!
//! `main.rs` owns argument parsing and logging; everything here is testable without a process.

mod backend;
pub mod output;

pub use backend::{open_runner, Storage};
pub use output::{truncate_message, EventPrinter};

use deepresearch::research::ConfigError;
use deepresearch::{CheckpointError, CompilationError, EngineError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("graph: {0}")]
    Compile(#[from] CompilationError),
    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("conversation store: {0}")]
    Store(#[from] StoreError),
    #[error("output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("output: {0}")]
    Io(#[from] std::io::Error),
}
