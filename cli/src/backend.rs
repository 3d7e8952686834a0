//! Builds a `ResearchRunner` over SQLite or in-process storage.

use std::path::PathBuf;
use std::sync::Arc;

use deepresearch::research::mock::offline_collaborators;
use deepresearch::research::{ResearchConfig, WorkflowState};
use deepresearch::{
    Checkpointer, InMemoryStore, JsonSerializer, MemorySaver, ResearchRunner, SqliteSaver,
    SqliteStore, Store,
};

use crate::CliError;

/// Where checkpoints and archived conversations live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// One SQLite file holds both the `checkpoints` and `store_kv` tables.
    Sqlite(PathBuf),
    /// Gone when the process exits.
    InMemory,
}

/// Runner with the scripted offline collaborators.
pub fn open_runner(storage: &Storage, config: ResearchConfig) -> Result<ResearchRunner, CliError> {
    let (checkpointer, store): (Arc<dyn Checkpointer<WorkflowState>>, Arc<dyn Store>) =
        match storage {
            Storage::InMemory => {
                let saver: MemorySaver<WorkflowState> = MemorySaver::new();
                (Arc::new(saver), Arc::new(InMemoryStore::new()))
            }
            Storage::Sqlite(path) => {
                tracing::debug!(path = %path.display(), "opening sqlite storage");
                let serializer: JsonSerializer<WorkflowState> = JsonSerializer::new();
                let saver = SqliteSaver::<WorkflowState>::new(path, Arc::new(serializer))?;
                (Arc::new(saver), Arc::new(SqliteStore::new(path)?))
            }
        };
    Ok(ResearchRunner::new(
        offline_collaborators(),
        config,
        checkpointer,
        Some(store),
    )?)
}
