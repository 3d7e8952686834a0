//! Persistence: checkpoints (short-term, per thread) and Store (long-term, cross-thread).
//!
//! - `Checkpointer` + `MemorySaver` / `SqliteSaver`: one checkpoint per superstep and
//!   on every pause, so runs resume without replaying completed stages.
//! - `Store` + `InMemoryStore` / `SqliteStore`: namespaced key/value records.

mod checkpoint;
mod checkpointer;
mod config;
mod in_memory_store;
mod memory_saver;
mod serializer;
mod sqlite_saver;
mod sqlite_store;
mod store;

pub use checkpoint::{
    Checkpoint, CheckpointListItem, CheckpointMetadata, CheckpointNext, CheckpointSource,
    PendingWrite,
};
pub use checkpointer::{CheckpointError, Checkpointer};
pub use config::RunnableConfig;
pub use in_memory_store::InMemoryStore;
pub use memory_saver::MemorySaver;
pub use serializer::{JsonSerializer, Serializer};
pub use sqlite_saver::SqliteSaver;
pub use sqlite_store::SqliteStore;
pub use store::{Item, Namespace, Store, StoreError};
