//! Serializer for checkpoint state (state <-> bytes).
//!
//! Used by persistent checkpointers. `MemorySaver` keeps `Checkpoint<S>` values
//! directly and does not need one.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::memory::checkpointer::CheckpointError;

/// Serializes and deserializes state for checkpoint storage.
///
/// **Interaction**: Used by `SqliteSaver` for the `payload` column.
pub trait Serializer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    fn serialize(&self, state: &S) -> Result<Vec<u8>, CheckpointError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<S, CheckpointError>;
}

/// JSON serializer for any serde state.
pub struct JsonSerializer<S> {
    _marker: PhantomData<fn() -> S>,
}

impl<S> JsonSerializer<S> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<S> Default for JsonSerializer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Serializer<S> for JsonSerializer<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn serialize(&self, state: &S) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec(state).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<S, CheckpointError> {
        serde_json::from_slice(bytes).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }
}
