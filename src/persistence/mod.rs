//! The `persistence` module keeps the game history the server receives.
//!
//! Game logs are stored in an embedded `sled` tree so that the server's log
//! subscription can acknowledge a record only once it is on disk.

pub mod sled_store;

pub use sled_store::GameLogStore;

use crate::routing::GameLog;
use crate::utils::error::StoreError;

/// Somewhere game logs can be written to.
pub trait LogSink: Send + Sync + 'static {
    fn append(&self, log: &GameLog) -> Result<(), StoreError>;
}

impl LogSink for GameLogStore {
    fn append(&self, log: &GameLog) -> Result<(), StoreError> {
        GameLogStore::append(self, log)
    }
}
