//! Game-log store backed by `sled`
//!
//! Each record is stored as JSON under a key made of the zero-padded
//! timestamp (milliseconds) followed by a UUID, so iteration yields logs in
//! chronological order and two logs from the same millisecond never collide.

use sled::{Db, Tree};
use uuid::Uuid;

use crate::routing::GameLog;
use crate::utils::error::StoreError;

const GAME_LOG_TREE: &str = "game_logs";

#[derive(Clone)]
pub struct GameLogStore {
    db: Db,
    logs: Tree,
}

impl GameLogStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let logs = db.open_tree(GAME_LOG_TREE)?;
        Ok(Self { db, logs })
    }

    /// Store a log and flush it before returning.
    pub fn append(&self, log: &GameLog) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec(log)?;
        let key = format!(
            "{:020}_{}",
            log.current_time.timestamp_millis(),
            Uuid::new_v4()
        );
        self.logs.insert(key.as_bytes(), serialized)?;
        self.logs.flush()?;
        Ok(())
    }

    /// All stored logs, oldest first. Entries that fail to parse are skipped.
    pub fn load(&self) -> Result<Vec<GameLog>, StoreError> {
        let mut logs = Vec::new();
        for entry in self.logs.iter() {
            let (_, value) = entry?;
            match serde_json::from_slice(&value) {
                Ok(log) => logs.push(log),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable game log"),
            }
        }
        Ok(logs)
    }

    /// Logs written by `username`, oldest first.
    pub fn load_for(&self, username: &str) -> Result<Vec<GameLog>, StoreError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|log| log.username == username)
            .collect())
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl std::fmt::Debug for GameLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameLogStore")
            .field("db", &"sled::Db")
            .field("logs", &self.logs.len())
            .finish()
    }
}
