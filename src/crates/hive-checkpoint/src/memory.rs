//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] is the reference implementation of
//! [`CheckpointStore`]: a thread-safe map from thread id to the checkpoints
//! saved for it. Suitable for tests, demos and short-lived processes; data
//! does not survive a restart.
//!
//! # Example
//!
//! ```rust
//! use hive_checkpoint::InMemoryCheckpointStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryCheckpointStore::new();
//!     assert_eq!(store.checkpoint_count().await, 0);
//! }
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage entry: the checkpoint plus the wall-clock save time
///
/// The timestamp is observability metadata only; ordering is always by
/// `(step_index, id)`.
#[derive(Debug, Clone)]
struct StoredEntry {
    checkpoint: Checkpoint,
    saved_at: DateTime<Utc>,
}

type Storage = Arc<RwLock<HashMap<String, Vec<StoredEntry>>>>;

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Storage,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// When the given checkpoint id was last saved, if it exists
    pub async fn saved_at(&self, thread_id: &str, checkpoint_id: &str) -> Option<DateTime<Utc>> {
        self.storage
            .read()
            .await
            .get(thread_id)?
            .iter()
            .find(|e| e.checkpoint.id == checkpoint_id)
            .map(|e| e.saved_at)
    }

    /// Drop every checkpoint (test isolation)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut storage = self.storage.write().await;
        let entries = storage
            .entry(checkpoint.thread_id.clone())
            .or_insert_with(Vec::new);
        let entry = StoredEntry {
            checkpoint: checkpoint.clone(),
            saved_at: Utc::now(),
        };
        // Re-saving the same id replaces the stored copy.
        match entries.iter_mut().find(|e| e.checkpoint.id == checkpoint.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|entries| {
            entries
                .iter()
                .max_by(|a, b| {
                    a.checkpoint
                        .step_index
                        .cmp(&b.checkpoint.step_index)
                        .then_with(|| a.checkpoint.id.cmp(&b.checkpoint.id))
                })
                .map(|e| e.checkpoint.clone())
        }))
    }
}
