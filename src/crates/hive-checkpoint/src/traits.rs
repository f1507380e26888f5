//! Checkpoint store contract for custom backend implementations
//!
//! This module defines [`CheckpointStore`] - the abstraction a persistence
//! backend implements to plug into the runtime. The runtime calls exactly two
//! operations and relies on the guarantees documented on each.
//!
//! # Contract
//!
//! - **Atomicity** - `save` returns success only once the checkpoint is
//!   durable; a partially written checkpoint must never be observable by
//!   `load_latest`.
//! - **Per-thread linearizability** - after `save(c)` returns, a
//!   `load_latest(thread_id)` on the same thread id returns `c` or a
//!   checkpoint with a strictly greater step index.
//! - **Inter-thread safety** - concurrent calls for distinct thread ids must
//!   be safe; the runtime never issues concurrent calls for one thread id.
//! - **Error propagation** - errors are returned, never swallowed. A failed
//!   `save` aborts the commit that requested it; a failed `load_latest`
//!   aborts the attempt before its first step.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use hive_checkpoint::{Checkpoint, CheckpointStore, Result, CheckpointError};
//!
//! struct PostgresStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointStore for PostgresStore {
//!     async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
//!         let body = serde_json::to_vec(checkpoint)?;
//!         sqlx::query("insert into checkpoints (thread_id, step, id, body) \
//!                      values ($1, $2, $3, $4) on conflict (id) do update set body = $4")
//!             .bind(&checkpoint.thread_id)
//!             .bind(checkpoint.step_index as i64)
//!             .bind(&checkpoint.id)
//!             .bind(body)
//!             .execute(&self.pool)
//!             .await
//!             .map_err(|e| CheckpointError::Storage(e.to_string()))?;
//!         Ok(())
//!     }
//!
//!     async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
//!         // select ... order by step desc, id desc limit 1
//!         # unimplemented!()
//!     }
//! }
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage for checkpoints
///
/// See the [module documentation](self) for the guarantees implementations
/// must provide.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint atomically
    ///
    /// Saving a checkpoint whose id already exists replaces the stored copy;
    /// this happens when an attempt re-commits a step after a prior attempt
    /// failed between save and publish.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the latest checkpoint for a thread
    ///
    /// "Latest" is the checkpoint with the maximum `step_index`, ties broken
    /// by the lexicographically greatest checkpoint id. Returns `Ok(None)`
    /// when the thread has no checkpoints.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;
}
