//! # hive-checkpoint - Checkpoint persistence for Hive
//!
//! Data model and storage contract for Hive's durable execution snapshots.
//! The runtime engine (`hive-core`) writes a [`Checkpoint`] after committed
//! supersteps and restores from one on resume; this crate defines that
//! structure, the [`CheckpointStore`] backend trait, serializer protocols for
//! blob-storing backends, and an in-memory reference store.
//!
//! ## What a checkpoint holds
//!
//! - committed **global channel data**, one codec-produced byte string per
//!   checkpointed channel
//! - the **frontier** of tasks scheduled for the next superstep, including
//!   each task's overlay bytes and its 32-byte local fingerprint
//! - **join barrier progress** for every compiled join
//! - the **pending interruption**, when saved at an interrupt boundary
//! - identity and versioning: thread id, run id, next step index, and the
//!   canonical schema/graph version digests the data was written under
//!
//! ## Storage backends
//!
//! [`InMemoryCheckpointStore`] ships in this crate for tests and demos.
//! Durable backends implement [`CheckpointStore`] (two methods: atomic
//! `save`, max-step `load_latest`) and may delegate envelope encoding to a
//! [`SerializerProtocol`].
//!
//! ```rust
//! use hive_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
//!
//! #[tokio::main]
//! async fn main() -> hive_checkpoint::Result<()> {
//!     let store = InMemoryCheckpointStore::new();
//!     assert!(store.load_latest("thread-1").await?.is_none());
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointTask, Interruption, TaskProvenance};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
