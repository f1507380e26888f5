//! # hive-core - Deterministic superstep graph runtime
//!
//! Hive executes directed graphs of asynchronous nodes over typed state
//! channels using the bulk-synchronous-parallel (Pregel) superstep model:
//! every step runs the scheduled frontier concurrently, merges the resulting
//! writes deterministically through per-channel reducers, commits
//! atomically, derives the next frontier, and optionally checkpoints - so an
//! interrupted run resumes bit-identically.
//!
//! ## Core concepts
//!
//! - **Channels** ([`channel`]) - named typed state slots with a scope
//!   (global or task-local), persistence class, update policy, reducer and
//!   canonical codec.
//! - **Schema** ([`schema`]) - the declared channel set; validated per
//!   attempt into a registry with a cached initial value per channel.
//! - **Graph** ([`graph`]) - nodes, static edges, routers and join barriers,
//!   compiled into an immutable structure with canonical schema/graph
//!   version digests.
//! - **Nodes** ([`node`]) - async units returning writes, spawned child
//!   tasks, a routing decision and an optional interrupt request. Nodes read
//!   through a composed view and never observe sibling writes from the same
//!   step.
//! - **Engine** ([`engine`]) - the attempt loop: bounded-parallel compute,
//!   the deterministically-ordered commit phase, checkpoint save/load,
//!   interrupt selection and resume.
//! - **Events** ([`stream`]) - a bounded ring of lifecycle and model-stream
//!   events with backpressure, token coalescing and an optional
//!   deterministic per-task buffering mode.
//! - **Runtime** ([`runtime`]) - per-thread FIFO serialization of
//!   `run` / `resume` / `apply_external_writes`, with cooperative
//!   cancellation.
//!
//! ## Determinism
//!
//! Given the same compiled graph, input, clock and node behavior, two runs
//! produce bit-identical committed states and event traces (attempt ids
//! aside). Everything order-sensitive is pinned: writes reduce in
//! `(task ordinal, emission index)` order, channels are processed in
//! ascending UTF-8 id order, routing follows builder-insertion order, and
//! every identifier is a SHA-256 over a length-prefixed canonical framing
//! ([`canonical`]).
//!
//! ## Quick start
//!
//! ```rust
//! use hive_core::channel::ChannelSpec;
//! use hive_core::graph::GraphBuilder;
//! use hive_core::node::NodeOutput;
//! use hive_core::schema::Schema;
//! use hive_core::{Hive, RunOptions, RunOutcome};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Schema::new(vec![ChannelSpec::appending("log")]);
//!     let graph = GraphBuilder::new(schema)
//!         .add_start("hello")
//!         .add_node("hello", |_ctx| {
//!             Box::pin(async move {
//!                 Ok(NodeOutput::new().with_write("log", json!(["hello"])).end())
//!             })
//!         })
//!         .compile()?;
//!
//!     let hive = Hive::new(graph);
//!     let handle = hive.run("thread-1", json!(null), RunOptions::default());
//!     match handle.outcome().await {
//!         Ok(RunOutcome::Finished { output, .. }) => {
//!             assert_eq!(output["log"], json!(["hello"]));
//!         }
//!         other => panic!("unexpected outcome: {other:?}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Checkpointing
//!
//! Attach a [`hive_checkpoint::CheckpointStore`] and a
//! [`CheckpointPolicy`](options::CheckpointPolicy); the engine saves after
//! commits per policy, always at interrupt boundaries, and resumes from the
//! latest checkpoint when a thread has no in-memory state. Checkpoints are
//! stamped with canonical schema/graph versions and refuse to load under a
//! different graph.

pub mod canonical;
pub mod channel;
pub mod clock;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logger;
pub mod node;
pub mod options;
pub mod reducers;
pub mod retry;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod stream;

pub use channel::{ChannelCodec, ChannelScope, ChannelSpec, ChannelWrite, JsonCodec, Persistence, UpdatePolicy, ValueType};
pub use clock::{Clock, SystemClock};
pub use engine::{RunOutcome, ThreadSnapshot};
pub use error::{HiveError, Result};
pub use graph::{CompiledGraph, GraphBuilder};
pub use logger::{Logger, NullLogger, TracingLogger};
pub use node::{InterruptRequest, NextNodes, Node, NodeContext, NodeOutput, RouterResult, SpawnTask};
pub use options::{CheckpointPolicy, ProjectionOverride, RunOptions};
pub use retry::RetryPolicy;
pub use runtime::{CancelToken, Hive, RunHandle};
pub use schema::{Schema, SchemaRegistry};
pub use store::StateView;
pub use stream::{Event, EventId, EventKind, EventReceiver, EventSink};

// Re-exported checkpoint collaborator types
pub use hive_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, Interruption, TaskProvenance};
