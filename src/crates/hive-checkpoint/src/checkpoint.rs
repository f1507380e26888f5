//! Persisted checkpoint data structures
//!
//! A [`Checkpoint`] is the complete durable snapshot of one execution thread
//! between two supersteps: the committed global channel data (as
//! codec-produced bytes), the frontier of tasks scheduled for the next step,
//! the progress of every join barrier, and the pending interruption if the
//! run stopped at an interrupt boundary.
//!
//! # Structure
//!
//! ```text
//! Checkpoint
//! ├── id               deterministic hex id ("HCP1" framing over run + step)
//! ├── thread_id        caller-supplied thread identity
//! ├── run_id           UUID stable across resumes on the thread
//! ├── step_index       the NEXT step to execute, not the step just committed
//! ├── schema_version   canonical schema digest the data was written under
//! ├── graph_version    canonical graph digest the frontier was derived from
//! ├── global           channel id -> codec bytes (checkpointed globals only)
//! ├── frontier         ordered tasks: provenance, node, fingerprint, overlay bytes
//! ├── joins            join id -> sorted seen-parent list (every compiled join)
//! └── interruption     pending interrupt, if the boundary raised one
//! ```
//!
//! Per-channel values are carried as opaque `Vec<u8>` produced by the channel
//! codec. Any self-describing envelope encoding (JSON, bincode, a database
//! row) is acceptable as long as those bytes round-trip exactly; the runtime
//! recomputes fingerprints from them on load to detect corruption.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// How a frontier task came to be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskProvenance {
    /// Seeded by graph routing (static edges, a router, a join transition,
    /// or the start list)
    Graph,
    /// Spawned explicitly by a parent task with its own overlay
    Spawn,
}

/// One scheduled task inside a persisted frontier
///
/// The `fingerprint` is the 32-byte digest of the task's effective
/// task-local view. It is stored alongside the overlay bytes so a loader can
/// re-derive it and reject checkpoints whose overlay data was tampered with
/// or truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointTask {
    /// Scheduling provenance
    pub provenance: TaskProvenance,
    /// Node to execute
    pub node_id: String,
    /// Digest of the effective task-local view (32 bytes)
    pub fingerprint: Vec<u8>,
    /// Explicit task-local overlay, channel id -> codec bytes, ascending
    pub local: BTreeMap<String, Vec<u8>>,
}

/// A pending interrupt carried across the save/resume boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    /// Deterministic interrupt id ("HINT1" framing over the winning task id)
    pub id: String,
    /// Node that requested the interrupt
    pub node_id: String,
    /// Task id of the winning (smallest-ordinal) request
    pub task_id: String,
    /// Payload supplied by the requesting node
    pub payload: serde_json::Value,
}

/// Complete persisted snapshot of one thread between supersteps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Deterministic checkpoint id
    pub id: String,
    /// Thread the snapshot belongs to
    pub thread_id: String,
    /// Run identity, stable across resumes
    pub run_id: Uuid,
    /// The next step to execute when this checkpoint is restored
    pub step_index: u64,
    /// Schema version digest at save time
    pub schema_version: String,
    /// Graph version digest at save time
    pub graph_version: String,
    /// Global checkpointed channel data, channel id -> codec bytes
    pub global: BTreeMap<String, Vec<u8>>,
    /// Frontier scheduled for `step_index`, in task-ordinal order
    pub frontier: Vec<CheckpointTask>,
    /// Join progress: every compiled join id -> sorted seen parents
    pub joins: BTreeMap<String, Vec<String>>,
    /// Pending interruption, present iff the save was an interrupt boundary
    pub interruption: Option<Interruption>,
}

impl Checkpoint {
    /// True when this checkpoint was written at an interrupt boundary
    pub fn is_interrupted(&self) -> bool {
        self.interruption.is_some()
    }

    /// Number of tasks scheduled for the next step
    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }
}
