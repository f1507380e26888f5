//! Error types for graph compilation and runtime execution
//!
//! All failures the runtime can surface, grouped the way they arise:
//!
//! ```text
//! HiveError
//! ├── Configuration      - invalid run options, missing codec/store, bad retry policy
//! ├── Compilation        - duplicate / unknown / reserved ids, projection errors
//! ├── State access       - unknown channel, scope or type mismatch
//! ├── Commit             - update-policy violations, reducer failures
//! ├── Checkpoint         - version mismatch, encode/decode, corrupt data, resume errors
//! └── Lifecycle          - pending interrupt, range overflows, stream overflow
//! ```
//!
//! Every variant carries the offending identifier(s) so tie-break rules
//! ("smallest channel id wins", "smallest task ordinal wins") are observable
//! in the error itself. Cancellation is deliberately *not* represented here:
//! it is a control-flow signal and surfaces as a normal
//! [`RunOutcome::Cancelled`](crate::runtime::RunOutcome) outcome.
//!
//! # Example
//!
//! ```rust
//! use hive_core::error::HiveError;
//!
//! let err = HiveError::UnknownChannelId { channel: "missing".into() };
//! assert_eq!(format!("{}", err), "Unknown channel id 'missing'");
//! ```

use thiserror::Error;

/// Convenience result type using [`HiveError`]
pub type Result<T> = std::result::Result<T, HiveError>;

/// Comprehensive error type for all runtime operations
#[derive(Error, Debug)]
pub enum HiveError {
    // ----- configuration -----
    /// Run options failed validation before step 0
    #[error("Invalid run options: {0}")]
    InvalidRunOptions(String),

    /// An interrupt boundary required a checkpoint but no store is configured
    #[error("Checkpoint store is required but not configured")]
    CheckpointStoreMissing,

    /// A checkpointed channel has no codec
    #[error("Channel '{channel}' is checkpointed but has no codec")]
    MissingCodec { channel: String },

    /// A node carries an invalid retry policy
    #[error("Invalid retry policy on node '{node}': {reason}")]
    InvalidRetryPolicy { node: String, reason: String },

    // ----- compilation -----
    /// Two channel specs share an id
    #[error("Duplicate channel id '{channel}'")]
    DuplicateChannelId { channel: String },

    /// A task-local channel is not checkpointed
    #[error("Task-local channel '{channel}' must be checkpointed")]
    InvalidTaskLocalUntracked { channel: String },

    /// Two nodes share an id
    #[error("Duplicate node id '{node}'")]
    DuplicateNodeId { node: String },

    /// Node id contains a reserved character (`+` or `:`)
    #[error("Node id '{node}' contains a reserved character")]
    ReservedNodeId { node: String },

    /// The start list is empty
    #[error("Start list must not be empty")]
    EmptyStartList,

    /// A node appears twice in the start list
    #[error("Duplicate start node '{node}'")]
    DuplicateStartNode { node: String },

    /// The start list references an undeclared node
    #[error("Unknown start node '{node}'")]
    UnknownStartNode { node: String },

    /// An edge references an undeclared node
    #[error("Edge references unknown node '{node}'")]
    UnknownEdgeNode { node: String },

    /// A node has more than one router
    #[error("Duplicate router for node '{node}'")]
    DuplicateRouter { node: String },

    /// A router is attached to an undeclared node
    #[error("Router references unknown node '{node}'")]
    UnknownRouterNode { node: String },

    /// A join edge has no parents
    #[error("Join targeting '{target}' has no parents")]
    EmptyJoinParents { target: String },

    /// A join edge lists the same parent twice
    #[error("Join targeting '{target}' lists parent '{parent}' twice")]
    DuplicateJoinParent { target: String, parent: String },

    /// A join edge lists its target among its parents
    #[error("Join targeting '{target}' lists the target as a parent")]
    JoinTargetInParents { target: String },

    /// A join edge references an undeclared node
    #[error("Join references unknown node '{node}'")]
    UnknownJoinNode { node: String },

    /// Two join edges share a canonical join id
    #[error("Duplicate join '{join_id}'")]
    DuplicateJoinId { join_id: String },

    /// The output projection references an undeclared channel
    #[error("Output projection references unknown channel '{channel}'")]
    UnknownProjectionChannel { channel: String },

    /// The output projection references a task-local channel
    #[error("Output projection must not include task-local channel '{channel}'")]
    TaskLocalInProjection { channel: String },

    // ----- state access -----
    /// A read or write referenced an undeclared channel
    #[error("Unknown channel id '{channel}'")]
    UnknownChannelId { channel: String },

    /// A channel was accessed through the wrong scope
    #[error("Scope mismatch for channel '{channel}'")]
    ScopeMismatch { channel: String },

    /// A value did not match the channel's declared type
    #[error("Type mismatch on channel '{channel}': expected {expected}, got {actual}")]
    ChannelTypeMismatch {
        channel: String,
        expected: String,
        actual: String,
    },

    /// A task-local channel had neither overlay nor initial value
    #[error("Missing task-local value for channel '{channel}'")]
    MissingTaskLocalValue { channel: String },

    // ----- commit -----
    /// A single-update channel received more than one write
    #[error("Update policy violation on channel '{channel}': policy {policy}, {count} writes")]
    UpdatePolicyViolation {
        channel: String,
        policy: String,
        count: usize,
    },

    /// A task-local channel was written where only globals are allowed
    #[error("Task-local write not allowed for channel '{channel}'")]
    TaskLocalWriteNotAllowed { channel: String },

    /// A reducer reported a failure
    #[error("Reducer failed on channel '{channel}': {error}")]
    ReducerFailed { channel: String, error: String },

    /// A router reported a failure while building or evaluating its view
    #[error("Router failed for node '{node}': {error}")]
    RouterFailed { node: String, error: String },

    /// A node failed after exhausting its retry policy
    #[error("Node '{node}' execution failed: {error}")]
    NodeFailed { node: String, error: String },

    /// Routing or spawning produced an undeclared node id
    #[error("Next-step seed references unknown node '{node}'")]
    UnknownNextNode { node: String },

    /// The input mapper rejected the run input
    #[error("Input mapping failed: {error}")]
    InputMapping { error: String },

    /// General execution failure without more specific context
    #[error("Execution failed: {0}")]
    Execution(String),

    // ----- checkpoint -----
    /// A loaded checkpoint was written under a different schema or graph
    #[error("Checkpoint {component} version mismatch: expected {expected}, found {actual}")]
    CheckpointVersionMismatch {
        component: String,
        expected: String,
        actual: String,
    },

    /// A channel codec failed while decoding checkpoint data
    #[error("Checkpoint decode failed on channel '{channel}': {error}")]
    CheckpointDecodeFailed { channel: String, error: String },

    /// A channel codec failed while encoding checkpoint data
    #[error("Checkpoint encode failed on channel '{channel}': {error}")]
    CheckpointEncodeFailed { channel: String, error: String },

    /// A loaded checkpoint failed structural validation
    #[error("Checkpoint corrupt: {field}")]
    CheckpointCorrupt { field: String },

    /// Resume was requested but the thread has no checkpoint
    #[error("No checkpoint to resume for thread '{thread}'")]
    NoCheckpointToResume { thread: String },

    /// Resume was requested but no interrupt is pending
    #[error("No interrupt to resume for thread '{thread}'")]
    NoInterruptToResume { thread: String },

    /// Resume supplied an interrupt id that is not the pending one
    #[error("Resume interrupt mismatch: pending {expected}, provided {provided}")]
    ResumeInterruptMismatch { expected: String, provided: String },

    /// Checkpoint store error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] hive_checkpoint::CheckpointError),

    // ----- lifecycle -----
    /// An operation other than resume ran against a pending interrupt
    #[error("Interrupt '{interrupt_id}' is pending; resume is required")]
    InterruptPending { interrupt_id: String },

    /// A step index does not fit the canonical 32-bit framing
    #[error("Step index {step} out of range")]
    StepIndexOutOfRange { step: u64 },

    /// A task ordinal does not fit the canonical 32-bit framing
    #[error("Task ordinal {ordinal} out of range")]
    TaskOrdinalOutOfRange { ordinal: usize },

    /// A codec failed while computing a task-local fingerprint
    #[error("Task-local fingerprint encode failed on channel '{channel}': {error}")]
    TaskLocalFingerprintEncodeFailed { channel: String, error: String },

    /// A non-droppable stream event exceeded the per-task buffer bound
    #[error("Model stream invalid for node '{node}': per-task event buffer exceeded")]
    ModelStreamInvalid { node: String },
}

impl HiveError {
    /// Create a node execution failure with context
    pub fn node_failed(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a reducer failure with context
    pub fn reducer_failed(channel: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ReducerFailed {
            channel: channel.into(),
            error: error.into(),
        }
    }

    /// Create a type mismatch error for a channel
    pub fn type_mismatch(
        channel: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChannelTypeMismatch {
            channel: channel.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for errors produced by graph compilation
    pub fn is_compilation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateChannelId { .. }
                | Self::InvalidTaskLocalUntracked { .. }
                | Self::DuplicateNodeId { .. }
                | Self::ReservedNodeId { .. }
                | Self::EmptyStartList
                | Self::DuplicateStartNode { .. }
                | Self::UnknownStartNode { .. }
                | Self::UnknownEdgeNode { .. }
                | Self::DuplicateRouter { .. }
                | Self::UnknownRouterNode { .. }
                | Self::EmptyJoinParents { .. }
                | Self::DuplicateJoinParent { .. }
                | Self::JoinTargetInParents { .. }
                | Self::UnknownJoinNode { .. }
                | Self::DuplicateJoinId { .. }
                | Self::UnknownProjectionChannel { .. }
                | Self::TaskLocalInProjection { .. }
        )
    }
}
