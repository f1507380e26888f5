//! Run options
//!
//! Per-call configuration for `run` / `resume` / `apply_external_writes`.
//! Options are validated before step 0; violations surface as
//! [`InvalidRunOptions`](crate::error::HiveError::InvalidRunOptions) and
//! abort the attempt without touching thread state.

use crate::error::{HiveError, Result};
use crate::stream::DEFAULT_EVENT_CAPACITY;

/// When the engine writes checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointPolicy {
    /// Never save (interrupt boundaries still require a store and force one)
    #[default]
    Disabled,
    /// Save after every committed step
    EveryStep,
    /// Save when the new step index is a multiple of `k`
    Every(u64),
    /// Save only at interrupt boundaries
    OnInterrupt,
}

impl CheckpointPolicy {
    /// Does this policy ever write checkpoints on its own?
    pub fn writes(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Policy-driven save decision for a freshly committed step
    pub fn should_save(self, new_step_index: u64) -> bool {
        match self {
            Self::Disabled | Self::OnInterrupt => false,
            Self::EveryStep => true,
            Self::Every(k) => new_step_index % k == 0,
        }
    }
}

/// Output projection override, replacing the compiled graph's projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOverride {
    /// Surface every global channel
    FullStore,
    /// Surface exactly these channels (normalized unique + sorted)
    Channels(Vec<String>),
}

/// Configuration of one runtime call
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Superstep budget for the attempt; `0` permits no steps
    pub max_steps: u64,
    /// Concurrency cap for in-flight tasks within a step
    pub max_concurrent_tasks: usize,
    /// Event ring capacity, and the per-task buffer bound in deterministic
    /// token mode
    pub event_buffer_capacity: usize,
    /// Checkpoint cadence
    pub checkpoint_policy: CheckpointPolicy,
    /// Deliver `customDebug` events (suppressed entirely when false)
    pub debug_payloads: bool,
    /// Buffer stream events per task and flush in ordinal order
    pub deterministic_token_streaming: bool,
    /// Replace the compiled output projection for this call
    pub output_projection_override: Option<ProjectionOverride>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_concurrent_tasks: 8,
            event_buffer_capacity: DEFAULT_EVENT_CAPACITY,
            checkpoint_policy: CheckpointPolicy::Disabled,
            debug_payloads: false,
            deterministic_token_streaming: false,
            output_projection_override: None,
        }
    }
}

impl RunOptions {
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, cap: usize) -> Self {
        self.max_concurrent_tasks = cap;
        self
    }

    pub fn with_event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    pub fn with_debug_payloads(mut self, enabled: bool) -> Self {
        self.debug_payloads = enabled;
        self
    }

    pub fn with_deterministic_token_streaming(mut self, enabled: bool) -> Self {
        self.deterministic_token_streaming = enabled;
        self
    }

    pub fn with_output_projection(mut self, projection: ProjectionOverride) -> Self {
        self.output_projection_override = Some(projection);
        self
    }

    /// Validate before step 0
    pub fn validate(&self, has_store: bool) -> Result<()> {
        if self.max_concurrent_tasks < 1 {
            return Err(HiveError::InvalidRunOptions(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.event_buffer_capacity < 1 {
            return Err(HiveError::InvalidRunOptions(
                "event_buffer_capacity must be at least 1".to_string(),
            ));
        }
        if let CheckpointPolicy::Every(k) = self.checkpoint_policy {
            if k < 1 {
                return Err(HiveError::InvalidRunOptions(
                    "checkpoint policy every(k) requires k >= 1".to_string(),
                ));
            }
        }
        if self.checkpoint_policy.writes() && !has_store {
            return Err(HiveError::InvalidRunOptions(
                "checkpoint policy requires a configured store".to_string(),
            ));
        }
        Ok(())
    }
}
