//! The superstep engine
//!
//! Everything between "an attempt was queued" and "an outcome was produced":
//! frontier scheduling, bounded-parallel compute, deterministic commit
//! planning, checkpoint encode/decode and the attempt loop itself.
//!
//! - [`types`] - frontier tasks, thread snapshots, worker outcomes
//! - [`algo`] - pure commit planning (write application, routing, joins)
//! - [`codec`] - checkpoint encoding and structural validation
//! - [`loop_impl`] - the attempt state machine

pub mod algo;
pub mod codec;
pub mod loop_impl;
pub mod types;

pub use loop_impl::{AttemptEnv, AttemptKind, RunOutcome};
pub use types::{FrontierTask, JoinProgress, ThreadSnapshot};
