//! State snapshots and the composed read view
//!
//! The engine keeps one immutable global snapshot per thread between steps
//! and a per-task overlay for task-local channels. Nodes and routers never
//! touch either directly; they read through a [`StateView`], which composes
//! `(global snapshot, task overlay, initial cache)`:
//!
//! - a **global** channel read returns the snapshot value
//! - a **task-local** read returns the overlay value if present, else the
//!   cached initial - never the global snapshot of another task
//! - an unknown id or a task-local read through a view without task context
//!   is an error
//!
//! Views are cheap handles (three `Arc`s); the engine hands every task a
//! fresh view over the pre-step snapshot so no task observes another task's
//! writes from the same step.

use crate::channel::ChannelScope;
use crate::error::{HiveError, Result};
use crate::schema::SchemaRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Global snapshot: channel id to committed value
pub type GlobalState = BTreeMap<String, Value>;

/// Task-local overlay: channel id to explicitly-set value
pub type TaskOverlay = BTreeMap<String, Value>;

/// Read-only composed view of state exposed to nodes and routers
#[derive(Clone)]
pub struct StateView {
    registry: Arc<SchemaRegistry>,
    global: Arc<GlobalState>,
    overlay: Option<Arc<TaskOverlay>>,
}

impl StateView {
    /// View for a task: global snapshot plus the task's own overlay
    pub(crate) fn for_task(
        registry: Arc<SchemaRegistry>,
        global: Arc<GlobalState>,
        overlay: Arc<TaskOverlay>,
    ) -> Self {
        Self {
            registry,
            global,
            overlay: Some(overlay),
        }
    }

    /// View without task context; task-local reads are scope mismatches
    pub(crate) fn global_only(registry: Arc<SchemaRegistry>, global: Arc<GlobalState>) -> Self {
        Self {
            registry,
            global,
            overlay: None,
        }
    }

    /// Read a channel's current value
    pub fn get(&self, channel: &str) -> Result<Value> {
        let spec = self.registry.require(channel)?;
        match spec.scope() {
            ChannelScope::Global => Ok(self
                .global
                .get(channel)
                .or_else(|| self.registry.initial(channel))
                .cloned()
                .unwrap_or(Value::Null)),
            ChannelScope::TaskLocal => {
                let overlay = self.overlay.as_ref().ok_or_else(|| HiveError::ScopeMismatch {
                    channel: channel.to_string(),
                })?;
                overlay
                    .get(channel)
                    .or_else(|| self.registry.initial(channel))
                    .cloned()
                    .ok_or_else(|| HiveError::MissingTaskLocalValue {
                        channel: channel.to_string(),
                    })
            }
        }
    }

    /// Read and deserialize a channel's value
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, channel: &str) -> Result<T> {
        let value = self.get(channel)?;
        let spec = self.registry.require(channel)?;
        serde_json::from_value(value).map_err(|_| HiveError::ChannelTypeMismatch {
            channel: channel.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual: spec.value_type().to_string(),
        })
    }
}
