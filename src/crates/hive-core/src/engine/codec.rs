//! Checkpoint encode/decode against a compiled graph
//!
//! Encoding scans channels smallest-id first so the first codec failure is
//! deterministic. Decoding re-validates everything it cannot trust: version
//! digests, channel membership, join-progress shape, and each frontier
//! task's fingerprint (recomputed from the decoded overlay and compared to
//! the stored digest).

use crate::canonical;
use crate::channel::ChannelScope;
use crate::error::{HiveError, Result};
use crate::graph::CompiledGraph;
use crate::schema::SchemaRegistry;
use crate::store::{GlobalState, TaskOverlay};
use hive_checkpoint::{Checkpoint, CheckpointTask, Interruption};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{FrontierTask, JoinProgress, ThreadSnapshot};

/// Encode committed state into a persistable checkpoint
#[allow(clippy::too_many_arguments)]
pub fn build_checkpoint(
    registry: &SchemaRegistry,
    graph: &CompiledGraph,
    thread_id: &str,
    run_id: &Uuid,
    next_step_index: u64,
    post_global: &GlobalState,
    next_frontier: &[FrontierTask],
    joins: &JoinProgress,
    interruption: Option<&Interruption>,
) -> Result<Checkpoint> {
    let id = canonical::checkpoint_id(run_id, next_step_index)?;

    // global channels: checkpointed only, smallest id first
    let mut global: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for spec in registry.sorted_specs() {
        if spec.scope() != ChannelScope::Global || !spec.is_checkpointed() {
            continue;
        }
        let codec = spec.codec().ok_or_else(|| HiveError::MissingCodec {
            channel: spec.id().to_string(),
        })?;
        let value = post_global
            .get(spec.id())
            .or_else(|| registry.initial(spec.id()))
            .cloned()
            .unwrap_or(Value::Null);
        let bytes = codec
            .encode(&value)
            .map_err(|error| HiveError::CheckpointEncodeFailed {
                channel: spec.id().to_string(),
                error,
            })?;
        global.insert(spec.id().to_string(), bytes);
    }

    // frontier: overlay entries in ascending channel order
    let mut frontier: Vec<CheckpointTask> = Vec::with_capacity(next_frontier.len());
    for task in next_frontier {
        let mut local: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (channel, value) in task.overlay.iter() {
            let spec = registry.require(channel)?;
            let codec = spec.codec().ok_or_else(|| HiveError::MissingCodec {
                channel: channel.clone(),
            })?;
            let bytes =
                codec
                    .encode(value)
                    .map_err(|error| HiveError::CheckpointEncodeFailed {
                        channel: channel.clone(),
                        error,
                    })?;
            local.insert(channel.clone(), bytes);
        }
        frontier.push(CheckpointTask {
            provenance: task.provenance,
            node_id: task.node_id.clone(),
            fingerprint: task.fingerprint.to_vec(),
            local,
        });
    }

    // join progress: every compiled join id is a key, seen lists sorted
    let mut join_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for join in graph.joins() {
        let seen = joins
            .get(&join.id)
            .map(|set| set.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        join_map.insert(join.id.clone(), seen);
    }

    Ok(Checkpoint {
        id,
        thread_id: thread_id.to_string(),
        run_id: *run_id,
        step_index: next_step_index,
        schema_version: graph.schema_version().to_string(),
        graph_version: graph.graph_version().to_string(),
        global,
        frontier,
        joins: join_map,
        interruption: interruption.cloned(),
    })
}

/// Decode and structurally validate a loaded checkpoint
pub fn decode_checkpoint(
    registry: &Arc<SchemaRegistry>,
    graph: &CompiledGraph,
    checkpoint: &Checkpoint,
) -> Result<ThreadSnapshot> {
    if checkpoint.schema_version != graph.schema_version() {
        return Err(HiveError::CheckpointVersionMismatch {
            component: "schema".to_string(),
            expected: graph.schema_version().to_string(),
            actual: checkpoint.schema_version.clone(),
        });
    }
    if checkpoint.graph_version != graph.graph_version() {
        return Err(HiveError::CheckpointVersionMismatch {
            component: "graph".to_string(),
            expected: graph.graph_version().to_string(),
            actual: checkpoint.graph_version.clone(),
        });
    }

    // global data: exactly the checkpointed global channels
    let mut global = registry.initial_global_state();
    for (channel, bytes) in &checkpoint.global {
        let spec = registry.spec(channel).ok_or_else(|| HiveError::CheckpointCorrupt {
            field: format!("global channel '{channel}'"),
        })?;
        if spec.scope() != ChannelScope::Global || !spec.is_checkpointed() {
            return Err(HiveError::CheckpointCorrupt {
                field: format!("global channel '{channel}'"),
            });
        }
        let codec = spec.codec().ok_or_else(|| HiveError::MissingCodec {
            channel: channel.clone(),
        })?;
        let value = codec
            .decode(bytes)
            .map_err(|error| HiveError::CheckpointDecodeFailed {
                channel: channel.clone(),
                error,
            })?;
        global.insert(channel.clone(), value);
    }
    for spec in registry.sorted_specs() {
        if spec.scope() == ChannelScope::Global
            && spec.is_checkpointed()
            && !checkpoint.global.contains_key(spec.id())
        {
            return Err(HiveError::CheckpointCorrupt {
                field: format!("missing global channel '{}'", spec.id()),
            });
        }
    }

    // frontier tasks: known nodes, valid overlays, matching fingerprints
    let mut frontier: Vec<FrontierTask> = Vec::with_capacity(checkpoint.frontier.len());
    for entry in &checkpoint.frontier {
        if !graph.has_node(&entry.node_id) {
            return Err(HiveError::CheckpointCorrupt {
                field: format!("frontier node '{}'", entry.node_id),
            });
        }
        if entry.fingerprint.len() != 32 {
            return Err(HiveError::CheckpointCorrupt {
                field: format!("fingerprint length for node '{}'", entry.node_id),
            });
        }
        let mut overlay = TaskOverlay::new();
        for (channel, bytes) in &entry.local {
            let spec = registry.spec(channel).ok_or_else(|| HiveError::CheckpointCorrupt {
                field: format!("overlay channel '{channel}'"),
            })?;
            if spec.scope() != ChannelScope::TaskLocal {
                return Err(HiveError::CheckpointCorrupt {
                    field: format!("overlay channel '{channel}'"),
                });
            }
            let codec = spec.codec().ok_or_else(|| HiveError::MissingCodec {
                channel: channel.clone(),
            })?;
            let value = codec
                .decode(bytes)
                .map_err(|error| HiveError::CheckpointDecodeFailed {
                    channel: channel.clone(),
                    error,
                })?;
            overlay.insert(channel.clone(), value);
        }
        let task = FrontierTask::new(
            entry.node_id.clone(),
            overlay,
            entry.provenance,
            registry,
        )?;
        if task.fingerprint.as_slice() != entry.fingerprint.as_slice() {
            return Err(HiveError::CheckpointCorrupt {
                field: format!("fingerprint for node '{}'", entry.node_id),
            });
        }
        frontier.push(task);
    }

    // join progress: key set must match the compiled joins exactly
    let compiled_ids: BTreeSet<&str> = graph.joins().iter().map(|j| j.id.as_str()).collect();
    for key in checkpoint.joins.keys() {
        if !compiled_ids.contains(key.as_str()) {
            return Err(HiveError::CheckpointCorrupt {
                field: format!("join '{key}'"),
            });
        }
    }
    let mut joins = JoinProgress::new();
    for join in graph.joins() {
        let seen_list = checkpoint
            .joins
            .get(&join.id)
            .ok_or_else(|| HiveError::CheckpointCorrupt {
                field: format!("missing join '{}'", join.id),
            })?;
        let mut seen = BTreeSet::new();
        for parent in seen_list {
            if !join.parents.contains(parent) {
                return Err(HiveError::CheckpointCorrupt {
                    field: format!("join '{}' parent '{}'", join.id, parent),
                });
            }
            if !seen.insert(parent.clone()) {
                return Err(HiveError::CheckpointCorrupt {
                    field: format!("join '{}' duplicate parent '{}'", join.id, parent),
                });
            }
        }
        joins.insert(join.id.clone(), seen);
    }

    Ok(ThreadSnapshot {
        run_id: checkpoint.run_id,
        step_index: checkpoint.step_index,
        global: Arc::new(global),
        frontier,
        joins,
        pending_interrupt: checkpoint.interruption.clone(),
        latest_checkpoint_id: Some(checkpoint.id.clone()),
    })
}
