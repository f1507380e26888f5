//! Commit planning: write application, routing, join barriers
//!
//! [`plan_commit`] turns the outputs of a step's tasks into a pure
//! [`CommitPlan`] without mutating anything. The engine publishes the plan
//! atomically only after checkpointing succeeds, so a failure at any point
//! here leaves no visible state change.
//!
//! Evaluation follows a fixed order; the first error wins deterministically:
//!
//! 1. write validation (task ascending, emission ascending)
//! 2. global single-policy check (channel id ascending)
//! 3. global reduction (channel id ascending, writes in task/emission order)
//! 4. task-local writes (task ascending, channel id ascending)
//! 5. router view construction + evaluation (task ascending)
//! 6. next-seed node-id validation (graph seeds post-dedupe, then spawns)
//!
//! followed by the pure derivations: join consumption and scheduling,
//! graph-seed dedupe by `(node id, local fingerprint)`, ephemeral reset.

use crate::channel::{ChannelScope, ChannelSpec, ChannelWrite, UpdatePolicy};
use crate::error::{HiveError, Result};
use crate::graph::CompiledGraph;
use crate::node::{NextNodes, RouterResult};
use crate::schema::SchemaRegistry;
use crate::store::{GlobalState, StateView, TaskOverlay};
use hive_checkpoint::{Interruption, TaskProvenance};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::types::{FrontierTask, JoinProgress, SelectedInterrupt, TaskSuccess};

/// Everything a committed step changes, computed up front
#[derive(Debug)]
pub struct CommitPlan {
    /// Post-reduction value per global channel that received writes
    pub reduced_global: BTreeMap<String, Value>,
    /// The full next global snapshot (writes applied, ephemerals reset)
    pub post_global: GlobalState,
    /// Next frontier: graph seeds then spawn seeds, ordinals by position
    pub next_frontier: Vec<FrontierTask>,
    /// Updated join progress
    pub next_joins: JoinProgress,
    /// Winning interrupt, if any task requested one
    pub interrupt: Option<SelectedInterrupt>,
}

/// Apply one channel's reducer over a write sequence
fn reduce_sequence<'a>(
    spec: &ChannelSpec,
    start: Value,
    writes: impl IntoIterator<Item = &'a Value>,
) -> Result<Value> {
    let mut acc = start;
    for write in writes {
        acc = (spec.reducer())(acc, write.clone()).map_err(|error| HiveError::ReducerFailed {
            channel: spec.id().to_string(),
            error,
        })?;
    }
    Ok(acc)
}

fn pre_step_value(registry: &SchemaRegistry, global: &GlobalState, channel: &str) -> Value {
    global
        .get(channel)
        .or_else(|| registry.initial(channel))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Plan the commit of one computed step
pub fn plan_commit(
    registry: &Arc<SchemaRegistry>,
    graph: &CompiledGraph,
    pre_global: &Arc<GlobalState>,
    joins: &JoinProgress,
    results: &[TaskSuccess],
) -> Result<CommitPlan> {
    // 1. write validation: task ascending, emission ascending
    for result in results {
        for write in &result.output.writes {
            let spec = registry.require(&write.channel)?;
            if !spec.value_type().accepts(&write.value) {
                return Err(HiveError::ChannelTypeMismatch {
                    channel: write.channel.clone(),
                    expected: spec.value_type().to_string(),
                    actual: crate::channel::ValueType::of(&write.value).to_string(),
                });
            }
        }
    }

    // partition writes by scope, preserving (task, emission) order
    let mut global_writes: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for result in results {
        for write in &result.output.writes {
            let spec = registry.require(&write.channel)?;
            if spec.scope() == ChannelScope::Global {
                global_writes
                    .entry(spec.id())
                    .or_default()
                    .push(&write.value);
            }
        }
    }

    // 2. global single-policy check, channel id ascending
    for (channel, writes) in &global_writes {
        let spec = registry.require(channel)?;
        if spec.update_policy() == UpdatePolicy::Single && writes.len() > 1 {
            return Err(HiveError::UpdatePolicyViolation {
                channel: channel.to_string(),
                policy: spec.update_policy().to_string(),
                count: writes.len(),
            });
        }
    }

    // 3. global reduction, channel id ascending
    let mut reduced_global: BTreeMap<String, Value> = BTreeMap::new();
    for (channel, writes) in &global_writes {
        let spec = registry.require(channel)?;
        let start = pre_step_value(registry, pre_global, channel);
        let reduced = reduce_sequence(spec, start, writes.iter().copied())?;
        reduced_global.insert(channel.to_string(), reduced);
    }

    // 4. task-local writes: task ascending, channel id ascending
    let mut post_overlays: Vec<Arc<TaskOverlay>> = Vec::with_capacity(results.len());
    for result in results {
        let mut local_writes: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
        for write in &result.output.writes {
            let spec = registry.require(&write.channel)?;
            if spec.scope() == ChannelScope::TaskLocal {
                local_writes
                    .entry(spec.id())
                    .or_default()
                    .push(&write.value);
            }
        }
        if local_writes.is_empty() {
            post_overlays.push(result.overlay.clone());
            continue;
        }
        let mut overlay = (*result.overlay).clone();
        for (channel, writes) in &local_writes {
            let spec = registry.require(channel)?;
            if spec.update_policy() == UpdatePolicy::Single && writes.len() > 1 {
                return Err(HiveError::UpdatePolicyViolation {
                    channel: channel.to_string(),
                    policy: spec.update_policy().to_string(),
                    count: writes.len(),
                });
            }
            let start = overlay
                .get(*channel)
                .or_else(|| registry.initial(channel))
                .cloned()
                .unwrap_or(Value::Null);
            let reduced = reduce_sequence(spec, start, writes.iter().copied())?;
            overlay.insert(channel.to_string(), reduced);
        }
        post_overlays.push(Arc::new(overlay));
    }

    // 5. router view construction + evaluation, task ascending
    let mut router_decisions: HashMap<usize, RouterResult> = HashMap::new();
    for (index, result) in results.iter().enumerate() {
        let router = match graph.router(&result.node_id) {
            Some(router) if result.output.next == NextNodes::UseGraphEdges => router,
            _ => continue,
        };
        // fresh-read view: pre-step snapshot + this task's own reduced writes
        let mut fresh: GlobalState = (**pre_global).clone();
        let mut own_writes: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
        for write in &result.output.writes {
            let spec = registry.require(&write.channel)?;
            if spec.scope() == ChannelScope::Global {
                own_writes.entry(spec.id()).or_default().push(&write.value);
            }
        }
        for (channel, writes) in &own_writes {
            let spec = registry.require(channel)?;
            let start = pre_step_value(registry, pre_global, channel);
            let reduced = reduce_sequence(spec, start, writes.iter().copied())?;
            fresh.insert(channel.to_string(), reduced);
        }
        let view = StateView::for_task(
            registry.clone(),
            Arc::new(fresh),
            post_overlays[index].clone(),
        );
        let decision = router(&view).map_err(|error| HiveError::RouterFailed {
            node: result.node_id.clone(),
            error,
        })?;
        router_decisions.insert(result.ordinal, decision);
    }

    // 11. routing resolution per task, ordinal order
    let mut graph_seed_ids: Vec<String> = Vec::new();
    let mut spawn_seeds: Vec<(String, TaskOverlay)> = Vec::new();
    for result in results {
        match &result.output.next {
            NextNodes::Nodes(nodes) => graph_seed_ids.extend(nodes.iter().cloned()),
            NextNodes::UseGraphEdges => match router_decisions.get(&result.ordinal) {
                Some(RouterResult::Nodes(nodes)) => graph_seed_ids.extend(nodes.iter().cloned()),
                Some(RouterResult::UseGraphEdges) | None => graph_seed_ids.extend(
                    graph
                        .static_edges(&result.node_id)
                        .into_iter()
                        .map(str::to_string),
                ),
            },
        }
        for spawn in &result.output.spawn {
            spawn_seeds.push((spawn.node_id.clone(), spawn.overlay.clone()));
        }
    }

    // 8. join consumption: executed join targets clear available barriers
    let mut next_joins = joins.clone();
    for result in results {
        for join in graph.joins() {
            if join.target != result.node_id {
                continue;
            }
            let seen = next_joins.entry(join.id.clone()).or_default();
            if seen.len() == join.parents.len() {
                seen.clear();
            }
        }
    }

    // 12. join scheduling: executed parents advance barriers; a
    // not-available -> available transition seeds the target
    let executed: HashSet<&str> = results.iter().map(|r| r.node_id.as_str()).collect();
    for join in graph.joins() {
        let seen = next_joins.entry(join.id.clone()).or_default();
        let was_available = seen.len() == join.parents.len();
        for parent in &join.parents {
            if executed.contains(parent.as_str()) {
                seen.insert(parent.clone());
            }
        }
        let is_available = seen.len() == join.parents.len();
        if !was_available && is_available {
            graph_seed_ids.push(join.target.clone());
        }
    }

    // 13. graph-seed dedupe by (node id, local fingerprint), first kept
    let mut graph_tasks: Vec<FrontierTask> = Vec::new();
    let mut seen_keys: HashSet<(String, [u8; 32])> = HashSet::new();
    for node_id in graph_seed_ids {
        let task = FrontierTask::new(
            node_id,
            TaskOverlay::new(),
            TaskProvenance::Graph,
            registry,
        )?;
        if seen_keys.insert(task.dedupe_key()) {
            graph_tasks.push(task);
        }
    }

    // 6. next-seed node-id validation: graph seeds post-dedupe, then spawns
    for task in &graph_tasks {
        if !graph.has_node(&task.node_id) {
            return Err(HiveError::UnknownNextNode {
                node: task.node_id.clone(),
            });
        }
    }
    for (node_id, _) in &spawn_seeds {
        if !graph.has_node(node_id) {
            return Err(HiveError::UnknownNextNode {
                node: node_id.clone(),
            });
        }
    }

    // spawn seeds keep duplicates and their explicit overlays
    let mut next_frontier = graph_tasks;
    for (node_id, overlay) in spawn_seeds {
        next_frontier.push(FrontierTask::new(
            node_id,
            overlay,
            TaskProvenance::Spawn,
            registry,
        )?);
    }

    // interrupt selection: smallest task ordinal wins
    let interrupt = results
        .iter()
        .find(|r| r.output.interrupt.is_some())
        .map(|winner| {
            let payload = winner
                .output
                .interrupt
                .as_ref()
                .map(|i| i.payload.clone())
                .unwrap_or(Value::Null);
            SelectedInterrupt {
                ordinal: winner.ordinal,
                interruption: Interruption {
                    id: crate::canonical::interrupt_id(&winner.task_id),
                    node_id: winner.node_id.clone(),
                    task_id: winner.task_id.clone(),
                    payload,
                },
            }
        });

    // 9 + 14. apply global writes, then reset ephemerals so the next step
    // sees the reset rather than this step's writes
    let mut post_global = (**pre_global).clone();
    for (channel, value) in &reduced_global {
        post_global.insert(channel.clone(), value.clone());
    }
    for spec in registry.sorted_specs() {
        if spec.scope() == ChannelScope::Global
            && spec.persistence() == crate::channel::Persistence::Ephemeral
        {
            if let Some(initial) = registry.initial(spec.id()) {
                post_global.insert(spec.id().to_string(), initial.clone());
            }
        }
    }

    Ok(CommitPlan {
        reduced_global,
        post_global,
        next_frontier,
        next_joins,
        interrupt,
    })
}

/// Validate and reduce a synthetic write batch against the global snapshot
///
/// Shared by run-input application and `apply_external_writes`: every write
/// must target a declared global channel and match its type; the single
/// policy counts across the whole batch; reduction is in array order.
/// Returns the post-reduction value per written channel.
pub fn reduce_synthetic_writes(
    registry: &SchemaRegistry,
    global: &GlobalState,
    writes: &[ChannelWrite],
) -> Result<BTreeMap<String, Value>> {
    for write in writes {
        let spec = registry.require(&write.channel)?;
        if spec.scope() == ChannelScope::TaskLocal {
            return Err(HiveError::TaskLocalWriteNotAllowed {
                channel: write.channel.clone(),
            });
        }
        if !spec.value_type().accepts(&write.value) {
            return Err(HiveError::ChannelTypeMismatch {
                channel: write.channel.clone(),
                expected: spec.value_type().to_string(),
                actual: crate::channel::ValueType::of(&write.value).to_string(),
            });
        }
    }

    let mut per_channel: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for write in writes {
        per_channel
            .entry(registry.require(&write.channel)?.id())
            .or_default()
            .push(&write.value);
    }

    for (channel, values) in &per_channel {
        let spec = registry.require(channel)?;
        if spec.update_policy() == UpdatePolicy::Single && values.len() > 1 {
            return Err(HiveError::UpdatePolicyViolation {
                channel: channel.to_string(),
                policy: spec.update_policy().to_string(),
                count: values.len(),
            });
        }
    }

    let mut reduced: BTreeMap<String, Value> = BTreeMap::new();
    for (channel, values) in &per_channel {
        let spec = registry.require(channel)?;
        let start = pre_step_value(registry, global, channel);
        reduced.insert(
            channel.to_string(),
            reduce_sequence(spec, start, values.iter().copied())?,
        );
    }
    Ok(reduced)
}
