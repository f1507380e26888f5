//! The attempt loop: preamble, superstep execution, atomic commit
//!
//! One call to `run` / `resume` / `apply_external_writes` is one *attempt*.
//! An attempt resolves its baseline (in-memory state, else the latest
//! checkpoint, else fresh), then drives the superstep loop:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Attempt                                                 │
//! │  validate options / registry / retry policies            │
//! │  resolve baseline  →  runStarted, checkpointLoaded?      │
//! │  gate pending interrupt, seed frontier, apply input      │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  Step S                                            │  │
//! │  │  stepStarted → taskStarted*                        │  │
//! │  │  compute: bounded-parallel node execution, retries │  │
//! │  │  flush deterministic buffers (ordinal ascending)   │  │
//! │  │  taskFinished/taskFailed (ordinal ascending)       │  │
//! │  │  plan commit (pure) → checkpoint? → publish        │  │
//! │  │  writeApplied* → checkpointSaved? →                │  │
//! │  │  streamBackpressure? → stepFinished                │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │  terminal: runFinished / runInterrupted / runCancelled   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Commit is atomic: every validation, the checkpoint encode and the store
//! save happen before any in-memory state changes or commit-scoped event is
//! emitted. A failure anywhere leaves the thread snapshot untouched and
//! terminates both the outcome and the event stream with the same error.

use crate::channel::{ChannelScope, ChannelWrite, Persistence};
use crate::clock::Clock;
use crate::error::{HiveError, Result};
use crate::graph::CompiledGraph;
use crate::logger::Logger;
use crate::node::{NodeContext, TaskInfo};
use crate::options::{ProjectionOverride, RunOptions};
use crate::runtime::CancelToken;
use crate::schema::SchemaRegistry;
use crate::store::{GlobalState, StateView, TaskOverlay};
use crate::stream::{EventBus, EventKind, EventSink, TaskEventBuffer};
use hive_checkpoint::{CheckpointStore, Interruption, TaskProvenance};
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Semaphore;

use super::algo;
use super::codec;
use super::types::{FrontierTask, TaskSuccess, ThreadSnapshot, WorkerOutcome};

/// What one runtime call amounts to
pub enum AttemptKind {
    Run { input: Value },
    Resume { interrupt_id: String, payload: Value },
    ExternalWrites { writes: Vec<ChannelWrite> },
}

/// Shared collaborators and configuration of one attempt
pub struct AttemptEnv {
    pub graph: Arc<CompiledGraph>,
    pub store: Option<Arc<dyn CheckpointStore>>,
    pub clock: Arc<dyn Clock>,
    pub logger: Arc<dyn Logger>,
    pub options: RunOptions,
    pub bus: Arc<EventBus>,
    pub cancel: CancelToken,
    pub thread_id: String,
}

/// Exclusive sum of the non-error ways an attempt ends
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The frontier drained with no interrupt
    Finished {
        output: Value,
        checkpoint_id: Option<String>,
    },
    /// A committed step selected an interrupt; resume to continue
    Interrupted {
        interruption: Interruption,
        checkpoint_id: String,
    },
    /// Cooperative cancellation was observed
    Cancelled {
        output: Value,
        checkpoint_id: Option<String>,
    },
    /// The step budget ran out with work still scheduled
    OutOfSteps {
        max_steps: u64,
        output: Value,
        checkpoint_id: Option<String>,
    },
}

impl RunOutcome {
    /// The projected output, where the outcome carries one
    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Finished { output, .. }
            | Self::Cancelled { output, .. }
            | Self::OutOfSteps { output, .. } => Some(output),
            Self::Interrupted { .. } => None,
        }
    }
}

/// Drive one attempt to a terminal outcome
///
/// `slot` is the thread's committed in-memory state; it is only written at
/// publish points (synthetic write application and step commits).
pub async fn run_attempt(
    env: &AttemptEnv,
    kind: AttemptKind,
    slot: &mut Option<ThreadSnapshot>,
) -> Result<RunOutcome> {
    env.options.validate(env.store.is_some())?;
    let registry = Arc::new(SchemaRegistry::build(env.graph.schema())?);
    validate_projection_override(&registry, &env.options)?;
    env.graph.validate_retry_policies()?;

    // baseline: in-memory state, else latest checkpoint, else fresh
    let mut loaded: Option<(String, u64)> = None;
    let mut snapshot = match slot.as_ref() {
        Some(state) => state.clone(),
        None => {
            let from_store = match &env.store {
                Some(store) => store.load_latest(&env.thread_id).await?,
                None => None,
            };
            match from_store {
                Some(checkpoint) => {
                    let snap = codec::decode_checkpoint(&registry, &env.graph, &checkpoint)?;
                    loaded = Some((checkpoint.id.clone(), snap.step_index));
                    snap
                }
                None => {
                    if matches!(kind, AttemptKind::Resume { .. }) {
                        return Err(HiveError::NoCheckpointToResume {
                            thread: env.thread_id.clone(),
                        });
                    }
                    ThreadSnapshot::fresh(
                        &registry,
                        env.graph.joins().iter().map(|j| j.id.clone()),
                    )
                }
            }
        }
    };
    env.bus.set_run_id(snapshot.run_id);

    let is_external = matches!(kind, AttemptKind::ExternalWrites { .. });
    if !is_external {
        env.bus.publish(None, None, EventKind::RunStarted).await;
    }
    if let Some((checkpoint_id, step_index)) = &loaded {
        env.bus
            .publish(
                None,
                None,
                EventKind::CheckpointLoaded {
                    checkpoint_id: checkpoint_id.clone(),
                    step_index: *step_index,
                },
            )
            .await;
    }

    // pending-interrupt gate
    let resume_payload = match &kind {
        AttemptKind::Resume {
            interrupt_id,
            payload,
        } => {
            let pending = snapshot.pending_interrupt.as_ref().ok_or_else(|| {
                HiveError::NoInterruptToResume {
                    thread: env.thread_id.clone(),
                }
            })?;
            if pending.id != *interrupt_id {
                return Err(HiveError::ResumeInterruptMismatch {
                    expected: pending.id.clone(),
                    provided: interrupt_id.clone(),
                });
            }
            env.bus
                .publish(
                    None,
                    None,
                    EventKind::RunResumed {
                        interrupt_id: pending.id.clone(),
                    },
                )
                .await;
            Some(payload.clone())
        }
        _ => {
            if let Some(pending) = &snapshot.pending_interrupt {
                return Err(HiveError::InterruptPending {
                    interrupt_id: pending.id.clone(),
                });
            }
            None
        }
    };

    env.logger.info(
        "attempt started",
        &[
            ("thread", env.thread_id.clone()),
            ("run", snapshot.run_id.to_string()),
            ("step", snapshot.step_index.to_string()),
        ],
    );

    let kind = match kind {
        AttemptKind::ExternalWrites { writes } => {
            return external_writes_step(env, &registry, snapshot, writes, slot).await;
        }
        other => other,
    };

    // seed an empty frontier from the compiled start list, order preserved
    if snapshot.frontier.is_empty() {
        let mut frontier = Vec::with_capacity(env.graph.start().len());
        for node in env.graph.start() {
            frontier.push(FrontierTask::new(
                node.clone(),
                TaskOverlay::new(),
                TaskProvenance::Graph,
                &registry,
            )?);
        }
        snapshot.frontier = frontier;
    }

    // synthetic input-write application (no step events)
    if let AttemptKind::Run { input } = &kind {
        let writes = env.graph.schema().input_writes(input)?;
        if !writes.is_empty() {
            let reduced = algo::reduce_synthetic_writes(&registry, &snapshot.global, &writes)?;
            let mut global = (*snapshot.global).clone();
            for (channel, value) in reduced {
                global.insert(channel, value);
            }
            snapshot.global = Arc::new(global);
        }
    }
    *slot = Some(snapshot.clone());

    step_loop(env, &registry, snapshot, resume_payload, slot).await
}

fn validate_projection_override(registry: &SchemaRegistry, options: &RunOptions) -> Result<()> {
    if let Some(ProjectionOverride::Channels(channels)) = &options.output_projection_override {
        for channel in channels {
            match registry.spec(channel) {
                None => {
                    return Err(HiveError::InvalidRunOptions(format!(
                        "output projection references unknown channel '{channel}'"
                    )))
                }
                Some(spec) if spec.scope() == ChannelScope::TaskLocal => {
                    return Err(HiveError::InvalidRunOptions(format!(
                        "output projection must not include task-local channel '{channel}'"
                    )))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Projected run output from a committed global snapshot
fn project_output(
    registry: &SchemaRegistry,
    graph: &CompiledGraph,
    options: &RunOptions,
    global: &GlobalState,
) -> Value {
    let projection: Option<Vec<String>> = match &options.output_projection_override {
        Some(ProjectionOverride::FullStore) => None,
        Some(ProjectionOverride::Channels(channels)) => {
            let mut normalized = channels.clone();
            normalized.sort_unstable();
            normalized.dedup();
            Some(normalized)
        }
        None => graph.projection().map(<[String]>::to_vec),
    };
    let mut object = serde_json::Map::new();
    match projection {
        None => {
            for (channel, value) in global {
                object.insert(channel.clone(), value.clone());
            }
        }
        Some(channels) => {
            for channel in channels {
                let value = global
                    .get(&channel)
                    .or_else(|| registry.initial(&channel))
                    .cloned()
                    .unwrap_or(Value::Null);
                object.insert(channel, value);
            }
        }
    }
    Value::Object(object)
}

/// The superstep loop of a run/resume attempt
async fn step_loop(
    env: &AttemptEnv,
    registry: &Arc<SchemaRegistry>,
    mut snapshot: ThreadSnapshot,
    mut resume_payload: Option<Value>,
    slot: &mut Option<ThreadSnapshot>,
) -> Result<RunOutcome> {
    let semaphore = Arc::new(Semaphore::new(env.options.max_concurrent_tasks));
    let mut steps_executed: u64 = 0;

    loop {
        if snapshot.frontier.is_empty() {
            env.bus.publish(None, None, EventKind::RunFinished).await;
            return Ok(RunOutcome::Finished {
                output: project_output(registry, &env.graph, &env.options, &snapshot.global),
                checkpoint_id: snapshot.latest_checkpoint_id.clone(),
            });
        }
        if env.cancel.is_cancelled() {
            env.bus.publish(None, None, EventKind::RunCancelled).await;
            return Ok(RunOutcome::Cancelled {
                output: project_output(registry, &env.graph, &env.options, &snapshot.global),
                checkpoint_id: snapshot.latest_checkpoint_id.clone(),
            });
        }
        if steps_executed == env.options.max_steps {
            env.bus.publish(None, None, EventKind::RunFinished).await;
            return Ok(RunOutcome::OutOfSteps {
                max_steps: env.options.max_steps,
                output: project_output(registry, &env.graph, &env.options, &snapshot.global),
                checkpoint_id: snapshot.latest_checkpoint_id.clone(),
            });
        }

        let step = snapshot.step_index;
        env.bus
            .publish(
                Some(step),
                None,
                EventKind::StepStarted {
                    step,
                    frontier_count: snapshot.frontier.len(),
                },
            )
            .await;

        let mut task_ids = Vec::with_capacity(snapshot.frontier.len());
        for (ordinal, task) in snapshot.frontier.iter().enumerate() {
            let task_id = task.task_id(&snapshot.run_id, step, ordinal)?;
            env.bus
                .publish(
                    Some(step),
                    Some(ordinal),
                    EventKind::TaskStarted {
                        node_id: task.node_id.clone(),
                        task_id: task_id.clone(),
                    },
                )
                .await;
            task_ids.push(task_id);
        }

        let outcomes = compute_step(
            env,
            registry,
            &snapshot,
            &task_ids,
            step,
            resume_payload.clone(),
            &semaphore,
        )
        .await;

        // cancellation during the step: fail every task, no commit
        let observed_cancel = env.cancel.is_cancelled()
            || outcomes
                .iter()
                .any(|o| matches!(o, WorkerOutcome::Cancelled { .. }));
        if observed_cancel {
            for (ordinal, task) in snapshot.frontier.iter().enumerate() {
                env.bus
                    .publish(
                        Some(step),
                        Some(ordinal),
                        EventKind::TaskFailed {
                            node_id: task.node_id.clone(),
                            error: "execution cancelled".to_string(),
                        },
                    )
                    .await;
            }
            env.bus.publish(None, None, EventKind::RunCancelled).await;
            return Ok(RunOutcome::Cancelled {
                output: project_output(registry, &env.graph, &env.options, &snapshot.global),
                checkpoint_id: snapshot.latest_checkpoint_id.clone(),
            });
        }

        let mut successes: Vec<TaskSuccess> = Vec::new();
        let mut failures: Vec<(usize, String, HiveError)> = Vec::new();
        for outcome in outcomes {
            match outcome {
                WorkerOutcome::Success(success) => successes.push(*success),
                WorkerOutcome::Failed {
                    ordinal,
                    node_id,
                    error,
                }
                | WorkerOutcome::StepError {
                    ordinal,
                    node_id,
                    error,
                } => failures.push((ordinal, node_id, error)),
                WorkerOutcome::Cancelled { .. } => {}
            }
        }
        successes.sort_by_key(|s| s.ordinal);
        failures.sort_by_key(|(ordinal, _, _)| *ordinal);

        // deterministic-mode flush, ordinal ascending, before task terminals
        let mut buffered_drops = (0u64, 0u64);
        for success in &mut successes {
            if let Some(buffer) = success.buffer.take() {
                let (events, dropped_tokens, dropped_debug) = buffer.into_parts();
                for kind in events {
                    env.bus
                        .publish(Some(step), Some(success.ordinal), kind)
                        .await;
                }
                buffered_drops.0 += dropped_tokens;
                buffered_drops.1 += dropped_debug;
            }
        }

        // task terminals in ordinal order
        {
            let mut success_iter = successes.iter().peekable();
            let mut failure_iter = failures.iter().peekable();
            for ordinal in 0..snapshot.frontier.len() {
                if success_iter.peek().map(|s| s.ordinal) == Some(ordinal) {
                    let success = success_iter.next().ok_or_else(|| {
                        HiveError::Execution("task result bookkeeping".to_string())
                    })?;
                    env.bus
                        .publish(
                            Some(step),
                            Some(ordinal),
                            EventKind::TaskFinished {
                                node_id: success.node_id.clone(),
                            },
                        )
                        .await;
                } else if failure_iter.peek().map(|(o, _, _)| *o) == Some(ordinal) {
                    let (_, node_id, error) = failure_iter.next().ok_or_else(|| {
                        HiveError::Execution("task result bookkeeping".to_string())
                    })?;
                    env.bus
                        .publish(
                            Some(step),
                            Some(ordinal),
                            EventKind::TaskFailed {
                                node_id: node_id.clone(),
                                error: error.to_string(),
                            },
                        )
                        .await;
                }
            }
        }

        // smallest-ordinal final error wins
        if let Some((_, _, error)) = failures.into_iter().next() {
            return Err(error);
        }

        // commit planning: pure, deterministic, abort-safe
        let plan = algo::plan_commit(
            registry,
            &env.graph,
            &snapshot.global,
            &snapshot.joins,
            &successes,
        )?;

        // interrupt atomicity: the forced save needs a store
        if plan.interrupt.is_some() && env.store.is_none() {
            return Err(HiveError::CheckpointStoreMissing);
        }

        let new_step = step + 1;
        let should_save =
            env.options.checkpoint_policy.should_save(new_step) || plan.interrupt.is_some();
        let mut saved: Option<String> = None;
        if should_save {
            let store = env
                .store
                .as_ref()
                .ok_or(HiveError::CheckpointStoreMissing)?;
            let checkpoint = codec::build_checkpoint(
                registry,
                &env.graph,
                &env.thread_id,
                &snapshot.run_id,
                new_step,
                &plan.post_global,
                &plan.next_frontier,
                &plan.next_joins,
                plan.interrupt.as_ref().map(|s| &s.interruption),
            )?;
            store.save(&checkpoint).await?;
            env.logger.debug(
                "checkpoint saved",
                &[("id", checkpoint.id.clone()), ("step", new_step.to_string())],
            );
            saved = Some(checkpoint.id);
        }

        // atomic publish
        snapshot.global = Arc::new(plan.post_global);
        snapshot.frontier = plan.next_frontier;
        snapshot.step_index = new_step;
        snapshot.joins = plan.next_joins;
        snapshot.pending_interrupt = plan
            .interrupt
            .as_ref()
            .map(|selected| selected.interruption.clone());
        if let Some(id) = &saved {
            snapshot.latest_checkpoint_id = Some(id.clone());
        }
        *slot = Some(snapshot.clone());

        // commit-scoped events
        for (channel, value) in &plan.reduced_global {
            let spec = registry.require(channel)?;
            env.bus
                .publish(
                    Some(step),
                    None,
                    EventKind::WriteApplied {
                        channel: channel.clone(),
                        payload_hash: spec.payload_hash(value),
                    },
                )
                .await;
        }
        if let Some(checkpoint_id) = &saved {
            env.bus
                .publish(
                    Some(step),
                    None,
                    EventKind::CheckpointSaved {
                        checkpoint_id: checkpoint_id.clone(),
                    },
                )
                .await;
        }
        let (bus_tokens, bus_debug) = env.bus.take_drop_counts();
        let dropped_tokens = bus_tokens + buffered_drops.0;
        let dropped_debug = bus_debug + buffered_drops.1;
        if dropped_tokens + dropped_debug > 0 {
            env.bus
                .publish(
                    Some(step),
                    None,
                    EventKind::StreamBackpressure {
                        dropped_tokens,
                        dropped_debug,
                    },
                )
                .await;
        }
        env.bus
            .publish(
                Some(step),
                None,
                EventKind::StepFinished {
                    step,
                    next_frontier_count: snapshot.frontier.len(),
                },
            )
            .await;

        steps_executed += 1;
        resume_payload = None;

        // an interrupt boundary terminates the attempt after stepFinished
        if let Some(interruption) = snapshot.pending_interrupt.clone() {
            env.bus
                .publish(
                    None,
                    None,
                    EventKind::RunInterrupted {
                        interrupt_id: interruption.id.clone(),
                    },
                )
                .await;
            let checkpoint_id = saved.ok_or(HiveError::CheckpointStoreMissing)?;
            return Ok(RunOutcome::Interrupted {
                interruption,
                checkpoint_id,
            });
        }
    }
}

/// Bounded-parallel execution of one step's frontier
async fn compute_step(
    env: &AttemptEnv,
    registry: &Arc<SchemaRegistry>,
    snapshot: &ThreadSnapshot,
    task_ids: &[String],
    step: u64,
    resume_payload: Option<Value>,
    semaphore: &Arc<Semaphore>,
) -> Vec<WorkerOutcome> {
    let deterministic = env.options.deterministic_token_streaming;
    let buffer_capacity = env.options.event_buffer_capacity;

    let workers = snapshot.frontier.iter().enumerate().map(|(ordinal, task)| {
        let task_id = task_ids[ordinal].clone();
        let resume = resume_payload.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await.ok();

            let compiled = match env.graph.node(&task.node_id) {
                Some(compiled) => compiled,
                None => {
                    return WorkerOutcome::Failed {
                        ordinal,
                        node_id: task.node_id.clone(),
                        error: HiveError::UnknownNextNode {
                            node: task.node_id.clone(),
                        },
                    }
                }
            };

            let mut attempt: u32 = 1;
            loop {
                if env.cancel.is_cancelled() {
                    return WorkerOutcome::Cancelled { ordinal };
                }

                let buffer = deterministic
                    .then(|| Arc::new(StdMutex::new(TaskEventBuffer::new(buffer_capacity))));
                let sink = match &buffer {
                    Some(buffer) => EventSink::buffered(
                        buffer.clone(),
                        task.node_id.clone(),
                        step,
                        ordinal,
                    ),
                    None => EventSink::direct(
                        env.bus.clone(),
                        task.node_id.clone(),
                        step,
                        ordinal,
                    ),
                }
                .with_debug_payloads(env.options.debug_payloads);

                let view = StateView::for_task(
                    registry.clone(),
                    snapshot.global.clone(),
                    task.overlay.clone(),
                );
                let ctx = NodeContext::new(
                    view,
                    sink,
                    TaskInfo {
                        task_id: task_id.clone(),
                        node_id: task.node_id.clone(),
                        ordinal,
                        step,
                    },
                    resume.clone(),
                );

                let result = tokio::select! {
                    _ = env.cancel.cancelled() => return WorkerOutcome::Cancelled { ordinal },
                    result = compiled.node.run(ctx) => result,
                };

                match result {
                    Ok(output) => {
                        // only the final successful attempt's buffer survives
                        let buffer = buffer.map(|b| {
                            std::mem::replace(
                                &mut *b.lock().unwrap(),
                                TaskEventBuffer::new(0),
                            )
                        });
                        return WorkerOutcome::Success(Box::new(TaskSuccess {
                            ordinal,
                            node_id: task.node_id.clone(),
                            task_id: task_id.clone(),
                            overlay: task.overlay.clone(),
                            output,
                            buffer,
                        }));
                    }
                    Err(error @ HiveError::ModelStreamInvalid { .. }) => {
                        return WorkerOutcome::StepError {
                            ordinal,
                            node_id: task.node_id.clone(),
                            error,
                        }
                    }
                    Err(error) => {
                        if !compiled.retry.should_retry(attempt) {
                            env.logger.warn(
                                "node failed",
                                &[
                                    ("node", task.node_id.clone()),
                                    ("attempts", attempt.to_string()),
                                    ("error", error.to_string()),
                                ],
                            );
                            return WorkerOutcome::Failed {
                                ordinal,
                                node_id: task.node_id.clone(),
                                error,
                            };
                        }
                        let delay = compiled.retry.delay_ns(attempt);
                        env.logger.debug(
                            "retrying node",
                            &[
                                ("node", task.node_id.clone()),
                                ("attempt", attempt.to_string()),
                                ("delay_ns", delay.to_string()),
                            ],
                        );
                        if delay > 0 {
                            tokio::select! {
                                _ = env.cancel.cancelled() => {
                                    return WorkerOutcome::Cancelled { ordinal }
                                }
                                _ = env.clock.sleep(delay) => {}
                            }
                        }
                        attempt += 1;
                    }
                }
            }
        }
    });

    futures::future::join_all(workers).await
}

/// The one-shot synthetic committed step of `apply_external_writes`
///
/// Empty frontier, no node execution, no join updates; ignores `max_steps`;
/// always checkpoints when a store is configured.
async fn external_writes_step(
    env: &AttemptEnv,
    registry: &Arc<SchemaRegistry>,
    mut snapshot: ThreadSnapshot,
    writes: Vec<ChannelWrite>,
    slot: &mut Option<ThreadSnapshot>,
) -> Result<RunOutcome> {
    let step = snapshot.step_index;
    env.bus
        .publish(
            Some(step),
            None,
            EventKind::StepStarted {
                step,
                frontier_count: 0,
            },
        )
        .await;

    let reduced = algo::reduce_synthetic_writes(registry, &snapshot.global, &writes)?;
    let mut post_global = (*snapshot.global).clone();
    for (channel, value) in &reduced {
        post_global.insert(channel.clone(), value.clone());
    }
    for spec in registry.sorted_specs() {
        if spec.scope() == ChannelScope::Global && spec.persistence() == Persistence::Ephemeral {
            if let Some(initial) = registry.initial(spec.id()) {
                post_global.insert(spec.id().to_string(), initial.clone());
            }
        }
    }

    let new_step = step + 1;
    let mut saved: Option<String> = None;
    if let Some(store) = &env.store {
        let checkpoint = codec::build_checkpoint(
            registry,
            &env.graph,
            &env.thread_id,
            &snapshot.run_id,
            new_step,
            &post_global,
            &snapshot.frontier,
            &snapshot.joins,
            None,
        )?;
        store.save(&checkpoint).await?;
        saved = Some(checkpoint.id);
    }

    snapshot.global = Arc::new(post_global);
    snapshot.step_index = new_step;
    if let Some(id) = &saved {
        snapshot.latest_checkpoint_id = Some(id.clone());
    }
    *slot = Some(snapshot.clone());

    for (channel, value) in &reduced {
        let spec = registry.require(channel)?;
        env.bus
            .publish(
                Some(step),
                None,
                EventKind::WriteApplied {
                    channel: channel.clone(),
                    payload_hash: spec.payload_hash(value),
                },
            )
            .await;
    }
    if let Some(checkpoint_id) = &saved {
        env.bus
            .publish(
                Some(step),
                None,
                EventKind::CheckpointSaved {
                    checkpoint_id: checkpoint_id.clone(),
                },
            )
            .await;
    }
    env.bus
        .publish(
            Some(step),
            None,
            EventKind::StepFinished {
                step,
                next_frontier_count: snapshot.frontier.len(),
            },
        )
        .await;
    env.bus.publish(None, None, EventKind::RunFinished).await;

    Ok(RunOutcome::Finished {
        output: project_output(registry, &env.graph, &env.options, &snapshot.global),
        checkpoint_id: snapshot.latest_checkpoint_id.clone(),
    })
}
