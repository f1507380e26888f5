//! End-to-end runtime scenarios
//!
//! Each test drives a small compiled graph through the public API and
//! asserts on the outcome, the committed output and the event trace.

use async_trait::async_trait;
use hive_checkpoint::{Checkpoint, CheckpointError, CheckpointStore, InMemoryCheckpointStore};
use hive_core::canonical;
use hive_core::channel::{ChannelSpec, ValueType};
use hive_core::graph::GraphBuilder;
use hive_core::node::{NodeContext, NodeOutput, RouterResult, SpawnTask};
use hive_core::options::{CheckpointPolicy, RunOptions};
use hive_core::schema::Schema;
use hive_core::stream::{Event, EventKind};
use hive_core::{Hive, HiveError, RunHandle, RunOutcome};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Drain the event stream concurrently and await the outcome
async fn drive(mut handle: RunHandle) -> (Vec<Event>, Result<RunOutcome, Arc<HiveError>>) {
    let events = handle.take_events().expect("events not yet taken");
    let drain = tokio::spawn(events.collect_all());
    let outcome = handle.outcome().await;
    let (events, _stream_error) = drain.await.expect("drain task");
    (events, outcome)
}

fn finished_output(outcome: Result<RunOutcome, Arc<HiveError>>) -> Value {
    match outcome {
        Ok(RunOutcome::Finished { output, .. }) => output,
        other => panic!("expected Finished, got {other:?}"),
    }
}

/// Node ids of `taskStarted` events in a given step, in emission order
fn started_nodes(events: &[Event], step: u64) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.id.step_index == Some(step))
        .filter_map(|e| match &e.kind {
            EventKind::TaskStarted { node_id, .. } => Some(node_id.clone()),
            _ => None,
        })
        .collect()
}

fn count_kind(events: &[Event], predicate: impl Fn(&EventKind) -> bool) -> usize {
    events.iter().filter(|e| predicate(&e.kind)).count()
}

fn sum_reducer(current: Value, update: Value) -> Result<Value, String> {
    let a = current.as_f64().ok_or("value must be a number")?;
    let b = update.as_f64().ok_or("value must be a number")?;
    Ok(json!(a + b))
}

fn sum_schema() -> Schema {
    Schema::new(vec![ChannelSpec::new(
        "value",
        ValueType::Number,
        hive_core::ChannelScope::Global,
        hive_core::Persistence::Checkpointed,
        hive_core::UpdatePolicy::Multi,
        Arc::new(sum_reducer),
        Arc::new(|| json!(0)),
        Some(Arc::new(hive_core::JsonCodec::new())),
    )])
}

struct FailingStore;

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn save(&self, _checkpoint: &Checkpoint) -> hive_checkpoint::Result<()> {
        Err(CheckpointError::Storage("save rejected".to_string()))
    }

    async fn load_latest(&self, _thread_id: &str) -> hive_checkpoint::Result<Option<Checkpoint>> {
        Ok(None)
    }
}

// Two tasks write to a multi channel; the merged order follows task
// ordinals and emission indexes, not completion timing.
#[tokio::test(start_paused = true)]
async fn determinism_under_random_completion() {
    let schema = Schema::new(vec![ChannelSpec::appending("values")]);
    let graph = GraphBuilder::new(schema)
        .add_start("A")
        .add_start("B")
        .add_node("A", |_ctx| {
            Box::pin(async move {
                // finish well after B
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(NodeOutput::new()
                    .with_write("values", json!([1]))
                    .with_write("values", json!([2]))
                    .end())
            })
        })
        .add_node("B", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("values", json!([3])).end()) })
        })
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (_events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert_eq!(finished_output(outcome)["values"], json!([1, 2, 3]));
}

// Routers read a fresh view containing only their own task's writes,
// never a sibling's.
#[tokio::test]
async fn fresh_read_router_isolation() {
    let route = |target: &'static str| {
        move |view: &hive_core::StateView| -> Result<RouterResult, String> {
            let value = view.get("value").map_err(|e| e.to_string())?;
            if value == json!(1.0) || value == json!(1) {
                Ok(RouterResult::Nodes(vec![target.to_string()]))
            } else {
                Ok(RouterResult::Nodes(vec![]))
            }
        }
    };
    let graph = GraphBuilder::new(sum_schema())
        .add_start("A")
        .add_start("B")
        .add_node("A", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("value", json!(1))) })
        })
        .add_node("B", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("value", json!(1))) })
        })
        .add_node("X", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .add_node("Y", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .add_router("A", route("X"))
        .add_router("B", route("Y"))
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert!(matches!(outcome, Ok(RunOutcome::Finished { .. })));
    assert_eq!(started_nodes(&events, 1), vec!["X", "Y"]);
    // the committed value saw both writes
    let output = match outcome {
        Ok(RunOutcome::Finished { output, .. }) => output,
        _ => unreachable!(),
    };
    assert_eq!(output["value"], json!(2.0));
}

// A join whose parents arrive via graph routing and via spawn schedules
// its target exactly once, at step 2.
#[tokio::test]
async fn join_barrier_with_spawn_parent() {
    let j_runs = Arc::new(AtomicUsize::new(0));
    let j_counter = j_runs.clone();

    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("S")
        .add_node("S", |_ctx| {
            Box::pin(async move {
                Ok(NodeOutput::new()
                    .goto(["A"])
                    .with_spawn(SpawnTask::new("B")))
            })
        })
        .add_node("A", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .add_node("B", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .add_node_arc("J", {
            struct CountingNode(Arc<AtomicUsize>);
            #[async_trait]
            impl hive_core::Node for CountingNode {
                async fn run(&self, _ctx: NodeContext) -> hive_core::Result<NodeOutput> {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    Ok(NodeOutput::new().end())
                }
            }
            Arc::new(CountingNode(j_counter))
        })
        .add_join(["A", "B"], "J")
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert!(matches!(outcome, Ok(RunOutcome::Finished { .. })));

    assert_eq!(started_nodes(&events, 0), vec!["S"]);
    assert_eq!(started_nodes(&events, 1), vec!["A", "B"]);
    assert_eq!(started_nodes(&events, 2), vec!["J"]);
    assert_eq!(j_runs.load(Ordering::SeqCst), 1);
}

// Both tasks request interrupts; the smallest ordinal wins and the
// boundary forces a checkpoint.
#[tokio::test]
async fn interrupt_selection_smallest_ordinal() {
    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema.clone())
        .add_start("A")
        .add_start("B")
        .add_node("A", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().end().with_interrupt(json!("from A"))) })
        })
        .add_node("B", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().end().with_interrupt(json!("from B"))) })
        })
        .compile()
        .unwrap();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let hive = Hive::new(graph).with_store(store.clone());
    let (events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;

    let interruption = match outcome {
        Ok(RunOutcome::Interrupted { interruption, .. }) => interruption,
        other => panic!("expected Interrupted, got {other:?}"),
    };
    assert_eq!(interruption.node_id, "A");
    assert_eq!(interruption.payload, json!("from A"));

    // the interrupt id is the canonical digest of A's task id
    let run_id = events[0].id.run_id;
    let registry = hive_core::SchemaRegistry::build(&schema).unwrap();
    let fingerprint = registry.local_fingerprint(&Default::default()).unwrap();
    let task_id_a = canonical::task_id(&run_id, 0, "A", 0, &fingerprint).unwrap();
    assert_eq!(interruption.id, canonical::interrupt_id(&task_id_a));

    // a committed checkpoint exists at the boundary
    let checkpoint = store.load_latest("t").await.unwrap().unwrap();
    assert_eq!(checkpoint.step_index, 1);
    assert_eq!(checkpoint.interruption.as_ref().unwrap().id, interruption.id);
    assert_eq!(
        count_kind(&events, |k| matches!(k, EventKind::RunInterrupted { .. })),
        1
    );
}

// Graph seeds dedupe by (node, fingerprint); spawn seeds never dedupe.
#[tokio::test]
async fn graph_seed_dedupe_spawn_preservation() {
    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("A")
        .add_node("A", |_ctx| {
            Box::pin(async move {
                Ok(NodeOutput::new()
                    .goto(["B", "B"])
                    .with_spawn(SpawnTask::new("C"))
                    .with_spawn(SpawnTask::new("C")))
            })
        })
        .add_node("B", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .add_node("C", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert!(matches!(outcome, Ok(RunOutcome::Finished { .. })));
    assert_eq!(started_nodes(&events, 1), vec!["B", "C", "C"]);
}

// The step budget stops the run before another step starts.
#[tokio::test]
async fn out_of_steps_terminates_cleanly() {
    let graph = GraphBuilder::new(sum_schema())
        .add_start("A")
        .add_node("A", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("value", json!(1))) })
        })
        .add_edge("A", "A")
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (events, outcome) = drive(
        hive.run("t", json!(null), RunOptions::default().with_max_steps(1)),
    )
    .await;

    match outcome {
        Ok(RunOutcome::OutOfSteps {
            max_steps, output, ..
        }) => {
            assert_eq!(max_steps, 1);
            assert_eq!(output["value"], json!(1.0));
        }
        other => panic!("expected OutOfSteps, got {other:?}"),
    }
    assert_eq!(
        count_kind(&events, |k| matches!(k, EventKind::StepStarted { .. })),
        1
    );
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::StepStarted { step: 0, .. })));
}

// A failing checkpoint save aborts the commit atomically.
#[tokio::test]
async fn checkpoint_save_failure_aborts_commit() {
    fn build() -> hive_core::CompiledGraph {
        GraphBuilder::new(sum_schema())
            .add_start("A")
            .add_node("A", |_ctx| {
                Box::pin(async move { Ok(NodeOutput::new().with_write("value", json!(1)).end()) })
            })
            .compile()
            .unwrap()
    }

    let hive = Hive::new(build()).with_store(Arc::new(FailingStore));
    let (events, outcome) = drive(hive.run(
        "t",
        json!(null),
        RunOptions::default().with_checkpoint_policy(CheckpointPolicy::EveryStep),
    ))
    .await;

    let error = outcome.expect_err("outcome must carry the store error");
    assert!(matches!(*error, HiveError::Checkpoint(_)));
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::WriteApplied { .. })), 0);
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::CheckpointSaved { .. })), 0);
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::StepFinished { .. })), 0);

    // The failed step left no mutation: a second attempt (no checkpointing)
    // starts from the initial value and commits exactly one increment.
    let (_events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert_eq!(finished_output(outcome)["value"], json!(1.0));
}

// Deterministic token mode with a per-task bound of 3: task 0 coalesces
// "B"+"C"; task 1 drops "Z" and its second debug.
#[tokio::test]
async fn backpressure_coalescing_deterministic_mode() {
    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("T0")
        .add_start("T1")
        .add_node("T0", |ctx| {
            Box::pin(async move {
                ctx.events().model_token("A").await?;
                ctx.events().debug(json!({"t": 0})).await?;
                ctx.events().model_token("B").await?;
                ctx.events().model_token("C").await?;
                ctx.events().debug(json!({"t": 0})).await?;
                Ok(NodeOutput::new().end())
            })
        })
        .add_node("T1", |ctx| {
            Box::pin(async move {
                ctx.events().model_token("X").await?;
                ctx.events().model_token("Y").await?;
                ctx.events().debug(json!({"t": 1})).await?;
                ctx.events().model_token("Z").await?;
                ctx.events().debug(json!({"t": 1})).await?;
                Ok(NodeOutput::new().end())
            })
        })
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let options = RunOptions::default()
        .with_event_buffer_capacity(3)
        .with_deterministic_token_streaming(true)
        .with_debug_payloads(true);
    let (events, outcome) = drive(hive.run("t", json!(null), options)).await;
    assert!(matches!(outcome, Ok(RunOutcome::Finished { .. })));

    let tokens: Vec<(Option<usize>, String)> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ModelToken { text } => Some((e.id.task_ordinal, text.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        tokens,
        vec![
            (Some(0), "A".to_string()),
            (Some(0), "BC".to_string()),
            (Some(1), "X".to_string()),
            (Some(1), "Y".to_string()),
        ]
    );

    // backpressure immediately precedes stepFinished
    let backpressure_at = events
        .iter()
        .position(|e| matches!(e.kind, EventKind::StreamBackpressure { .. }))
        .expect("streamBackpressure emitted");
    match &events[backpressure_at].kind {
        EventKind::StreamBackpressure {
            dropped_tokens,
            dropped_debug,
        } => {
            assert_eq!(*dropped_tokens, 1);
            assert_eq!(*dropped_debug, 2);
        }
        _ => unreachable!(),
    }
    assert!(matches!(
        events[backpressure_at + 1].kind,
        EventKind::StepFinished { .. }
    ));

    // no cross-task interleaving of stream events
    let stream_ordinals: Vec<usize> = events
        .iter()
        .filter(|e| e.kind.is_stream())
        .filter_map(|e| e.id.task_ordinal)
        .collect();
    let mut sorted = stream_ordinals.clone();
    sorted.sort_unstable();
    assert_eq!(stream_ordinals, sorted);
}

// Interrupt then resume: payload delivery, pending-interrupt gating, and
// mismatch detection.
#[tokio::test]
async fn interrupt_resume_flow() {
    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("gate")
        .add_node("gate", |_ctx| {
            Box::pin(async move {
                Ok(NodeOutput::new()
                    .goto(["apply"])
                    .with_interrupt(json!({"question": "approve?"})))
            })
        })
        .add_node("apply", |ctx| {
            Box::pin(async move {
                let answer = ctx.resume().cloned().unwrap_or(json!(null));
                Ok(NodeOutput::new().with_write("log", json!([answer])).end())
            })
        })
        .compile()
        .unwrap();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let hive = Hive::new(graph).with_store(store.clone());

    let (events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    let interruption = match outcome {
        Ok(RunOutcome::Interrupted { interruption, .. }) => interruption,
        other => panic!("expected Interrupted, got {other:?}"),
    };
    assert_eq!(interruption.payload, json!({"question": "approve?"}));
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::RunInterrupted { .. })));

    // run while an interrupt is pending is rejected
    let (_e, pending) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert!(matches!(
        *pending.expect_err("run must be rejected"),
        HiveError::InterruptPending { .. }
    ));

    // resume with the wrong id is rejected
    let (_e, mismatch) = drive(hive.resume("t", "bogus", json!("no"), RunOptions::default())).await;
    assert!(matches!(
        *mismatch.expect_err("mismatched id"),
        HiveError::ResumeInterruptMismatch { .. }
    ));

    // resume delivers the payload to the first post-resume step
    let (events, outcome) = drive(hive.resume(
        "t",
        &interruption.id,
        json!("yes"),
        RunOptions::default(),
    ))
    .await;
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::RunResumed { .. })));
    assert_eq!(finished_output(outcome)["log"], json!(["yes"]));

    // the pending interrupt cleared with the resume commit
    let (_e, again) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert!(again.is_ok());
}

// Resume from a fresh runtime instance restores from the checkpoint store
// and converges to the same final store as an uninterrupted run.
#[tokio::test]
async fn resume_idempotence_across_instances() {
    fn build() -> hive_core::CompiledGraph {
        let schema = Schema::new(vec![ChannelSpec::appending("log")]);
        GraphBuilder::new(schema)
            .add_start("a")
            .add_node("a", |_ctx| {
                Box::pin(async move { Ok(NodeOutput::new().with_write("log", json!(["a"]))) })
            })
            .add_node("b", |_ctx| {
                Box::pin(async move { Ok(NodeOutput::new().with_write("log", json!(["b"]))) })
            })
            .add_node("c", |_ctx| {
                Box::pin(async move {
                    Ok(NodeOutput::new().with_write("log", json!(["c"])).end())
                })
            })
            .add_edge("a", "b")
            .add_edge("b", "c")
            .compile()
            .unwrap()
    }
    let options = || {
        RunOptions::default().with_checkpoint_policy(CheckpointPolicy::EveryStep)
    };

    // uninterrupted reference run
    let reference_store = Arc::new(InMemoryCheckpointStore::new());
    let hive = Hive::new(build()).with_store(reference_store);
    let (_e, outcome) = drive(hive.run("ref", json!(null), options())).await;
    let reference = finished_output(outcome);

    // stopped after one step, then continued by a fresh instance that must
    // restore from the store
    let store = Arc::new(InMemoryCheckpointStore::new());
    let first = Hive::new(build()).with_store(store.clone());
    let (_e, stopped) = drive(first.run("t", json!(null), options().with_max_steps(1))).await;
    assert!(matches!(stopped, Ok(RunOutcome::OutOfSteps { .. })));

    let second = Hive::new(build()).with_store(store.clone());
    let (events, outcome) = drive(second.run("t", json!(null), options())).await;
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CheckpointLoaded { .. })));
    assert_eq!(finished_output(outcome), reference);
    assert_eq!(reference["log"], json!(["a", "b", "c"]));
}

// Determinism invariant: completion timing does not change the event
// structure or the committed output.
#[tokio::test(start_paused = true)]
async fn event_traces_are_structurally_identical() {
    fn build(slow_a: bool) -> hive_core::CompiledGraph {
        let schema = Schema::new(vec![ChannelSpec::appending("values")]);
        GraphBuilder::new(schema)
            .add_start("A")
            .add_start("B")
            .add_node("A", move |ctx| {
                Box::pin(async move {
                    if slow_a {
                        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
                    }
                    ctx.events().model_token("a-token").await?;
                    Ok(NodeOutput::new().with_write("values", json!([1, 2])).end())
                })
            })
            .add_node("B", move |ctx| {
                Box::pin(async move {
                    if !slow_a {
                        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
                    }
                    ctx.events().model_token("b-token").await?;
                    Ok(NodeOutput::new().with_write("values", json!([3])).end())
                })
            })
            .compile()
            .unwrap()
    }

    // normalize away run/task identity, keep structure and order
    fn normalize(events: &[Event]) -> Vec<(Option<u64>, Option<usize>, String)> {
        events
            .iter()
            .map(|e| {
                let kind = match &e.kind {
                    EventKind::TaskStarted { node_id, .. } => format!("taskStarted:{node_id}"),
                    other => format!("{other:?}"),
                };
                (e.id.step_index, e.id.task_ordinal, kind)
            })
            .collect()
    }

    let options = || RunOptions::default().with_deterministic_token_streaming(true);

    let (events_a, outcome_a) = drive(Hive::new(build(true)).run("t", json!(null), options())).await;
    let (events_b, outcome_b) =
        drive(Hive::new(build(false)).run("t", json!(null), options())).await;

    assert_eq!(normalize(&events_a), normalize(&events_b));
    assert_eq!(finished_output(outcome_a), finished_output(outcome_b));
}

// applyExternalWrites: synthetic committed step with the documented event
// sequence, step increment and unconditional checkpoint.
#[tokio::test]
async fn apply_external_writes_commits_synthetically() {
    let graph = GraphBuilder::new(sum_schema())
        .add_start("A")
        .add_node("A", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .compile()
        .unwrap();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let hive = Hive::new(graph).with_store(store.clone());

    let writes = vec![
        hive_core::ChannelWrite::new("value", json!(2)),
        hive_core::ChannelWrite::new("value", json!(3)),
    ];
    let (events, outcome) = drive(hive.apply_external_writes("t", writes, RunOptions::default())).await;
    assert_eq!(finished_output(outcome)["value"], json!(5.0));

    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match &e.kind {
            EventKind::StepStarted { .. } => "stepStarted",
            EventKind::WriteApplied { .. } => "writeApplied",
            EventKind::CheckpointSaved { .. } => "checkpointSaved",
            EventKind::StepFinished { .. } => "stepFinished",
            EventKind::RunFinished => "runFinished",
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "stepStarted",
            "writeApplied",
            "checkpointSaved",
            "stepFinished",
            "runFinished"
        ]
    );

    // the synthetic step advanced the step index even with no frontier
    let checkpoint = store.load_latest("t").await.unwrap().unwrap();
    assert_eq!(checkpoint.step_index, 1);
    assert_eq!(checkpoint.frontier_len(), 0);

    // task-local writes are rejected
    let schema = Schema::new(vec![
        ChannelSpec::appending("log"),
        ChannelSpec::last_value("scratch", ValueType::Any, || json!(null)).task_local(),
    ]);
    let graph = GraphBuilder::new(schema)
        .add_start("A")
        .add_node("A", |_ctx| Box::pin(async move { Ok(NodeOutput::new().end()) }))
        .compile()
        .unwrap();
    let hive = Hive::new(graph);
    let (_e, outcome) = drive(hive.apply_external_writes(
        "t2",
        vec![hive_core::ChannelWrite::new("scratch", json!(1))],
        RunOptions::default(),
    ))
    .await;
    assert!(matches!(
        *outcome.expect_err("task-local write"),
        HiveError::TaskLocalWriteNotAllowed { .. }
    ));
}

// Cancellation during a step: all tasks fail, no commit, normal stream end.
#[tokio::test]
async fn cancellation_mid_step() {
    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("waits")
        .add_node("waits", |_ctx| {
            Box::pin(async move {
                // parked until cancellation drops this future
                futures::future::pending::<()>().await;
                Ok(NodeOutput::new().end())
            })
        })
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let mut handle = hive.run("t", json!(null), RunOptions::default());
    let events = handle.take_events().unwrap();
    let drain = tokio::spawn(events.collect_all());

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    handle.cancel();
    let outcome = handle.outcome().await;
    let (events, stream_error) = drain.await.unwrap();

    assert!(stream_error.is_none(), "cancellation is not an error");
    assert!(matches!(outcome, Ok(RunOutcome::Cancelled { .. })));
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::TaskFailed { .. })), 1);
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::RunCancelled)), 1);
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::StepFinished { .. })), 0);
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::WriteApplied { .. })), 0);
}

// Retries: failures back off deterministically through the injected clock;
// the final success contributes the only output.
#[tokio::test(start_paused = true)]
async fn retry_policy_recovers_transient_failures() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("flaky")
        .add_node_with_retry(
            "flaky",
            hive_core::RetryPolicy::exponential_backoff(1_000_000, 2.0, 3, 1_000_000_000),
            move |_ctx| {
                let counter = counter.clone();
                Box::pin(async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        return Err(HiveError::node_failed("flaky", "transient"));
                    }
                    Ok(NodeOutput::new().with_write("log", json!(["ok"])).end())
                })
            },
        )
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (events, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    assert_eq!(finished_output(outcome)["log"], json!(["ok"]));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // the task finished once; failed attempts emit no task terminal
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::TaskFinished { .. })), 1);
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::TaskFailed { .. })), 0);
}

// A task failure after exhausted retries surfaces the smallest ordinal's
// error on both the outcome and the stream, after task terminals.
#[tokio::test]
async fn task_failure_propagates_smallest_ordinal_error() {
    let schema = Schema::new(vec![ChannelSpec::appending("log")]);
    let graph = GraphBuilder::new(schema)
        .add_start("bad0")
        .add_start("bad1")
        .add_node("bad0", |_ctx| {
            Box::pin(async move { Err(HiveError::node_failed("bad0", "first error")) })
        })
        .add_node("bad1", |_ctx| {
            Box::pin(async move { Err(HiveError::node_failed("bad1", "second error")) })
        })
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let mut handle = hive.run("t", json!(null), RunOptions::default());
    let drain = tokio::spawn(handle.take_events().unwrap().collect_all());
    let outcome = handle.outcome().await;
    let (events, stream_error) = drain.await.unwrap();

    let error = outcome.expect_err("attempt fails");
    assert!(matches!(
        &*error,
        HiveError::NodeFailed { node, error } if node == "bad0" && error == "first error"
    ));
    // both tasks still got their taskFailed events
    assert_eq!(count_kind(&events, |k| matches!(k, EventKind::TaskFailed { .. })), 2);
    // the stream surfaced the same error
    let stream_error = stream_error.expect("stream error");
    assert!(Arc::ptr_eq(&error, &stream_error));
}

// Thread serialization: queued operations observe their predecessors'
// committed state; distinct threads are independent.
#[tokio::test]
async fn thread_operations_are_serialized() {
    let graph = GraphBuilder::new(sum_schema())
        .add_start("inc")
        .add_node("inc", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("value", json!(1)).end()) })
        })
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let first = hive.run("t", json!(null), RunOptions::default());
    let second = hive.run("t", json!(null), RunOptions::default());
    let third = hive.run("other", json!(null), RunOptions::default());

    let (_e1, o1) = drive(first).await;
    let (_e2, o2) = drive(second).await;
    let (_e3, o3) = drive(third).await;

    assert_eq!(finished_output(o1)["value"], json!(1.0));
    // the second run on the same thread saw the committed 1.0 and added 1
    assert_eq!(finished_output(o2)["value"], json!(2.0));
    // a different thread id starts fresh
    assert_eq!(finished_output(o3)["value"], json!(1.0));
}

// Run ids are stable across resumes on a thread; attempt ids are fresh.
#[tokio::test]
async fn run_identity_is_stable_across_attempts() {
    let graph = GraphBuilder::new(sum_schema())
        .add_start("inc")
        .add_node("inc", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("value", json!(1)).end()) })
        })
        .compile()
        .unwrap();
    let hive = Hive::new(graph);

    let (events_a, _o) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    let (events_b, _o) = drive(hive.run("t", json!(null), RunOptions::default())).await;

    assert_eq!(events_a[0].id.run_id, events_b[0].id.run_id);
    assert_ne!(events_a[0].id.attempt_id, events_b[0].id.attempt_id);
}

// The output projection limits the surfaced channels, normalized and sorted.
#[tokio::test]
async fn output_projection_is_normalized() {
    let schema = Schema::new(vec![
        ChannelSpec::appending("log"),
        ChannelSpec::last_value("route", ValueType::String, || json!("start")),
    ]);
    let graph = GraphBuilder::new(schema)
        .add_start("A")
        .add_node("A", |_ctx| {
            Box::pin(async move { Ok(NodeOutput::new().with_write("log", json!(["x"])).end()) })
        })
        .with_output_projection(["log"])
        .compile()
        .unwrap();

    let hive = Hive::new(graph);
    let (_e, outcome) = drive(hive.run("t", json!(null), RunOptions::default())).await;
    let output = finished_output(outcome);
    assert_eq!(output, json!({"log": ["x"]}));

    // the override replaces the compiled projection
    let (_e, outcome) = drive(hive.run(
        "t2",
        json!(null),
        RunOptions::default()
            .with_output_projection(hive_core::ProjectionOverride::FullStore),
    ))
    .await;
    let output = finished_output(outcome);
    assert_eq!(output["route"], json!("start"));
}
