//! Event stream - bounded, backpressure-aware, deterministically ordered
//!
//! Every attempt owns one [`EventBus`]: a bounded ring buffer the engine and
//! node sinks publish into and the caller consumes from. Events fall into
//! two classes:
//!
//! - **Deterministic** (run/step/task lifecycle, `writeApplied`,
//!   `checkpointSaved`/`Loaded`, `streamBackpressure`): never dropped.
//!   Producers suspend until the ring has room.
//! - **Stream** (`modelToken`, `customDebug`): best-effort. When the ring is
//!   full, a token whose `(step, task)` matches the last enqueued token
//!   *coalesces* into it (text concatenation, no new slot); anything else is
//!   dropped and counted. `modelInvocationStarted/Finished` and
//!   `toolInvocationStarted/Finished` are stream-class but non-droppable.
//!
//! Dropped counts accumulate per step and surface as one
//! `streamBackpressure` event immediately before `stepFinished`.
//!
//! # Deterministic token mode
//!
//! With deterministic token streaming enabled, node sinks write into a
//! per-task-attempt [`TaskEventBuffer`] instead of the shared ring. Failed
//! attempts' buffers are discarded; after compute, the engine flushes the
//! surviving buffers in ascending task-ordinal order, so the consumer sees
//! no cross-task interleaving regardless of completion timing. A
//! non-droppable stream event overflowing the per-task bound fails the step
//! with `ModelStreamInvalid`.
//!
//! The bus supports a single consumer. A failing attempt terminates the
//! stream by surfacing the same error the outcome carries; the four
//! non-error outcomes terminate it normally.

use crate::error::HiveError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use uuid::Uuid;

/// Default ring capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// Identity of one event: stable ordering key within an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventId {
    /// Run the event belongs to (stable across resumes)
    pub run_id: Uuid,
    /// Attempt that produced the event (fresh per run/resume call)
    pub attempt_id: Uuid,
    /// Monotonic index within the attempt
    pub event_index: u64,
    /// Step the event is scoped to, if any
    pub step_index: Option<u64>,
    /// Task ordinal the event is scoped to, if any
    pub task_ordinal: Option<usize>,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    RunStarted,
    CheckpointLoaded {
        checkpoint_id: String,
        step_index: u64,
    },
    RunResumed {
        interrupt_id: String,
    },
    StepStarted {
        step: u64,
        frontier_count: usize,
    },
    TaskStarted {
        node_id: String,
        task_id: String,
    },
    TaskFinished {
        node_id: String,
    },
    TaskFailed {
        node_id: String,
        error: String,
    },
    WriteApplied {
        channel: String,
        payload_hash: String,
    },
    CheckpointSaved {
        checkpoint_id: String,
    },
    StreamBackpressure {
        dropped_tokens: u64,
        dropped_debug: u64,
    },
    StepFinished {
        step: u64,
        next_frontier_count: usize,
    },
    RunFinished,
    RunInterrupted {
        interrupt_id: String,
    },
    RunCancelled,
    ModelInvocationStarted {
        model: String,
    },
    ModelToken {
        text: String,
    },
    ModelInvocationFinished {
        model: String,
    },
    ToolInvocationStarted {
        tool: String,
    },
    ToolInvocationFinished {
        tool: String,
    },
    CustomDebug {
        payload: Value,
    },
}

impl EventKind {
    /// May this event be discarded under backpressure?
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::ModelToken { .. } | Self::CustomDebug { .. })
    }

    /// Is this a node-emitted stream event (vs an engine lifecycle event)?
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            Self::ModelInvocationStarted { .. }
                | Self::ModelToken { .. }
                | Self::ModelInvocationFinished { .. }
                | Self::ToolInvocationStarted { .. }
                | Self::ToolInvocationFinished { .. }
                | Self::CustomDebug { .. }
        )
    }
}

/// One delivered event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
}

struct BusState {
    queue: VecDeque<Event>,
    run_id: Uuid,
    next_index: u64,
    closed: bool,
    error: Option<Arc<HiveError>>,
    dropped_tokens: u64,
    dropped_debug: u64,
}

/// Bounded single-consumer event ring for one attempt
pub struct EventBus {
    attempt_id: Uuid,
    state: Mutex<BusState>,
    /// Permits = free slots; non-droppable producers block here
    space: Semaphore,
    /// Consumer wakeup
    items: Notify,
}

impl EventBus {
    pub fn new(attempt_id: Uuid, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            attempt_id,
            state: Mutex::new(BusState {
                queue: VecDeque::with_capacity(capacity),
                run_id: Uuid::nil(),
                next_index: 0,
                closed: false,
                error: None,
                dropped_tokens: 0,
                dropped_debug: 0,
            }),
            space: Semaphore::new(capacity),
            items: Notify::new(),
        })
    }

    /// Stamp events with the resolved run id
    ///
    /// Called once the attempt has resolved its baseline, before the first
    /// publish.
    pub fn set_run_id(&self, run_id: Uuid) {
        self.state.lock().unwrap().run_id = run_id;
    }

    fn stamp(
        &self,
        state: &mut BusState,
        step: Option<u64>,
        ordinal: Option<usize>,
        kind: EventKind,
    ) -> Event {
        let id = EventId {
            run_id: state.run_id,
            attempt_id: self.attempt_id,
            event_index: state.next_index,
            step_index: step,
            task_ordinal: ordinal,
        };
        state.next_index += 1;
        Event { id, kind }
    }

    /// Publish a non-droppable event, suspending while the ring is full
    pub async fn publish(&self, step: Option<u64>, ordinal: Option<usize>, kind: EventKind) {
        match self.space.acquire().await {
            Ok(permit) => permit.forget(),
            // Closed bus: the attempt is over, late events are discarded.
            Err(_) => return,
        }
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        let event = self.stamp(&mut state, step, ordinal, kind);
        state.queue.push_back(event);
        drop(state);
        self.items.notify_one();
    }

    /// Publish a droppable stream event; never suspends
    ///
    /// When the ring is full: a token coalesces into the last enqueued event
    /// if that is a token with the same `(step, task)`; otherwise the event
    /// is dropped and counted.
    pub fn publish_droppable(&self, step: Option<u64>, ordinal: Option<usize>, kind: EventKind) {
        debug_assert!(kind.is_droppable());
        match self.space.try_acquire() {
            Ok(permit) => {
                permit.forget();
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return;
                }
                let event = self.stamp(&mut state, step, ordinal, kind);
                state.queue.push_back(event);
                drop(state);
                self.items.notify_one();
            }
            Err(TryAcquireError::NoPermits) => {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return;
                }
                match kind {
                    EventKind::ModelToken { text } => {
                        let coalesced = match state.queue.back_mut() {
                            Some(Event {
                                id,
                                kind: EventKind::ModelToken { text: existing },
                            }) if id.step_index == step && id.task_ordinal == ordinal => {
                                existing.push_str(&text);
                                true
                            }
                            _ => false,
                        };
                        if !coalesced {
                            state.dropped_tokens += 1;
                        }
                    }
                    EventKind::CustomDebug { .. } => {
                        state.dropped_debug += 1;
                    }
                    _ => {}
                }
            }
            Err(TryAcquireError::Closed) => {}
        }
    }

    /// Read and reset the per-step drop counters
    pub fn take_drop_counts(&self) -> (u64, u64) {
        let mut state = self.state.lock().unwrap();
        let counts = (state.dropped_tokens, state.dropped_debug);
        state.dropped_tokens = 0;
        state.dropped_debug = 0;
        counts
    }

    /// Terminate the stream normally
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.space.close();
        self.items.notify_waiters();
        self.items.notify_one();
    }

    /// Terminate the stream by surfacing an error to the consumer
    pub fn close_with_error(&self, error: Arc<HiveError>) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.error = Some(error);
        drop(state);
        self.space.close();
        self.items.notify_waiters();
        self.items.notify_one();
    }
}

/// Consumer half of an attempt's event stream
pub struct EventReceiver {
    bus: Arc<EventBus>,
}

impl EventReceiver {
    pub(crate) fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Next event: `Some(Ok(_))` for events, `Some(Err(_))` once when the
    /// attempt failed, `None` when the stream is exhausted
    pub async fn recv(&mut self) -> Option<Result<Event, Arc<HiveError>>> {
        loop {
            {
                let mut state = self.bus.state.lock().unwrap();
                if let Some(event) = state.queue.pop_front() {
                    drop(state);
                    self.bus.space.add_permits(1);
                    return Some(Ok(event));
                }
                if state.closed {
                    return state.error.take().map(Err);
                }
            }
            self.bus.items.notified().await;
        }
    }

    /// Adapt the receiver into a `futures::Stream`
    pub fn into_stream(
        mut self,
    ) -> impl futures::Stream<Item = Result<Event, Arc<HiveError>>> + Send {
        async_stream::stream! {
            while let Some(item) = self.recv().await {
                yield item;
            }
        }
    }

    /// Drain the stream, collecting events and the terminal error if any
    pub async fn collect_all(mut self) -> (Vec<Event>, Option<Arc<HiveError>>) {
        let mut events = Vec::new();
        while let Some(item) = self.recv().await {
            match item {
                Ok(event) => events.push(event),
                Err(e) => return (events, Some(e)),
            }
        }
        (events, None)
    }
}

/// Per-task-attempt buffer used in deterministic token mode
///
/// Bounded by the configured event buffer capacity. Droppable overflow
/// follows the same coalesce-or-drop rules as the shared ring; non-droppable
/// overflow is a step failure.
pub struct TaskEventBuffer {
    events: Vec<EventKind>,
    capacity: usize,
    dropped_tokens: u64,
    dropped_debug: u64,
}

impl TaskEventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity,
            dropped_tokens: 0,
            dropped_debug: 0,
        }
    }

    /// Buffer one stream event
    ///
    /// Returns `false` when a non-droppable event exceeded the bound.
    pub fn push(&mut self, kind: EventKind) -> bool {
        if self.events.len() < self.capacity {
            self.events.push(kind);
            return true;
        }
        match kind {
            EventKind::ModelToken { text } => {
                // All buffered events share this task's (step, ordinal), so
                // the coalesce key reduces to "last event is a token".
                if let Some(EventKind::ModelToken { text: existing }) = self.events.last_mut() {
                    existing.push_str(&text);
                } else {
                    self.dropped_tokens += 1;
                }
                true
            }
            EventKind::CustomDebug { .. } => {
                self.dropped_debug += 1;
                true
            }
            _ => false,
        }
    }

    /// Buffered events plus this buffer's drop counts
    pub fn into_parts(self) -> (Vec<EventKind>, u64, u64) {
        (self.events, self.dropped_tokens, self.dropped_debug)
    }
}

/// Channel-scoped sink handed to node code
///
/// Routes stream events either straight to the shared ring (default) or to
/// the task's deterministic buffer.
#[derive(Clone)]
pub struct EventSink {
    target: SinkTarget,
    node_id: String,
    step: u64,
    ordinal: usize,
    debug_payloads: bool,
}

#[derive(Clone)]
enum SinkTarget {
    Direct(Arc<EventBus>),
    Buffered(Arc<Mutex<TaskEventBuffer>>),
}

impl EventSink {
    pub(crate) fn direct(bus: Arc<EventBus>, node_id: String, step: u64, ordinal: usize) -> Self {
        Self {
            target: SinkTarget::Direct(bus),
            node_id,
            step,
            ordinal,
            debug_payloads: true,
        }
    }

    pub(crate) fn buffered(
        buffer: Arc<Mutex<TaskEventBuffer>>,
        node_id: String,
        step: u64,
        ordinal: usize,
    ) -> Self {
        Self {
            target: SinkTarget::Buffered(buffer),
            node_id,
            step,
            ordinal,
            debug_payloads: true,
        }
    }

    /// Suppress `customDebug` events entirely when disabled
    pub(crate) fn with_debug_payloads(mut self, enabled: bool) -> Self {
        self.debug_payloads = enabled;
        self
    }

    async fn emit(&self, kind: EventKind) -> crate::error::Result<()> {
        match &self.target {
            SinkTarget::Direct(bus) => {
                if kind.is_droppable() {
                    bus.publish_droppable(Some(self.step), Some(self.ordinal), kind);
                } else {
                    bus.publish(Some(self.step), Some(self.ordinal), kind).await;
                }
                Ok(())
            }
            SinkTarget::Buffered(buffer) => {
                let accepted = buffer.lock().unwrap().push(kind);
                if accepted {
                    Ok(())
                } else {
                    Err(HiveError::ModelStreamInvalid {
                        node: self.node_id.clone(),
                    })
                }
            }
        }
    }

    /// Emit one model output token
    pub async fn model_token(&self, text: impl Into<String>) -> crate::error::Result<()> {
        self.emit(EventKind::ModelToken { text: text.into() }).await
    }

    /// Emit a free-form debug payload
    ///
    /// A no-op when debug payloads are disabled for the run.
    pub async fn debug(&self, payload: Value) -> crate::error::Result<()> {
        if !self.debug_payloads {
            return Ok(());
        }
        self.emit(EventKind::CustomDebug { payload }).await
    }

    /// Mark the start of a model invocation
    pub async fn model_invocation_started(
        &self,
        model: impl Into<String>,
    ) -> crate::error::Result<()> {
        self.emit(EventKind::ModelInvocationStarted {
            model: model.into(),
        })
        .await
    }

    /// Mark the end of a model invocation
    pub async fn model_invocation_finished(
        &self,
        model: impl Into<String>,
    ) -> crate::error::Result<()> {
        self.emit(EventKind::ModelInvocationFinished {
            model: model.into(),
        })
        .await
    }

    /// Mark the start of a tool invocation
    pub async fn tool_invocation_started(
        &self,
        tool: impl Into<String>,
    ) -> crate::error::Result<()> {
        self.emit(EventKind::ToolInvocationStarted { tool: tool.into() })
            .await
    }

    /// Mark the end of a tool invocation
    pub async fn tool_invocation_finished(
        &self,
        tool: impl Into<String>,
    ) -> crate::error::Result<()> {
        self.emit(EventKind::ToolInvocationFinished { tool: tool.into() })
            .await
    }
}
