//! The Hive runtime: thread-serialized attempts over a compiled graph
//!
//! [`Hive`] owns the compiled graph and the collaborator seams (checkpoint
//! store, clock, logger) and exposes the three operations of the runtime:
//!
//! - [`Hive::run`] - start or continue a thread with an input value
//! - [`Hive::resume`] - deliver a resume payload for a pending interrupt
//! - [`Hive::apply_external_writes`] - commit a synthetic write-only step
//!
//! All three return immediately with a [`RunHandle`]: the caller consumes
//! the event stream, may cancel cooperatively, and awaits the outcome.
//!
//! # Thread serialization
//!
//! Operations on one thread id are strictly FIFO in call order; distinct
//! thread ids proceed in parallel. The queue is a chain of oneshot
//! completions: each enqueued attempt waits for its predecessor's completion
//! signal, so a queued operation always observes the committed state of
//! everything enqueued before it, and finished operations leave nothing
//! behind but the thread's snapshot.
//!
//! # Example
//!
//! ```rust,ignore
//! use hive_core::{Hive, RunOptions};
//! use serde_json::json;
//!
//! let hive = Hive::new(compiled).with_store(store);
//! let mut handle = hive.run("thread-1", json!({"messages": ["hi"]}), RunOptions::default());
//! let mut events = handle.take_events().unwrap();
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! match handle.outcome().await? {
//!     hive_core::RunOutcome::Finished { output, .. } => println!("{output}"),
//!     other => println!("{other:?}"),
//! }
//! ```

use crate::channel::ChannelWrite;
use crate::clock::{Clock, SystemClock};
use crate::engine::loop_impl::{self, AttemptEnv, AttemptKind, RunOutcome};
use crate::engine::types::ThreadSnapshot;
use crate::error::HiveError;
use crate::graph::CompiledGraph;
use crate::logger::{Logger, TracingLogger};
use crate::options::RunOptions;
use crate::stream::{EventBus, EventReceiver};
use hive_checkpoint::CheckpointStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Cooperative cancellation signal
///
/// Checked by the engine at step boundaries and raced against in-flight node
/// executions and backoff sleeps. Cancellation is not an error: the outcome
/// becomes [`RunOutcome::Cancelled`] and the event stream ends normally.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation is signalled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a pre-set flag
        // resolves immediately
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-thread queue entry: committed state plus the tail of the FIFO chain
struct ThreadEntry {
    state: Arc<Mutex<Option<ThreadSnapshot>>>,
    tail: Option<oneshot::Receiver<()>>,
}

/// Strict per-thread FIFO over attempts
#[derive(Default)]
struct ThreadQueue {
    entries: StdMutex<HashMap<String, ThreadEntry>>,
}

impl ThreadQueue {
    /// Reserve the next queue position for `thread_id`
    ///
    /// Returns the predecessor's completion receiver (if any), this
    /// operation's completion sender, and the shared state slot.
    #[allow(clippy::type_complexity)]
    fn enqueue(
        &self,
        thread_id: &str,
    ) -> (
        Option<oneshot::Receiver<()>>,
        oneshot::Sender<()>,
        Arc<Mutex<Option<ThreadSnapshot>>>,
    ) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadEntry {
                state: Arc::new(Mutex::new(None)),
                tail: None,
            });
        let (done_tx, done_rx) = oneshot::channel();
        let prev = entry.tail.replace(done_rx);
        (prev, done_tx, entry.state.clone())
    }
}

/// Handle to one dispatched attempt
pub struct RunHandle {
    events: Option<EventReceiver>,
    cancel: CancelToken,
    join: JoinHandle<Result<RunOutcome, Arc<HiveError>>>,
}

impl RunHandle {
    /// Take the event stream (single consumer; `None` once taken)
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    /// This attempt's cancellation token
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the attempt's outcome
    ///
    /// The same error surfaces here and on the event stream.
    pub async fn outcome(self) -> Result<RunOutcome, Arc<HiveError>> {
        match self.join.await {
            Ok(result) => result,
            Err(join_error) => Err(Arc::new(HiveError::Execution(format!(
                "attempt task aborted: {join_error}"
            )))),
        }
    }
}

/// The runtime instance: one compiled graph, many threads
pub struct Hive {
    graph: Arc<CompiledGraph>,
    store: Option<Arc<dyn CheckpointStore>>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    threads: Arc<ThreadQueue>,
}

impl Hive {
    pub fn new(graph: CompiledGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            store: None,
            clock: Arc::new(SystemClock::new()),
            logger: Arc::new(TracingLogger::new()),
            threads: Arc::new(ThreadQueue::default()),
        }
    }

    /// Attach a checkpoint store
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the clock (tests inject fake time here)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the logger
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Start or continue a thread with an input value
    pub fn run(&self, thread_id: &str, input: Value, options: RunOptions) -> RunHandle {
        self.dispatch(thread_id, AttemptKind::Run { input }, options)
    }

    /// Resume a pending interrupt, delivering `payload` to the first
    /// post-resume step
    pub fn resume(
        &self,
        thread_id: &str,
        interrupt_id: &str,
        payload: Value,
        options: RunOptions,
    ) -> RunHandle {
        self.dispatch(
            thread_id,
            AttemptKind::Resume {
                interrupt_id: interrupt_id.to_string(),
                payload,
            },
            options,
        )
    }

    /// Commit a synthetic write-only step (no node execution)
    pub fn apply_external_writes(
        &self,
        thread_id: &str,
        writes: Vec<ChannelWrite>,
        options: RunOptions,
    ) -> RunHandle {
        self.dispatch(thread_id, AttemptKind::ExternalWrites { writes }, options)
    }

    fn dispatch(&self, thread_id: &str, kind: AttemptKind, options: RunOptions) -> RunHandle {
        let attempt_id = Uuid::new_v4();
        let bus = EventBus::new(attempt_id, options.event_buffer_capacity.max(1));
        let events = EventReceiver::new(bus.clone());
        let cancel = CancelToken::new();
        let (prev, done, state) = self.threads.enqueue(thread_id);

        let env = AttemptEnv {
            graph: self.graph.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            logger: self.logger.clone(),
            options,
            bus,
            cancel: cancel.clone(),
            thread_id: thread_id.to_string(),
        };

        let join = tokio::spawn(async move {
            // wait for the predecessor on this thread id (a dropped sender
            // counts as completion)
            if let Some(prev) = prev {
                let _ = prev.await;
            }
            let mut slot = state.lock().await;
            let result = loop_impl::run_attempt(&env, kind, &mut slot).await;
            drop(slot);

            let outcome = match result {
                Ok(outcome) => {
                    env.bus.close();
                    Ok(outcome)
                }
                Err(error) => {
                    let error = Arc::new(error);
                    env.bus.close_with_error(error.clone());
                    Err(error)
                }
            };
            let _ = done.send(());
            outcome
        });

        RunHandle {
            events: Some(events),
            cancel,
            join,
        }
    }
}
