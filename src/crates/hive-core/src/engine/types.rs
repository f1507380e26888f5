//! Engine data types: frontier tasks, task results, thread snapshots

use crate::canonical;
use crate::error::Result;
use crate::node::NodeOutput;
use crate::schema::SchemaRegistry;
use crate::store::{GlobalState, TaskOverlay};
use crate::stream::TaskEventBuffer;
use hive_checkpoint::{Interruption, TaskProvenance};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// One scheduled unit of work: node, overlay, provenance
///
/// The fingerprint is computed once at scheduling time and reused for the
/// task id, graph-seed dedupe and checkpoint encoding.
#[derive(Debug, Clone)]
pub struct FrontierTask {
    pub node_id: String,
    pub overlay: Arc<TaskOverlay>,
    pub provenance: TaskProvenance,
    pub fingerprint: [u8; 32],
}

impl FrontierTask {
    /// Build a task, fingerprinting its effective local view
    ///
    /// Overlay entries that do not name a declared task-local channel are
    /// discarded: no read path can observe them, and dropping them here
    /// keeps in-memory and checkpoint-restored tasks identical.
    pub fn new(
        node_id: impl Into<String>,
        mut overlay: TaskOverlay,
        provenance: TaskProvenance,
        registry: &SchemaRegistry,
    ) -> Result<Self> {
        overlay.retain(|channel, _| {
            registry
                .spec(channel)
                .map(|s| s.scope() == crate::channel::ChannelScope::TaskLocal)
                .unwrap_or(false)
        });
        let fingerprint = registry.local_fingerprint(&overlay)?;
        Ok(Self {
            node_id: node_id.into(),
            overlay: Arc::new(overlay),
            provenance,
            fingerprint,
        })
    }

    /// Deterministic task id for this task at `(step, ordinal)`
    pub fn task_id(&self, run_id: &Uuid, step: u64, ordinal: usize) -> Result<String> {
        canonical::task_id(run_id, step, &self.node_id, ordinal, &self.fingerprint)
    }

    /// Dedupe key for graph seeds
    pub fn dedupe_key(&self) -> (String, [u8; 32]) {
        (self.node_id.clone(), self.fingerprint)
    }
}

/// Join progress: canonical join id -> seen parents
pub type JoinProgress = BTreeMap<String, BTreeSet<String>>;

/// Committed in-memory state of one thread between attempts
#[derive(Clone, Debug)]
pub struct ThreadSnapshot {
    pub run_id: Uuid,
    /// The next step to execute
    pub step_index: u64,
    pub global: Arc<GlobalState>,
    pub frontier: Vec<FrontierTask>,
    pub joins: JoinProgress,
    pub pending_interrupt: Option<Interruption>,
    pub latest_checkpoint_id: Option<String>,
}

impl ThreadSnapshot {
    /// Fresh state for a new run
    pub fn fresh(registry: &SchemaRegistry, join_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            step_index: 0,
            global: Arc::new(registry.initial_global_state()),
            frontier: Vec::new(),
            joins: join_ids.into_iter().map(|id| (id, BTreeSet::new())).collect(),
            pending_interrupt: None,
            latest_checkpoint_id: None,
        }
    }
}

/// Result of one successfully executed task
pub struct TaskSuccess {
    pub ordinal: usize,
    pub node_id: String,
    pub task_id: String,
    pub overlay: Arc<TaskOverlay>,
    pub output: NodeOutput,
    /// Deterministic-mode stream buffer of the final successful attempt
    pub buffer: Option<TaskEventBuffer>,
}

/// What one worker returned
pub enum WorkerOutcome {
    Success(Box<TaskSuccess>),
    /// Retries exhausted; the final error
    Failed {
        ordinal: usize,
        node_id: String,
        error: crate::error::HiveError,
    },
    /// A step-level failure that must not be retried (e.g. stream overflow)
    StepError {
        ordinal: usize,
        node_id: String,
        error: crate::error::HiveError,
    },
    /// Cancellation observed mid-execution
    Cancelled { ordinal: usize },
}

/// A winning interrupt plus the ordinal it was selected at
#[derive(Debug)]
pub struct SelectedInterrupt {
    pub ordinal: usize,
    pub interruption: Interruption,
}
