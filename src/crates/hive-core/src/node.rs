//! Node contract: execution, outputs, routing
//!
//! A node is an async unit of work. It receives a [`NodeContext`] - a
//! composed read view of state, an event sink, its task identity and the
//! resume payload when the step follows a resume - and returns a
//! [`NodeOutput`]: channel writes, spawned child tasks, an explicit routing
//! decision and an optional interrupt request. Nodes return *values*; all
//! mutation happens in the engine's commit phase.
//!
//! Routers are synchronous decision functions attached to at most one node
//! each. After a task commits, its router sees a fresh-read view (the
//! pre-step snapshot plus that task's own reduced writes) and picks the next
//! nodes; [`RouterResult::UseGraphEdges`] falls through to the static edges.
//!
//! # Example
//!
//! ```rust
//! use hive_core::node::{NodeContext, NodeOutput};
//! use serde_json::json;
//!
//! async fn classify(ctx: NodeContext) -> hive_core::Result<NodeOutput> {
//!     let text: String = ctx.view().get_as("input")?;
//!     let label = if text.contains('?') { "question" } else { "statement" };
//!     Ok(NodeOutput::new().with_write("label", json!(label)))
//! }
//! ```

use crate::channel::ChannelWrite;
use crate::error::Result;
use crate::store::{StateView, TaskOverlay};
use crate::stream::EventSink;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Async unit of work executed for one frontier task
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, ctx: NodeContext) -> Result<NodeOutput>;
}

/// Boxed node future used by closure nodes
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>>;

/// Adapter turning a closure into a [`Node`]
pub struct FnNode<F>(pub F);

#[async_trait]
impl<F> Node for FnNode<F>
where
    F: Fn(NodeContext) -> NodeFuture + Send + Sync,
{
    async fn run(&self, ctx: NodeContext) -> Result<NodeOutput> {
        (self.0)(ctx).await
    }
}

/// Identity of the task a node is running as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Deterministic task id
    pub task_id: String,
    /// Node being executed
    pub node_id: String,
    /// Position in the step's frontier
    pub ordinal: usize,
    /// Superstep index
    pub step: u64,
}

/// Everything a node receives for one execution attempt
#[derive(Clone)]
pub struct NodeContext {
    view: StateView,
    events: EventSink,
    task: TaskInfo,
    resume: Option<Value>,
}

impl NodeContext {
    pub(crate) fn new(
        view: StateView,
        events: EventSink,
        task: TaskInfo,
        resume: Option<Value>,
    ) -> Self {
        Self {
            view,
            events,
            task,
            resume,
        }
    }

    /// Composed read view: pre-step globals plus this task's overlay
    pub fn view(&self) -> &StateView {
        &self.view
    }

    /// Stream-event sink scoped to this task
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// This task's identity
    pub fn task(&self) -> &TaskInfo {
        &self.task
    }

    /// Resume payload, present on every task of the first post-resume step
    pub fn resume(&self) -> Option<&Value> {
        self.resume.as_ref()
    }
}

/// Explicit routing decision carried on a node output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NextNodes {
    /// Defer to the node's router, falling back to static edges
    #[default]
    UseGraphEdges,
    /// Route to exactly these nodes; an empty list ends this branch
    Nodes(Vec<String>),
}

/// Result of evaluating a router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterResult {
    /// Fall through to the static edges in builder-insertion order
    UseGraphEdges,
    /// Route to exactly these nodes, in the returned order
    Nodes(Vec<String>),
}

/// Synchronous router: fresh-read view in, routing decision out
pub type RouterFn =
    Arc<dyn Fn(&StateView) -> std::result::Result<RouterResult, String> + Send + Sync>;

/// A child task spawned by a parent, carrying an explicit overlay
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnTask {
    pub node_id: String,
    pub overlay: TaskOverlay,
}

impl SpawnTask {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            overlay: TaskOverlay::new(),
        }
    }

    /// Set one task-local channel in the child's overlay
    pub fn with_local(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.overlay.insert(channel.into(), value);
        self
    }
}

/// An interrupt requested on a task's output
///
/// Interrupts are request-on-output only: the engine reads this field from
/// the committed output and stops *after* the step commits. There is no
/// mid-node interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptRequest {
    pub payload: Value,
}

impl InterruptRequest {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

/// Everything a node returns from one successful execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// Channel writes in emission order
    pub writes: Vec<ChannelWrite>,
    /// Child tasks to schedule next step, order preserved
    pub spawn: Vec<SpawnTask>,
    /// Explicit routing decision
    pub next: NextNodes,
    /// Interrupt request observed at the commit boundary
    pub interrupt: Option<InterruptRequest>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one channel write
    pub fn with_write(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.writes.push(ChannelWrite::new(channel, value));
        self
    }

    /// Route explicitly to the given nodes
    pub fn goto<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next = NextNodes::Nodes(nodes.into_iter().map(Into::into).collect());
        self
    }

    /// End this branch: route to no nodes
    pub fn end(mut self) -> Self {
        self.next = NextNodes::Nodes(vec![]);
        self
    }

    /// Append one spawned child task
    pub fn with_spawn(mut self, spawn: SpawnTask) -> Self {
        self.spawn.push(spawn);
        self
    }

    /// Request an interrupt at this step's commit boundary
    pub fn with_interrupt(mut self, payload: Value) -> Self {
        self.interrupt = Some(InterruptRequest::new(payload));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_builder_preserves_emission_order() {
        let out = NodeOutput::new()
            .with_write("b", json!(1))
            .with_write("a", json!(2))
            .goto(["x", "y"]);
        assert_eq!(out.writes[0].channel, "b");
        assert_eq!(out.writes[1].channel, "a");
        assert_eq!(out.next, NextNodes::Nodes(vec!["x".into(), "y".into()]));
    }

    #[test]
    fn end_is_empty_goto() {
        assert_eq!(NodeOutput::new().end().next, NextNodes::Nodes(vec![]));
        assert_eq!(NodeOutput::new().next, NextNodes::UseGraphEdges);
    }

    #[test]
    fn spawn_overlay_accumulates() {
        let spawn = SpawnTask::new("child")
            .with_local("scratch", json!(1))
            .with_local("tag", json!("t"));
        assert_eq!(spawn.overlay.len(), 2);
        assert_eq!(spawn.node_id, "child");
    }
}
