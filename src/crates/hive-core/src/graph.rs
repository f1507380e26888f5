//! Graph construction and compilation
//!
//! [`GraphBuilder`] collects the schema, nodes, static edges, join edges,
//! routers and the output projection; [`GraphBuilder::compile`] validates
//! the whole structure and produces an immutable [`CompiledGraph`] plus the
//! two canonical version digests checkpoints are stamped with.
//!
//! # Validation order
//!
//! First failure wins, in this order:
//!
//! 1. Schema/channel validation (duplicate ids, task-local persistence)
//! 2. Structural: duplicate node ids; reserved `+`/`:` in node ids;
//!    empty/duplicate/unknown start; unknown edge endpoints; duplicate
//!    router; unknown router source; join parents empty/duplicated/
//!    containing the target; unknown join parent/target; duplicate
//!    canonical join id
//! 3. Output projection: unknown channel; task-local channel
//!
//! Scanned lists (nodes, edges, joins, the start list) report the first
//! violation in scan order; set-valued checks report the lexicographically
//! smallest offending id.
//!
//! # Example
//!
//! ```rust
//! use hive_core::channel::ChannelSpec;
//! use hive_core::graph::GraphBuilder;
//! use hive_core::node::NodeOutput;
//! use hive_core::schema::Schema;
//! use serde_json::json;
//!
//! let schema = Schema::new(vec![ChannelSpec::appending("log")]);
//! let graph = GraphBuilder::new(schema)
//!     .add_start("a")
//!     .add_node("a", |_ctx| {
//!         Box::pin(async move { Ok(NodeOutput::new().with_write("log", json!(["ran"]))) })
//!     })
//!     .add_node("b", |_ctx| Box::pin(async move { Ok(NodeOutput::new()) }))
//!     .add_edge("a", "b")
//!     .compile()
//!     .unwrap();
//! assert_eq!(graph.static_edges("a"), vec!["b"]);
//! ```

use crate::canonical;
use crate::channel::ChannelScope;
use crate::error::{HiveError, Result};
use crate::node::{FnNode, Node, NodeContext, NodeFuture, RouterFn};
use crate::retry::RetryPolicy;
use crate::schema::Schema;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Characters reserved for canonical join-barrier ids
const RESERVED_NODE_CHARS: [char; 2] = ['+', ':'];

/// Canonical join id: `join:p1+p2+...:target`, parents sorted
pub fn canonical_join_id(parents: &[String], target: &str) -> String {
    let mut sorted: Vec<&str> = parents.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("join:{}:{}", sorted.join("+"), target)
}

/// A many-to-one barrier edge
#[derive(Clone)]
pub struct JoinEdge {
    /// Parent nodes, in declaration order
    pub parents: Vec<String>,
    /// Target scheduled when all parents have run
    pub target: String,
}

/// A compiled join: declaration plus its canonical id and sorted parents
#[derive(Clone)]
pub struct CompiledJoin {
    pub id: String,
    pub parents: Vec<String>,
    pub parents_sorted: Vec<String>,
    pub target: String,
}

/// A node with its retry policy
#[derive(Clone)]
pub struct CompiledNode {
    pub node: Arc<dyn Node>,
    pub retry: RetryPolicy,
}

/// Builder for a Hive graph
pub struct GraphBuilder {
    schema: Schema,
    start: Vec<String>,
    nodes: Vec<(String, Arc<dyn Node>, RetryPolicy)>,
    edges: Vec<(String, String)>,
    joins: Vec<JoinEdge>,
    routers: Vec<(String, RouterFn)>,
    projection: Option<Vec<String>>,
}

impl GraphBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            start: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            joins: Vec::new(),
            routers: Vec::new(),
            projection: None,
        }
    }

    /// Append a node to the start list (order preserved)
    pub fn add_start(mut self, node: impl Into<String>) -> Self {
        self.start.push(node.into());
        self
    }

    /// Add a closure node with no retries
    pub fn add_node<F>(self, id: impl Into<String>, node: F) -> Self
    where
        F: Fn(NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.add_node_arc(id, Arc::new(FnNode(node)))
    }

    /// Add a closure node with a retry policy
    pub fn add_node_with_retry<F>(
        mut self,
        id: impl Into<String>,
        retry: RetryPolicy,
        node: F,
    ) -> Self
    where
        F: Fn(NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.nodes.push((id.into(), Arc::new(FnNode(node)), retry));
        self
    }

    /// Add a trait-object node with no retries
    pub fn add_node_arc(mut self, id: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.push((id.into(), node, RetryPolicy::none()));
        self
    }

    /// Add a static edge (insertion order is routing order)
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Add a join barrier
    pub fn add_join<I, S>(mut self, parents: I, target: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.joins.push(JoinEdge {
            parents: parents.into_iter().map(Into::into).collect(),
            target: target.into(),
        });
        self
    }

    /// Attach a router to a node (at most one per node)
    pub fn add_router<F>(mut self, node: impl Into<String>, router: F) -> Self
    where
        F: Fn(&crate::store::StateView) -> std::result::Result<crate::node::RouterResult, String>
            + Send
            + Sync
            + 'static,
    {
        self.routers.push((node.into(), Arc::new(router)));
        self
    }

    /// Project the run output onto these channels (default: full store)
    pub fn with_output_projection<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Validate and freeze the graph
    pub fn compile(self) -> Result<CompiledGraph> {
        // 1. schema/channel validation
        self.schema.validate()?;

        // 2. structural validation, scan order per pass
        let mut node_set: HashSet<&str> = HashSet::new();
        for (id, _, _) in &self.nodes {
            if !node_set.insert(id.as_str()) {
                return Err(HiveError::DuplicateNodeId { node: id.clone() });
            }
        }
        for (id, _, _) in &self.nodes {
            if id.contains(RESERVED_NODE_CHARS) {
                return Err(HiveError::ReservedNodeId { node: id.clone() });
            }
        }

        if self.start.is_empty() {
            return Err(HiveError::EmptyStartList);
        }
        let mut start_seen: HashSet<&str> = HashSet::new();
        for id in &self.start {
            if !start_seen.insert(id.as_str()) {
                return Err(HiveError::DuplicateStartNode { node: id.clone() });
            }
        }
        for id in &self.start {
            if !node_set.contains(id.as_str()) {
                return Err(HiveError::UnknownStartNode { node: id.clone() });
            }
        }

        for (from, to) in &self.edges {
            if !node_set.contains(from.as_str()) {
                return Err(HiveError::UnknownEdgeNode { node: from.clone() });
            }
            if !node_set.contains(to.as_str()) {
                return Err(HiveError::UnknownEdgeNode { node: to.clone() });
            }
        }

        let mut router_seen: HashSet<&str> = HashSet::new();
        for (node, _) in &self.routers {
            if !router_seen.insert(node.as_str()) {
                return Err(HiveError::DuplicateRouter { node: node.clone() });
            }
        }
        for (node, _) in &self.routers {
            if !node_set.contains(node.as_str()) {
                return Err(HiveError::UnknownRouterNode { node: node.clone() });
            }
        }

        for join in &self.joins {
            if join.parents.is_empty() {
                return Err(HiveError::EmptyJoinParents {
                    target: join.target.clone(),
                });
            }
            let mut parent_seen: HashSet<&str> = HashSet::new();
            for parent in &join.parents {
                if !parent_seen.insert(parent.as_str()) {
                    return Err(HiveError::DuplicateJoinParent {
                        target: join.target.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            if join.parents.contains(&join.target) {
                return Err(HiveError::JoinTargetInParents {
                    target: join.target.clone(),
                });
            }
        }
        for join in &self.joins {
            for parent in &join.parents {
                if !node_set.contains(parent.as_str()) {
                    return Err(HiveError::UnknownJoinNode {
                        node: parent.clone(),
                    });
                }
            }
            if !node_set.contains(join.target.as_str()) {
                return Err(HiveError::UnknownJoinNode {
                    node: join.target.clone(),
                });
            }
        }
        let mut join_ids: HashSet<String> = HashSet::new();
        let compiled_joins: Vec<CompiledJoin> = self
            .joins
            .iter()
            .map(|join| {
                let mut parents_sorted = join.parents.clone();
                parents_sorted.sort_unstable();
                CompiledJoin {
                    id: canonical_join_id(&join.parents, &join.target),
                    parents: join.parents.clone(),
                    parents_sorted,
                    target: join.target.clone(),
                }
            })
            .collect();
        for join in &compiled_joins {
            if !join_ids.insert(join.id.clone()) {
                return Err(HiveError::DuplicateJoinId {
                    join_id: join.id.clone(),
                });
            }
        }

        // 3. output projection
        if let Some(channels) = &self.projection {
            for id in channels {
                let spec = self
                    .schema
                    .specs()
                    .iter()
                    .find(|s| s.id() == id)
                    .ok_or_else(|| HiveError::UnknownProjectionChannel {
                        channel: id.clone(),
                    })?;
                if spec.scope() == ChannelScope::TaskLocal {
                    return Err(HiveError::TaskLocalInProjection {
                        channel: id.clone(),
                    });
                }
            }
        }
        // normalized projection: unique + sorted
        let projection = self.projection.map(|channels| {
            let mut unique: Vec<String> = channels;
            unique.sort_unstable();
            unique.dedup();
            unique
        });

        let mut edges_from: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in &self.edges {
            edges_from
                .entry(from.clone())
                .or_default()
                .push(to.clone());
        }

        let nodes: HashMap<String, CompiledNode> = self
            .nodes
            .into_iter()
            .map(|(id, node, retry)| (id, CompiledNode { node, retry }))
            .collect();
        let routers: HashMap<String, RouterFn> = self.routers.into_iter().collect();

        let schema_version = self.schema.version();
        let graph_version = graph_version(
            &self.start,
            &nodes,
            &routers,
            &self.edges,
            &compiled_joins,
            projection.as_deref(),
        );

        Ok(CompiledGraph {
            schema: self.schema,
            start: self.start,
            nodes,
            edges: self.edges,
            edges_from,
            routers,
            joins: compiled_joins,
            projection,
            schema_version,
            graph_version,
        })
    }
}

/// Canonical graph version: `hex(sha256("HGV1" framing))`
fn graph_version(
    start: &[String],
    nodes: &HashMap<String, CompiledNode>,
    routers: &HashMap<String, RouterFn>,
    edges: &[(String, String)],
    joins: &[CompiledJoin],
    projection: Option<&[String]>,
) -> String {
    let mut buf = Vec::new();
    buf.extend_from_slice(canonical::GRAPH_VERSION_MAGIC);

    buf.push(b'S');
    canonical::push_be32(&mut buf, start.len() as u32);
    for id in start {
        canonical::push_str(&mut buf, id);
    }

    let mut node_ids: Vec<&str> = nodes.keys().map(String::as_str).collect();
    node_ids.sort_unstable();
    buf.push(b'N');
    canonical::push_be32(&mut buf, node_ids.len() as u32);
    for id in node_ids {
        canonical::push_str(&mut buf, id);
    }

    let mut router_ids: Vec<&str> = routers.keys().map(String::as_str).collect();
    router_ids.sort_unstable();
    buf.push(b'R');
    canonical::push_be32(&mut buf, router_ids.len() as u32);
    for id in router_ids {
        canonical::push_str(&mut buf, id);
    }

    buf.push(b'E');
    canonical::push_be32(&mut buf, edges.len() as u32);
    for (from, to) in edges {
        canonical::push_str(&mut buf, from);
        canonical::push_str(&mut buf, to);
    }

    buf.push(b'J');
    canonical::push_be32(&mut buf, joins.len() as u32);
    for join in joins {
        canonical::push_str(&mut buf, &join.target);
        canonical::push_be32(&mut buf, join.parents_sorted.len() as u32);
        for parent in &join.parents_sorted {
            canonical::push_str(&mut buf, parent);
        }
    }

    buf.push(b'O');
    match projection {
        None => buf.push(0),
        Some(channels) => {
            buf.push(1);
            canonical::push_be32(&mut buf, channels.len() as u32);
            for id in channels {
                canonical::push_str(&mut buf, id);
            }
        }
    }

    canonical::sha256_hex(&buf)
}

/// Immutable validated graph, ready to run
pub struct CompiledGraph {
    schema: Schema,
    start: Vec<String>,
    nodes: HashMap<String, CompiledNode>,
    edges: Vec<(String, String)>,
    edges_from: HashMap<String, Vec<String>>,
    routers: HashMap<String, RouterFn>,
    joins: Vec<CompiledJoin>,
    projection: Option<Vec<String>>,
    schema_version: String,
    graph_version: String,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("start", &self.start)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("joins", &self.joins.iter().map(|j| &j.id).collect::<Vec<_>>())
            .field("schema_version", &self.schema_version)
            .field("graph_version", &self.graph_version)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn start(&self) -> &[String] {
        &self.start
    }

    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Static-edge targets of a node, in builder-insertion order
    pub fn static_edges(&self, from: &str) -> Vec<&str> {
        self.edges_from
            .get(from)
            .map(|targets| targets.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn router(&self, node: &str) -> Option<&RouterFn> {
        self.routers.get(node)
    }

    /// Join edges in builder-insertion order
    pub fn joins(&self) -> &[CompiledJoin] {
        &self.joins
    }

    /// Normalized output projection (unique + sorted), `None` = full store
    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn graph_version(&self) -> &str {
        &self.graph_version
    }

    /// Pre-attempt retry validation: smallest offending node id wins
    pub fn validate_retry_policies(&self) -> Result<()> {
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort_unstable();
        for id in ids {
            if let Err(reason) = self.nodes[id].retry.validate() {
                return Err(HiveError::InvalidRetryPolicy {
                    node: id.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelSpec, ValueType};
    use crate::node::NodeOutput;
    use serde_json::json;

    fn noop() -> impl Fn(NodeContext) -> NodeFuture + Send + Sync {
        |_ctx| Box::pin(async move { Ok(NodeOutput::new()) })
    }

    fn schema() -> Schema {
        Schema::new(vec![
            ChannelSpec::appending("messages"),
            ChannelSpec::last_value("route", ValueType::String, || json!("")),
        ])
    }

    #[test]
    fn graph_version_is_golden() {
        let graph = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_node("b", noop())
            .add_edge("a", "b")
            .compile()
            .unwrap();
        // Pinned digest for the a->b fixture.
        assert_eq!(
            graph.graph_version(),
            "c8fc2f909e699ca2a28d185a05c23699560a18d9b0eb452de8ed1a6158fcf1f3"
        );
    }

    #[test]
    fn duplicate_node_reports_first_in_scan_order() {
        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_node("b", noop())
            .add_node("b", noop())
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::DuplicateNodeId { node } if node == "b"));
    }

    #[test]
    fn reserved_characters_rejected_after_duplicates() {
        let err = GraphBuilder::new(schema())
            .add_start("ok")
            .add_node("ok", noop())
            .add_node("bad:id", noop())
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::ReservedNodeId { node } if node == "bad:id"));
    }

    #[test]
    fn start_list_checks() {
        let err = GraphBuilder::new(schema()).compile().unwrap_err();
        assert!(matches!(err, HiveError::EmptyStartList));

        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_start("a")
            .add_node("a", noop())
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::DuplicateStartNode { .. }));

        let err = GraphBuilder::new(schema())
            .add_start("ghost")
            .add_node("a", noop())
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::UnknownStartNode { node } if node == "ghost"));
    }

    #[test]
    fn unknown_edge_endpoint_reports_scan_order() {
        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_edge("a", "missing")
            .add_edge("other", "a")
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::UnknownEdgeNode { node } if node == "missing"));
    }

    #[test]
    fn router_checks() {
        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_router("a", |_| Ok(crate::node::RouterResult::UseGraphEdges))
            .add_router("a", |_| Ok(crate::node::RouterResult::UseGraphEdges))
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::DuplicateRouter { .. }));
    }

    #[test]
    fn join_checks_in_order() {
        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_join(Vec::<String>::new(), "a")
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::EmptyJoinParents { .. }));

        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_node("b", noop())
            .add_join(["b", "b"], "a")
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::DuplicateJoinParent { .. }));

        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_node("b", noop())
            .add_join(["a", "b"], "a")
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::JoinTargetInParents { .. }));

        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_node("b", noop())
            .add_node("c", noop())
            .add_join(["a", "b"], "c")
            .add_join(["b", "a"], "c")
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::DuplicateJoinId { .. }));
    }

    #[test]
    fn canonical_join_id_sorts_parents() {
        assert_eq!(
            canonical_join_id(&["b".to_string(), "a".to_string()], "t"),
            "join:a+b:t"
        );
    }

    #[test]
    fn projection_is_validated_then_normalized() {
        let err = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .with_output_projection(["ghost"])
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::UnknownProjectionChannel { .. }));

        let graph = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .with_output_projection(["route", "messages", "route"])
            .compile()
            .unwrap();
        assert_eq!(
            graph.projection().unwrap(),
            &["messages".to_string(), "route".to_string()]
        );
    }

    #[test]
    fn task_local_channels_are_not_projectable() {
        let schema = Schema::new(vec![
            ChannelSpec::appending("messages"),
            ChannelSpec::last_value("scratch", ValueType::Any, || json!(null)).task_local(),
        ]);
        let err = GraphBuilder::new(schema)
            .add_start("a")
            .add_node("a", noop())
            .with_output_projection(["scratch"])
            .compile()
            .unwrap_err();
        assert!(matches!(err, HiveError::TaskLocalInProjection { .. }));
    }

    #[test]
    fn static_edges_preserve_insertion_order() {
        let graph = GraphBuilder::new(schema())
            .add_start("a")
            .add_node("a", noop())
            .add_node("z", noop())
            .add_node("m", noop())
            .add_edge("a", "z")
            .add_edge("a", "m")
            .compile()
            .unwrap();
        assert_eq!(graph.static_edges("a"), vec!["z", "m"]);
    }

    #[test]
    fn retry_validation_reports_smallest_node() {
        let graph = GraphBuilder::new(schema())
            .add_start("a")
            .add_node_with_retry("z", RetryPolicy::exponential_backoff(1, 0.0, 2, 10), noop())
            .add_node_with_retry("a", RetryPolicy::exponential_backoff(1, 0.0, 2, 10), noop())
            .compile()
            .unwrap();
        let err = graph.validate_retry_policies().unwrap_err();
        assert!(matches!(err, HiveError::InvalidRetryPolicy { node, .. } if node == "a"));
    }
}
