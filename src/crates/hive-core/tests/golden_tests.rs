//! Golden canonical-encoding digests
//!
//! These digests pin the wire-stable framings. A change here is a breaking
//! change to checkpoint compatibility and task identity; do not update the
//! constants without a migration story.

use hive_core::canonical;
use hive_core::channel::{ChannelSpec, ValueType};
use hive_core::graph::GraphBuilder;
use hive_core::node::NodeOutput;
use hive_core::schema::Schema;
use serde_json::json;
use uuid::Uuid;

const EMPTY_FINGERPRINT: &str =
    "3b54d1bf22aea64fa72d74e8bca1e504ea5f40f832e6bbf952ba79015becff2f";
const SCHEMA_VERSION_FIXTURE: &str =
    "8d877803d8feb7c3190e936fed1d7916ef1d6b046b90713fc62d6157a5dcfd8c";
const GRAPH_VERSION_FIXTURE: &str =
    "c8fc2f909e699ca2a28d185a05c23699560a18d9b0eb452de8ed1a6158fcf1f3";
const CHECKPOINT_ID_FIXTURE: &str =
    "8e553c63dd136b0abe1c689ab1ed95e9fc6179d621d442707f247f77c1955db7";
const TASK_ID_FIXTURE: &str =
    "f2c1e4f20b0dcb461e432016e926b3047261d43ec60a3af5b142ec61171e4b30";
const INTERRUPT_ID_FIXTURE: &str =
    "95e08129ad449655eee7987005077892aa0c882318be52018ae21393a7264b18";

fn fixture_schema() -> Schema {
    Schema::new(vec![
        ChannelSpec::appending("messages"),
        ChannelSpec::last_value("route", ValueType::String, || json!("")),
    ])
}

#[test]
fn empty_local_fingerprint() {
    assert_eq!(hex::encode(canonical::local_fingerprint(&[])), EMPTY_FINGERPRINT);
}

#[test]
fn schema_version_digest() {
    assert_eq!(fixture_schema().version(), SCHEMA_VERSION_FIXTURE);
}

#[test]
fn graph_version_digest() {
    let graph = GraphBuilder::new(fixture_schema())
        .add_start("a")
        .add_node("a", |_ctx| Box::pin(async move { Ok(NodeOutput::new()) }))
        .add_node("b", |_ctx| Box::pin(async move { Ok(NodeOutput::new()) }))
        .add_edge("a", "b")
        .compile()
        .unwrap();
    assert_eq!(graph.graph_version(), GRAPH_VERSION_FIXTURE);
}

#[test]
fn id_digests() {
    assert_eq!(
        canonical::checkpoint_id(&Uuid::nil(), 3).unwrap(),
        CHECKPOINT_ID_FIXTURE
    );
    let task_id = canonical::task_id(&Uuid::nil(), 0, "alpha", 1, &[0u8; 32]).unwrap();
    assert_eq!(task_id, TASK_ID_FIXTURE);
    assert_eq!(canonical::interrupt_id(&task_id), INTERRUPT_ID_FIXTURE);
}

#[test]
fn version_digests_are_stable_across_declaration_order() {
    let reversed = Schema::new(vec![
        ChannelSpec::last_value("route", ValueType::String, || json!("")),
        ChannelSpec::appending("messages"),
    ]);
    assert_eq!(reversed.version(), SCHEMA_VERSION_FIXTURE);
}
