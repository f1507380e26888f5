//! Typed state channels
//!
//! A channel is a named state slot with a declared value type, a scope
//! (global or task-local), a persistence class, an update policy, a binary
//! reducer, an initial-value thunk and an optional canonical-bytes codec.
//! Channels are declared once in a [`Schema`](crate::schema::Schema) and are
//! the only state nodes can read or write.
//!
//! The runtime is type-erased over channel values: everything is a
//! `serde_json::Value` tagged with a closed [`ValueType`]. Writes are checked
//! against the declared type at commit time; a mismatch surfaces as
//! [`ChannelTypeMismatch`](crate::error::HiveError::ChannelTypeMismatch)
//! rather than corrupting state.
//!
//! # Example
//!
//! ```rust
//! use hive_core::channel::{ChannelSpec, ValueType};
//! use serde_json::json;
//!
//! // An append-only log of numbers, merged with ordered concatenation.
//! let spec = ChannelSpec::appending("values");
//! assert_eq!(spec.id(), "values");
//! assert_eq!(spec.value_type(), ValueType::Array);
//!
//! // A single-writer routing flag.
//! let spec = ChannelSpec::last_value("route", ValueType::String, || json!(""));
//! ```

use crate::canonical;
use crate::reducers;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Where a channel's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScope {
    /// One value per thread, shared by all tasks
    Global,
    /// One value per task, shadowing the initial value
    TaskLocal,
}

impl ChannelScope {
    /// Canonical byte used by the schema-version framing
    pub fn canonical_byte(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::TaskLocal => 1,
        }
    }
}

/// How a channel's value relates to checkpoints and step boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Saved in every checkpoint; requires a codec
    Checkpointed,
    /// Lives in memory for the run but is never persisted
    Untracked,
    /// Reset to the initial value after every commit
    Ephemeral,
}

impl Persistence {
    /// Canonical byte used by the schema-version framing
    pub fn canonical_byte(self) -> u8 {
        match self {
            Self::Checkpointed => 0,
            Self::Untracked => 1,
            Self::Ephemeral => 2,
        }
    }
}

/// How many writes a channel accepts per step (global) or per task (local)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// At most one write; more is a policy violation
    Single,
    /// Any number of writes, reduced sequentially
    Multi,
}

impl UpdatePolicy {
    /// Canonical byte used by the schema-version framing
    pub fn canonical_byte(self) -> u8 {
        match self {
            Self::Single => 0,
            Self::Multi => 1,
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// Closed tag set identifying a channel's value type
///
/// JSON integers and floats share the `Number` tag so `1` and `1.0` reduce
/// into the same channel. `Any` accepts every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Any,
}

impl ValueType {
    /// Tag of a concrete value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Does `value` satisfy this declared type?
    ///
    /// `Null` is accepted by every declared type: channels use `null` as
    /// their "absent" state regardless of what they otherwise hold.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(self, Self::Any) || value.is_null() || Self::of(value) == self
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        write!(f, "{}", name)
    }
}

/// Canonical-bytes encoder/decoder for one channel's values
///
/// Codec output is the wire representation persisted in checkpoints and
/// hashed into fingerprints and payload hashes, so `encode` must be
/// deterministic: equal values produce equal bytes.
pub trait ChannelCodec: Send + Sync {
    /// Stable codec identity, hashed into the schema version
    fn codec_id(&self) -> &str;

    /// Encode a value to canonical bytes
    fn encode(&self, value: &Value) -> Result<Vec<u8>, String>;

    /// Decode canonical bytes back to a value
    fn decode(&self, bytes: &[u8]) -> Result<Value, String>;
}

/// Canonical-JSON codec (sorted keys, minimal escaping)
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelCodec for JsonCodec {
    fn codec_id(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, String> {
        Ok(canonical::canonical_json_bytes(value))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// Binary reducer: `(current, update) -> next`, failures as strings
pub type ReducerFn = Arc<dyn Fn(Value, Value) -> Result<Value, String> + Send + Sync>;

/// Thunk producing a channel's initial value
pub type InitialFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// One write emitted by a node: channel id plus value
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWrite {
    pub channel: String,
    pub value: Value,
}

impl ChannelWrite {
    pub fn new(channel: impl Into<String>, value: Value) -> Self {
        Self {
            channel: channel.into(),
            value,
        }
    }
}

/// Declaration of one named state channel
#[derive(Clone)]
pub struct ChannelSpec {
    id: String,
    value_type: ValueType,
    scope: ChannelScope,
    persistence: Persistence,
    update_policy: UpdatePolicy,
    reducer: ReducerFn,
    initial: InitialFn,
    codec: Option<Arc<dyn ChannelCodec>>,
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("id", &self.id)
            .field("value_type", &self.value_type)
            .field("scope", &self.scope)
            .field("persistence", &self.persistence)
            .field("update_policy", &self.update_policy)
            .field("codec", &self.codec.as_ref().map(|c| c.codec_id().to_string()))
            .finish()
    }
}

impl ChannelSpec {
    /// Fully explicit constructor
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        value_type: ValueType,
        scope: ChannelScope,
        persistence: Persistence,
        update_policy: UpdatePolicy,
        reducer: ReducerFn,
        initial: InitialFn,
        codec: Option<Arc<dyn ChannelCodec>>,
    ) -> Self {
        Self {
            id: id.into(),
            value_type,
            scope,
            persistence,
            update_policy,
            reducer,
            initial,
            codec,
        }
    }

    /// Global, checkpointed, single-writer channel with a last-write reducer
    pub fn last_value(
        id: impl Into<String>,
        value_type: ValueType,
        initial: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            id,
            value_type,
            ChannelScope::Global,
            Persistence::Checkpointed,
            UpdatePolicy::Single,
            reducers::last_value(),
            Arc::new(initial),
            Some(Arc::new(JsonCodec::new())),
        )
    }

    /// Global, checkpointed, multi-writer array channel merged by
    /// ordered concatenation, starting empty
    pub fn appending(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ValueType::Array,
            ChannelScope::Global,
            Persistence::Checkpointed,
            UpdatePolicy::Multi,
            reducers::append(),
            Arc::new(|| Value::Array(vec![])),
            Some(Arc::new(JsonCodec::new())),
        )
    }

    /// Global, checkpointed, multi-writer array channel merged as a set
    pub fn set_union(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ValueType::Array,
            ChannelScope::Global,
            Persistence::Checkpointed,
            UpdatePolicy::Multi,
            reducers::set_union(),
            Arc::new(|| Value::Array(vec![])),
            Some(Arc::new(JsonCodec::new())),
        )
    }

    /// Global, checkpointed, multi-writer object channel merged key-wise
    pub fn merging(id: impl Into<String>, per_value: ReducerFn) -> Self {
        Self::new(
            id,
            ValueType::Object,
            ChannelScope::Global,
            Persistence::Checkpointed,
            UpdatePolicy::Multi,
            reducers::merge_map(per_value),
            Arc::new(|| Value::Object(Default::default())),
            Some(Arc::new(JsonCodec::new())),
        )
    }

    /// Switch the channel to task-local scope
    pub fn task_local(mut self) -> Self {
        self.scope = ChannelScope::TaskLocal;
        self
    }

    /// Switch the persistence class
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Replace the codec (or remove it with `None`)
    pub fn with_codec(mut self, codec: Option<Arc<dyn ChannelCodec>>) -> Self {
        self.codec = codec;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn scope(&self) -> ChannelScope {
        self.scope
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    pub fn reducer(&self) -> &ReducerFn {
        &self.reducer
    }

    pub fn initial(&self) -> Value {
        (self.initial)()
    }

    pub fn codec(&self) -> Option<&Arc<dyn ChannelCodec>> {
        self.codec.as_ref()
    }

    /// Is this channel persisted into checkpoints?
    pub fn is_checkpointed(&self) -> bool {
        self.persistence == Persistence::Checkpointed
    }

    /// Canonical value bytes for payload hashing: codec output when a codec
    /// exists and succeeds, else canonical JSON
    pub fn payload_bytes(&self, value: &Value) -> Vec<u8> {
        match &self.codec {
            Some(codec) => match codec.encode(value) {
                Ok(bytes) => bytes,
                Err(_) => canonical::canonical_json_bytes(value),
            },
            None => canonical::canonical_json_bytes(value),
        }
    }

    /// Payload hash emitted with `writeApplied`
    pub fn payload_hash(&self, value: &Value) -> String {
        canonical::sha256_hex(&self.payload_bytes(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_type_tags() {
        assert_eq!(ValueType::of(&json!(1)), ValueType::Number);
        assert_eq!(ValueType::of(&json!(1.5)), ValueType::Number);
        assert_eq!(ValueType::of(&json!([1])), ValueType::Array);
        assert!(ValueType::Any.accepts(&json!({"k": 1})));
        assert!(ValueType::Array.accepts(&Value::Null));
        assert!(!ValueType::Array.accepts(&json!("nope")));
    }

    #[test]
    fn json_codec_roundtrip() {
        let codec = JsonCodec::new();
        let value = json!({"b": [1, 2], "a": "x"});
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(bytes, br#"{"a":"x","b":[1,2]}"#.to_vec());
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn payload_hash_prefers_codec_bytes() {
        let spec = ChannelSpec::appending("xs");
        let hash = spec.payload_hash(&json!([1, 2]));
        assert_eq!(hash, crate::canonical::sha256_hex(b"[1,2]"));
    }

    #[test]
    fn canonical_bytes_cover_all_persistence_classes() {
        assert_eq!(Persistence::Checkpointed.canonical_byte(), 0);
        assert_eq!(Persistence::Untracked.canonical_byte(), 1);
        assert_eq!(Persistence::Ephemeral.canonical_byte(), 2);
    }
}
