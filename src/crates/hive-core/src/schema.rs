//! Schema declaration and the per-attempt registry
//!
//! A [`Schema`] is the user-declared set of channels plus the mapping from a
//! run's input value to synthetic channel writes. The engine never consults
//! the schema directly during a step; it builds a [`SchemaRegistry`] once per
//! attempt, which validates the declaration, sorts the specs, caches every
//! channel's initial value (each `initial()` thunk runs at most once per
//! attempt, in ascending channel-id order) and answers lookups from then on.
//!
//! Validation split: duplicate ids and non-checkpointed task-local channels
//! are compile-time failures; the missing-codec check runs per attempt,
//! *after* the initial cache is built and before any step executes.

use crate::canonical;
use crate::channel::{ChannelScope, ChannelSpec, ChannelWrite};
use crate::error::{HiveError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Maps the caller's run input to synthetic global writes
pub type InputMapperFn =
    Arc<dyn Fn(&Value) -> std::result::Result<Vec<ChannelWrite>, String> + Send + Sync>;

/// User-declared channel set
#[derive(Clone)]
pub struct Schema {
    specs: Vec<ChannelSpec>,
    input_mapper: InputMapperFn,
}

impl Schema {
    /// Declare a schema over the given channel specs
    ///
    /// The default input mapper turns a JSON object into one write per key
    /// (ascending key order), maps `null` to no writes, and rejects any
    /// other shape.
    pub fn new(specs: Vec<ChannelSpec>) -> Self {
        Self {
            specs,
            input_mapper: Arc::new(default_input_mapper),
        }
    }

    /// Replace the input mapper
    pub fn with_input_mapper(mut self, mapper: InputMapperFn) -> Self {
        self.input_mapper = mapper;
        self
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    /// Compile-time channel validation
    ///
    /// Duplicate ids first (smallest duplicate wins), then non-checkpointed
    /// task-local channels (smallest offending id wins).
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates: Vec<&str> = Vec::new();
        for spec in &self.specs {
            if !seen.insert(spec.id()) {
                duplicates.push(spec.id());
            }
        }
        if let Some(channel) = duplicates.into_iter().min() {
            return Err(HiveError::DuplicateChannelId {
                channel: channel.to_string(),
            });
        }

        let mut offending: Vec<&str> = self
            .specs
            .iter()
            .filter(|s| s.scope() == ChannelScope::TaskLocal && !s.is_checkpointed())
            .map(|s| s.id())
            .collect();
        offending.sort_unstable();
        if let Some(channel) = offending.first() {
            return Err(HiveError::InvalidTaskLocalUntracked {
                channel: channel.to_string(),
            });
        }
        Ok(())
    }

    /// Canonical schema version: `hex(sha256("HSV1" framing))`
    ///
    /// Value-type identity is deliberately not part of the digest; only the
    /// id, scope, persistence, update policy and codec identity are.
    pub fn version(&self) -> String {
        let mut sorted: Vec<&ChannelSpec> = self.specs.iter().collect();
        sorted.sort_unstable_by(|a, b| a.id().cmp(b.id()));

        let mut buf = Vec::new();
        buf.extend_from_slice(canonical::SCHEMA_VERSION_MAGIC);
        buf.push(b'C');
        canonical::push_be32(&mut buf, sorted.len() as u32);
        for spec in sorted {
            canonical::push_str(&mut buf, spec.id());
            buf.push(spec.scope().canonical_byte());
            buf.push(spec.persistence().canonical_byte());
            buf.push(spec.update_policy().canonical_byte());
            canonical::push_str(&mut buf, spec.codec().map(|c| c.codec_id()).unwrap_or(""));
        }
        canonical::sha256_hex(&buf)
    }

    pub(crate) fn input_writes(&self, input: &Value) -> Result<Vec<ChannelWrite>> {
        (self.input_mapper)(input).map_err(|error| HiveError::InputMapping { error })
    }
}

fn default_input_mapper(input: &Value) -> std::result::Result<Vec<ChannelWrite>, String> {
    match input {
        Value::Null => Ok(vec![]),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            Ok(keys
                .into_iter()
                .map(|k| ChannelWrite::new(k.clone(), map[k].clone()))
                .collect())
        }
        other => Err(format!(
            "run input must be an object or null, got {}",
            crate::channel::ValueType::of(other)
        )),
    }
}

/// Validated per-attempt view of a schema
///
/// Owns the sorted spec list, the id lookup table and the initial-value
/// cache. Cheap to share (`Arc`) across the tasks of an attempt.
#[derive(Debug)]
pub struct SchemaRegistry {
    specs: Vec<ChannelSpec>,
    by_id: HashMap<String, usize>,
    initial_cache: BTreeMap<String, Value>,
}

impl SchemaRegistry {
    /// Validate the schema, build the initial cache, then run the
    /// missing-codec check
    pub fn build(schema: &Schema) -> Result<Self> {
        schema.validate()?;

        let mut specs: Vec<ChannelSpec> = schema.specs().to_vec();
        specs.sort_unstable_by(|a, b| a.id().cmp(b.id()));

        let by_id: HashMap<String, usize> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id().to_string(), i))
            .collect();

        // initial() runs at most once per channel, ascending id order
        let mut initial_cache = BTreeMap::new();
        for spec in &specs {
            initial_cache.insert(spec.id().to_string(), spec.initial());
        }

        // Missing-codec validation runs after the cache build.
        for spec in &specs {
            if spec.is_checkpointed() && spec.codec().is_none() {
                return Err(HiveError::MissingCodec {
                    channel: spec.id().to_string(),
                });
            }
        }

        Ok(Self {
            specs,
            by_id,
            initial_cache,
        })
    }

    /// Specs sorted ascending by channel id
    pub fn sorted_specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    pub fn spec(&self, id: &str) -> Option<&ChannelSpec> {
        self.by_id.get(id).map(|&i| &self.specs[i])
    }

    /// Spec lookup that fails with `UnknownChannelId`
    pub fn require(&self, id: &str) -> Result<&ChannelSpec> {
        self.spec(id).ok_or_else(|| HiveError::UnknownChannelId {
            channel: id.to_string(),
        })
    }

    /// Cached initial value for a channel
    pub fn initial(&self, id: &str) -> Option<&Value> {
        self.initial_cache.get(id)
    }

    /// Fresh global snapshot: every global channel at its initial value
    pub fn initial_global_state(&self) -> BTreeMap<String, Value> {
        self.specs
            .iter()
            .filter(|s| s.scope() == ChannelScope::Global)
            .map(|s| (s.id().to_string(), self.initial_cache[s.id()].clone()))
            .collect()
    }

    /// Task-local specs, ascending id order
    pub fn task_local_specs(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.specs
            .iter()
            .filter(|s| s.scope() == ChannelScope::TaskLocal)
    }

    /// Fingerprint of a task's effective local view
    ///
    /// Covers *every* task-local channel (overlay value if present, else the
    /// cached initial), sorted ascending, encoded through the channel codec.
    pub fn local_fingerprint(&self, overlay: &BTreeMap<String, Value>) -> Result<[u8; 32]> {
        let mut entries: Vec<(&str, Vec<u8>)> = Vec::new();
        for spec in self.task_local_specs() {
            let effective = overlay
                .get(spec.id())
                .or_else(|| self.initial_cache.get(spec.id()))
                .ok_or_else(|| HiveError::MissingTaskLocalValue {
                    channel: spec.id().to_string(),
                })?;
            // Task-local channels are checkpointed, so a codec is guaranteed
            // by registry validation.
            let codec = spec.codec().ok_or_else(|| HiveError::MissingCodec {
                channel: spec.id().to_string(),
            })?;
            let encoded = codec.encode(effective).map_err(|error| {
                HiveError::TaskLocalFingerprintEncodeFailed {
                    channel: spec.id().to_string(),
                    error,
                }
            })?;
            entries.push((spec.id(), encoded));
        }
        Ok(canonical::local_fingerprint(&entries))
    }
}
