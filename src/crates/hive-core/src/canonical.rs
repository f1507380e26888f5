//! Canonical byte framings and hashing
//!
//! Every identifier and version digest the runtime produces is a SHA-256
//! over a fixed, length-prefixed byte framing. Two implementations that
//! follow these framings produce bit-identical ids, versions, fingerprints
//! and payload hashes; the framings are therefore wire-stable and pinned by
//! golden tests.
//!
//! | Framing | Magic | Hashed into |
//! |---|---|---|
//! | task-local fingerprint | `HLF1` | task ids, frontier dedupe keys |
//! | schema version         | `HSV1` | checkpoint compatibility |
//! | graph version          | `HGV1` | checkpoint compatibility |
//! | checkpoint id          | `HCP1` | checkpoint identity |
//! | interrupt id           | `HINT1`| interrupt identity |
//!
//! Lengths are UTF-8 byte counts framed as 4-byte big-endian (`be32`).
//! Strings are never delimiter-separated, so channel ids containing `+` or
//! `:` are safe everywhere they are length-prefixed.

use crate::error::{HiveError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Magic prefix of the task-local fingerprint framing
pub const FINGERPRINT_MAGIC: &[u8] = b"HLF1";
/// Magic prefix of the schema version framing
pub const SCHEMA_VERSION_MAGIC: &[u8] = b"HSV1";
/// Magic prefix of the graph version framing
pub const GRAPH_VERSION_MAGIC: &[u8] = b"HGV1";
/// Magic prefix of the checkpoint id framing
pub const CHECKPOINT_ID_MAGIC: &[u8] = b"HCP1";
/// Magic prefix of the interrupt id framing
pub const INTERRUPT_ID_MAGIC: &[u8] = b"HINT1";

/// SHA-256 over `bytes`, as a 32-byte array
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// SHA-256 over `bytes`, as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Append a 4-byte big-endian count
pub fn push_be32(buf: &mut Vec<u8>, n: u32) {
    buf.extend_from_slice(&n.to_be_bytes());
}

/// Append a length-prefixed UTF-8 string
pub fn push_str(buf: &mut Vec<u8>, s: &str) {
    push_be32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

/// Append a length-prefixed byte string
pub fn push_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    push_be32(buf, b.len() as u32);
    buf.extend_from_slice(b);
}

/// Narrow a step index to the canonical 32-bit framing
pub fn step_u32(step: u64) -> Result<u32> {
    u32::try_from(step).map_err(|_| HiveError::StepIndexOutOfRange { step })
}

/// Narrow a task ordinal to the canonical 32-bit framing
pub fn ordinal_u32(ordinal: usize) -> Result<u32> {
    u32::try_from(ordinal).map_err(|_| HiveError::TaskOrdinalOutOfRange { ordinal })
}

/// Deterministic task id
///
/// `hex(sha256(run_uuid_16 ‖ be32(step) ‖ 0x00 ‖ node_id ‖ 0x00 ‖
/// be32(ordinal) ‖ fingerprint_32))`. The node id is delimited, not
/// length-prefixed, which is why `+` and `:` are reserved in node ids.
pub fn task_id(
    run_id: &Uuid,
    step: u64,
    node_id: &str,
    ordinal: usize,
    fingerprint: &[u8; 32],
) -> Result<String> {
    let mut buf = Vec::with_capacity(16 + 4 + 1 + node_id.len() + 1 + 4 + 32);
    buf.extend_from_slice(run_id.as_bytes());
    push_be32(&mut buf, step_u32(step)?);
    buf.push(0x00);
    buf.extend_from_slice(node_id.as_bytes());
    buf.push(0x00);
    push_be32(&mut buf, ordinal_u32(ordinal)?);
    buf.extend_from_slice(fingerprint);
    Ok(sha256_hex(&buf))
}

/// Deterministic checkpoint id: `hex(sha256("HCP1" ‖ run_uuid_16 ‖ be32(step)))`
pub fn checkpoint_id(run_id: &Uuid, step: u64) -> Result<String> {
    let mut buf = Vec::with_capacity(4 + 16 + 4);
    buf.extend_from_slice(CHECKPOINT_ID_MAGIC);
    buf.extend_from_slice(run_id.as_bytes());
    push_be32(&mut buf, step_u32(step)?);
    Ok(sha256_hex(&buf))
}

/// Deterministic interrupt id: `hex(sha256("HINT1" ‖ winning_task_id))`
pub fn interrupt_id(winning_task_id: &str) -> String {
    let mut buf = Vec::with_capacity(5 + winning_task_id.len());
    buf.extend_from_slice(INTERRUPT_ID_MAGIC);
    buf.extend_from_slice(winning_task_id.as_bytes());
    sha256_hex(&buf)
}

/// Task-local fingerprint over pre-encoded entries
///
/// `entries` must already be sorted ascending by channel id and contain one
/// entry per task-local channel (the *effective* view, not just the overlay).
pub fn local_fingerprint(entries: &[(&str, Vec<u8>)]) -> [u8; 32] {
    let mut buf = Vec::new();
    buf.extend_from_slice(FINGERPRINT_MAGIC);
    push_be32(&mut buf, entries.len() as u32);
    for (id, encoded) in entries {
        push_str(&mut buf, id);
        push_bytes(&mut buf, encoded);
    }
    sha256(&buf)
}

/// Canonical JSON bytes: object keys sorted ascending, minimal escaping,
/// no slash escaping, compact separators
///
/// This is the codec-independent value encoding used for payload hashes on
/// channels without a codec.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_json_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(out, item);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(out, key);
                out.push(b':');
                write_canonical(out, &map[*key]);
            }
            out.push(b'}');
        }
    }
}

fn write_json_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0C}' => out.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                let mut esc = [0u8; 6];
                esc.copy_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
                out.extend_from_slice(&esc);
            }
            c => {
                let mut utf8 = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
    out.push(b'"');
}
