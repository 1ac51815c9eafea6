//! Content hashing helpers.
//!
//! Every identity in Assay (evidence ids, ledger links, node hashes, manifest
//! integrity) is a lowercase hex SHA-256 over a canonical byte form. JSON
//! values are canonicalized with object keys sorted lexicographically at every
//! depth and no insignificant whitespace, so the digest never depends on map
//! insertion order or on serde_json feature flags.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sentinel used as `previous_hash` for the first ledger record.
pub const GENESIS: &str = "GENESIS";

/// SHA-256 of raw bytes as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over several parts, each length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` never collide.
pub fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash a JSON value through its canonical form.
pub fn hash_json(value: &Value) -> String {
    hash_bytes(canonical_json(value).as_bytes())
}

/// Hash any serializable value through its canonical JSON form.
pub fn hash_serializable<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(hash_json(&value))
}

/// Merkle root over already-ordered leaf digests.
///
/// Odd nodes are promoted unchanged to the next level. An empty leaf set
/// yields the hash of [`GENESIS`].
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return hash_bytes(GENESIS.as_bytes());
    }

    let mut level: Vec<String> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next.push(hash_parts(&[left, right])),
                [single] => next.push(single.clone()),
                _ => {}
            }
        }
        level = next;
    }
    level.swap_remove(0)
}
