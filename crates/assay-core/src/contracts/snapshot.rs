//! Frozen input digests and refusal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::digest::{hash_bytes, hash_json};
use crate::error::ValidationError;

/// SHA-256 digests of every external input, recorded at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    digests: BTreeMap<String, String>,
    frozen_at: DateTime<Utc>,
}

impl InputSnapshot {
    /// Freeze the digests of named inputs.
    pub fn freeze<'a>(inputs: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let digests = inputs
            .into_iter()
            .map(|(name, bytes)| (name.to_string(), hash_bytes(bytes)))
            .collect();
        Self {
            digests,
            frozen_at: Utc::now(),
        }
    }

    pub fn digest_of(&self, input: &str) -> Option<&str> {
        self.digests.get(input).map(String::as_str)
    }

    pub fn digests(&self) -> &BTreeMap<String, String> {
        &self.digests
    }

    pub fn frozen_at(&self) -> DateTime<Utc> {
        self.frozen_at
    }

    /// Digest of the snapshot itself, independent of when it was taken.
    pub fn snapshot_digest(&self) -> String {
        hash_json(&serde_json::json!(self.digests))
    }

    /// Refuse if any pinned digest differs from the frozen one.
    pub fn verify_pinned(&self, pins: &BTreeMap<String, String>) -> Result<(), ValidationError> {
        for (input, expected) in pins {
            let actual = self.digest_of(input).unwrap_or("<absent>");
            if !actual.eq_ignore_ascii_case(expected) {
                warn!(input = %input, expected = %expected, actual = %actual, "pinned input refused");
                return Err(ValidationError::SnapshotMismatch {
                    input: input.clone(),
                    expected: expected.clone(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Refuse if an input's current bytes no longer match the frozen digest.
    pub fn verify_input(&self, input: &str, bytes: &[u8]) -> Result<(), ValidationError> {
        let actual = hash_bytes(bytes);
        match self.digest_of(input) {
            Some(expected) if expected == actual => Ok(()),
            Some(expected) => Err(ValidationError::SnapshotMismatch {
                input: input.to_string(),
                expected: expected.to_string(),
                actual,
            }),
            None => Err(ValidationError::SnapshotMismatch {
                input: input.to_string(),
                expected: "<not frozen>".to_string(),
                actual,
            }),
        }
    }
}
