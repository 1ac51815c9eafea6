//! Evidence records.
//!
//! Evidence is the content-addressed outcome of executing one task. A
//! candidate becomes Evidence only when the ledger commits it and fills in
//! `previous_hash`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::digest::{hash_json, hash_parts};
use crate::error::IntegrityError;

/// Evidence before it is committed to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceCandidate {
    pub task_id: String,
    pub source_method: String,
    pub parent_evidence_ids: BTreeSet<String>,
    pub document_id: String,
    pub execution_time_ms: u64,
    pub payload: Value,
    pub metadata: BTreeMap<String, Value>,
}

impl EvidenceCandidate {
    /// Digest of the canonicalized payload.
    pub fn content_hash(&self) -> String {
        hash_json(&self.payload)
    }

    /// Evidence id this candidate will receive.
    pub fn evidence_id(&self) -> String {
        evidence_id_for(&self.task_id, &self.content_hash())
    }

    pub fn is_degraded(&self) -> bool {
        payload_is_degraded(&self.payload)
    }
}

/// Evidence id from task id and content hash.
///
/// Identical task content always maps to the same id.
pub fn evidence_id_for(task_id: &str, content_hash: &str) -> String {
    let digest = hash_parts(&["evidence", task_id, content_hash]);
    format!("EV-{}", &digest[..24])
}

fn payload_is_degraded(payload: &Value) -> bool {
    payload
        .get("degraded")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// A committed, immutable evidence record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub evidence_id: String,
    pub task_id: String,
    pub source_method: String,
    pub parent_evidence_ids: BTreeSet<String>,
    pub content_hash: String,
    pub previous_hash: String,
    pub document_id: String,
    pub execution_time_ms: u64,
    pub payload: Value,
    pub metadata: BTreeMap<String, Value>,
}

impl Evidence {
    /// Seal a candidate onto a chain tail.
    pub fn commit(candidate: EvidenceCandidate, previous_hash: impl Into<String>) -> Self {
        let content_hash = candidate.content_hash();
        Self {
            evidence_id: evidence_id_for(&candidate.task_id, &content_hash),
            task_id: candidate.task_id,
            source_method: candidate.source_method,
            parent_evidence_ids: candidate.parent_evidence_ids,
            content_hash,
            previous_hash: previous_hash.into(),
            document_id: candidate.document_id,
            execution_time_ms: candidate.execution_time_ms,
            payload: candidate.payload,
            metadata: candidate.metadata,
        }
    }

    pub fn is_degraded(&self) -> bool {
        payload_is_degraded(&self.payload)
    }

    /// Numeric score carried in the payload, if any.
    pub fn score(&self) -> Option<f64> {
        self.payload.get("score").and_then(Value::as_f64)
    }

    /// Digest of the whole record; the next record's `previous_hash`.
    pub fn record_hash(&self) -> String {
        hash_json(&serde_json::json!({
            "evidence_id": self.evidence_id,
            "task_id": self.task_id,
            "source_method": self.source_method,
            "parent_evidence_ids": self.parent_evidence_ids,
            "content_hash": self.content_hash,
            "previous_hash": self.previous_hash,
            "document_id": self.document_id,
            "execution_time_ms": self.execution_time_ms,
            "payload": self.payload,
            "metadata": self.metadata,
        }))
    }

    /// Merkle leaf recomputed from the payload, ignoring the stored hash.
    pub fn leaf_hash(&self) -> String {
        let recomputed = hash_json(&self.payload);
        hash_parts(&[&self.task_id, &self.evidence_id, &recomputed])
    }

    /// Check that the stored content hash and id still match the payload.
    pub fn verify_content(&self) -> Result<(), IntegrityError> {
        let recomputed = hash_json(&self.payload);
        if recomputed != self.content_hash {
            return Err(IntegrityError::ContentHashMismatch {
                evidence_id: self.evidence_id.clone(),
                recorded: self.content_hash.clone(),
                recomputed,
            });
        }
        let expected_id = evidence_id_for(&self.task_id, &self.content_hash);
        if expected_id != self.evidence_id {
            return Err(IntegrityError::ContentHashMismatch {
                evidence_id: self.evidence_id.clone(),
                recorded: self.evidence_id.clone(),
                recomputed: expected_id,
            });
        }
        Ok(())
    }
}

/// Builder for evidence candidates with fluent API.
pub struct EvidenceBuilder {
    task_id: String,
    document_id: String,
    source_method: String,
    parents: BTreeSet<String>,
    execution_time_ms: u64,
    payload: Value,
    metadata: BTreeMap<String, Value>,
}

impl EvidenceBuilder {
    /// Start building evidence for a task.
    pub fn new(task_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            document_id: document_id.into(),
            source_method: String::new(),
            parents: BTreeSet::new(),
            execution_time_ms: 0,
            payload: Value::Null,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the producing method (or `+`-joined method sequence).
    pub fn source_method(mut self, method: impl Into<String>) -> Self {
        self.source_method = method.into();
        self
    }

    pub fn parent(mut self, evidence_id: impl Into<String>) -> Self {
        self.parents.insert(evidence_id.into());
        self
    }

    pub fn execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build the candidate.
    pub fn build(self) -> EvidenceCandidate {
        EvidenceCandidate {
            task_id: self.task_id,
            source_method: self.source_method,
            parent_evidence_ids: self.parents,
            document_id: self.document_id,
            execution_time_ms: self.execution_time_ms,
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}
