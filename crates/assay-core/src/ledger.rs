//! Hash-chained, content-addressed, append-only evidence ledger.
//!
//! Two digests describe a ledger:
//!
//! - the **chain**: every record's `previous_hash` is the record hash of the
//!   record committed before it, so the commit order is tamper-evident;
//! - the **chain hash**: a Merkle root over leaves sorted by
//!   `(task_id, evidence_id)`, each leaf recomputed from its payload. It does
//!   not depend on commit order, so one worker and many workers agree on it.
//!
//! Appends are idempotent per `(task_id, content_hash)`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::digest::{merkle_root, GENESIS};
use crate::error::IntegrityError;
use crate::evidence::{Evidence, EvidenceCandidate};

const LEDGER_FORMAT_VERSION: &str = "1";

/// On-disk form of a ledger.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedLedger {
    format_version: String,
    chain_hash: String,
    records: Vec<Evidence>,
}

/// Whether an append created a record or returned an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Committed,
    Duplicate,
}

#[derive(Debug, Default, Clone)]
pub struct EvidenceLedger {
    records: Vec<Evidence>,
    by_id: BTreeMap<String, usize>,
    by_task: BTreeMap<String, usize>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate. Re-appending identical content is a no-op that
    /// returns the first record.
    pub fn append(&mut self, candidate: EvidenceCandidate) -> Result<Evidence, IntegrityError> {
        self.append_with_outcome(candidate).map(|(evidence, _)| evidence)
    }

    /// Append a candidate and report whether it was new.
    ///
    /// # Arguments
    ///
    /// * `candidate` - Unhashed evidence for one task.
    ///
    /// # Returns
    ///
    /// The committed record and `Committed`, or, when the task already holds
    /// evidence with the same content hash, that earlier record and
    /// `Duplicate`. A duplicate leaves the chain untouched.
    ///
    /// # Errors
    ///
    /// `ConflictingEvidence` when the task already holds different content.
    pub fn append_with_outcome(
        &mut self,
        candidate: EvidenceCandidate,
    ) -> Result<(Evidence, AppendOutcome), IntegrityError> {
        let content_hash = candidate.content_hash();

        if let Some(&index) = self.by_task.get(&candidate.task_id) {
            let existing = &self.records[index];
            if existing.content_hash == content_hash {
                debug!(task_id = %candidate.task_id, evidence_id = %existing.evidence_id, "duplicate append ignored");
                return Ok((existing.clone(), AppendOutcome::Duplicate));
            }
            warn!(task_id = %candidate.task_id, "conflicting evidence rejected");
            return Err(IntegrityError::ConflictingEvidence {
                task_id: candidate.task_id,
                existing: existing.content_hash.clone(),
                incoming: content_hash,
            });
        }

        let evidence = Evidence::commit(candidate, self.tail_hash());
        let index = self.records.len();
        self.by_id.insert(evidence.evidence_id.clone(), index);
        self.by_task.insert(evidence.task_id.clone(), index);
        self.records.push(evidence.clone());

        debug!(
            task_id = %evidence.task_id,
            evidence_id = %evidence.evidence_id,
            digest = %evidence.content_hash,
            "evidence committed"
        );
        Ok((evidence, AppendOutcome::Committed))
    }

    pub fn get(&self, evidence_id: &str) -> Option<&Evidence> {
        self.by_id.get(evidence_id).map(|&i| &self.records[i])
    }

    pub fn get_by_task(&self, task_id: &str) -> Option<&Evidence> {
        self.by_task.get(task_id).map(|&i| &self.records[i])
    }

    /// Records in commit order.
    pub fn records(&self) -> &[Evidence] {
        &self.records
    }

    /// Records ordered by `(task_id, evidence_id)`.
    pub fn sorted_records(&self) -> Vec<&Evidence> {
        let mut sorted: Vec<&Evidence> = self.records.iter().collect();
        sorted.sort_by(|a, b| (&a.task_id, &a.evidence_id).cmp(&(&b.task_id, &b.evidence_id)));
        sorted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record hash of the current tail, or [`GENESIS`] when empty.
    pub fn tail_hash(&self) -> String {
        self.records
            .last()
            .map(Evidence::record_hash)
            .unwrap_or_else(|| GENESIS.to_string())
    }

    /// Merkle root over all records, independent of commit order.
    pub fn chain_hash(&self) -> String {
        let leaves: Vec<String> = self.sorted_records().into_iter().map(Evidence::leaf_hash).collect();
        merkle_root(&leaves)
    }

    /// Re-check every content hash and chain link.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let mut expected_previous = GENESIS.to_string();
        let mut seen_tasks = BTreeMap::new();

        for (index, record) in self.records.iter().enumerate() {
            record.verify_content()?;
            if record.previous_hash != expected_previous {
                return Err(IntegrityError::BrokenChain {
                    index,
                    expected: expected_previous,
                    found: record.previous_hash.clone(),
                });
            }
            if let Some(first) = seen_tasks.insert(record.task_id.as_str(), record.content_hash.as_str()) {
                return Err(IntegrityError::ConflictingEvidence {
                    task_id: record.task_id.clone(),
                    existing: first.to_string(),
                    incoming: record.content_hash.clone(),
                });
            }
            expected_previous = record.record_hash();
        }
        Ok(())
    }

    /// Compare the recomputed chain hash with a sealed digest.
    pub fn verify_against(&self, sealed: &str) -> Result<(), IntegrityError> {
        let recomputed = self.chain_hash();
        if recomputed != sealed {
            return Err(IntegrityError::ChainHashMismatch {
                sealed: sealed.to_string(),
                recomputed,
            });
        }
        Ok(())
    }

    /// Write the ledger as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IntegrityError> {
        let path = path.as_ref();
        let persisted = PersistedLedger {
            format_version: LEDGER_FORMAT_VERSION.to_string(),
            chain_hash: self.chain_hash(),
            records: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(|e| storage(path, e))?;
        fs::write(path, json).map_err(|e| storage(path, e))
    }

    /// Load a ledger and verify every record and link.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IntegrityError> {
        let ledger = Self::load_unverified(path)?;
        ledger.verify()?;
        Ok(ledger)
    }

    /// Load a ledger without verification, for forensic comparison.
    pub fn load_unverified(path: impl AsRef<Path>) -> Result<Self, IntegrityError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| storage(path, e))?;
        let persisted: PersistedLedger = serde_json::from_str(&contents).map_err(|e| storage(path, e))?;

        let mut ledger = Self::new();
        for record in persisted.records {
            let index = ledger.records.len();
            ledger.by_id.insert(record.evidence_id.clone(), index);
            ledger.by_task.entry(record.task_id.clone()).or_insert(index);
            ledger.records.push(record);
        }
        Ok(ledger)
    }
}

fn storage(path: &Path, err: impl std::fmt::Display) -> IntegrityError {
    IntegrityError::Storage {
        what: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceBuilder;
    use serde_json::json;

    fn candidate(task: &str, score: f64) -> EvidenceCandidate {
        EvidenceBuilder::new(task, "doc-1")
            .source_method("pattern_presence")
            .payload(json!({"score": score, "degraded": false}))
            .build()
    }

    #[test]
    fn test_append_chains_records() {
        let mut ledger = EvidenceLedger::new();
        let first = ledger.append(candidate("MQC-001_PA01", 1.0)).unwrap();
        let second = ledger.append(candidate("MQC-002_PA01", 2.0)).unwrap();

        assert_eq!(first.previous_hash, GENESIS);
        assert_eq!(second.previous_hash, first.record_hash());
        assert_eq!(ledger.tail_hash(), second.record_hash());
        ledger.verify().unwrap();
    }

    #[test]
    fn test_ten_reappends_yield_one_record() {
        let mut ledger = EvidenceLedger::new();
        let first = ledger.append(candidate("MQC-001_PA01", 1.5)).unwrap();
        let hash = ledger.chain_hash();

        for _ in 0..10 {
            let mut retry = candidate("MQC-001_PA01", 1.5);
            retry.execution_time_ms = 77;
            let (again, outcome) = ledger.append_with_outcome(retry).unwrap();
            assert_eq!(outcome, AppendOutcome::Duplicate);
            assert_eq!(again, first);
        }

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.chain_hash(), hash);
    }

    #[test]
    fn test_conflicting_content_rejected() {
        let mut ledger = EvidenceLedger::new();
        ledger.append(candidate("MQC-001_PA01", 1.0)).unwrap();
        let err = ledger.append(candidate("MQC-001_PA01", 2.0)).unwrap_err();
        assert!(matches!(err, IntegrityError::ConflictingEvidence { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_chain_hash_ignores_commit_order() {
        let mut forward = EvidenceLedger::new();
        let mut backward = EvidenceLedger::new();
        for i in 1..=5 {
            forward.append(candidate(&format!("MQC-{i:03}_PA01"), i as f64 / 2.0)).unwrap();
        }
        for i in (1..=5).rev() {
            backward.append(candidate(&format!("MQC-{i:03}_PA01"), i as f64 / 2.0)).unwrap();
        }
        assert_ne!(forward.tail_hash(), backward.tail_hash());
        assert_eq!(forward.chain_hash(), backward.chain_hash());
    }

    #[test]
    fn test_get_by_id_and_task() {
        let mut ledger = EvidenceLedger::new();
        let evidence = ledger.append(candidate("MQC-001_PA01", 1.0)).unwrap();
        assert_eq!(ledger.get(&evidence.evidence_id), Some(&evidence));
        assert_eq!(ledger.get_by_task("MQC-001_PA01"), Some(&evidence));
        assert!(ledger.get("EV-missing").is_none());
    }

    #[test]
    fn test_save_load_roundtrip_and_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evidence_ledger.json");

        let mut ledger = EvidenceLedger::new();
        for i in 1..=3 {
            ledger.append(candidate(&format!("MQC-{i:03}_PA02"), 1.0)).unwrap();
        }
        let sealed = ledger.chain_hash();
        ledger.save(&path).unwrap();

        let loaded = EvidenceLedger::load(&path).unwrap();
        loaded.verify_against(&sealed).unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["records"][1]["payload"]["score"] = json!(3.0);
        fs::write(&path, raw.to_string()).unwrap();

        assert!(matches!(
            EvidenceLedger::load(&path),
            Err(IntegrityError::ContentHashMismatch { .. })
        ));
        let forensic = EvidenceLedger::load_unverified(&path).unwrap();
        assert!(matches!(
            forensic.verify_against(&sealed),
            Err(IntegrityError::ChainHashMismatch { .. })
        ));
    }

    #[test]
    fn test_broken_link_detected() {
        let mut ledger = EvidenceLedger::new();
        ledger.append(candidate("MQC-001_PA01", 1.0)).unwrap();
        ledger.append(candidate("MQC-002_PA01", 1.0)).unwrap();
        ledger.records[1].previous_hash = GENESIS.to_string();
        assert!(matches!(ledger.verify(), Err(IntegrityError::BrokenChain { index: 1, .. })));
    }
}
