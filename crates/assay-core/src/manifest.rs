//! The append-only pipeline manifest.
//!
//! One entry per phase boundary. Sealing freezes the manifest with an
//! integrity hash over every entry, the abort record (if any), the ledger
//! chain hash and the macro node hash. A sealed manifest accepts no further
//! entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::contracts::RunContext;
use crate::digest::hash_json;
use crate::error::{AssayError, ErrorKind, IntegrityError};
use crate::phase::Phase;
use crate::seed::SeedRecord;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Completed,
    Failed,
}

/// One phase boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub phase: Phase,
    pub status: PhaseStatus,
    /// Content digest of the phase output.
    pub output_digest: Option<String>,
    pub item_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items skipped and flagged during the phase.
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRecord {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineManifest {
    pub document_id: String,
    pub correlation_id: String,
    pub context_digest: String,
    pub input_digests: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub seeds: Vec<SeedRecord>,
    pub abort: Option<AbortRecord>,
    pub ledger_chain_hash: Option<String>,
    pub macro_hash: Option<String>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub integrity_hash: Option<String>,
}

impl PipelineManifest {
    pub fn new(context: &RunContext, input_digests: BTreeMap<String, String>) -> Self {
        Self {
            document_id: context.document_id().to_string(),
            correlation_id: context.correlation_id().to_string(),
            context_digest: context.digest().to_string(),
            input_digests,
            created_at: Utc::now(),
            status: RunStatus::Running,
            entries: Vec::new(),
            seeds: Vec::new(),
            abort: None,
            ledger_chain_hash: None,
            macro_hash: None,
            sealed_at: None,
            integrity_hash: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.integrity_hash.is_some()
    }

    fn ensure_open(&self) -> Result<(), IntegrityError> {
        if self.is_sealed() {
            return Err(IntegrityError::ManifestSealed);
        }
        Ok(())
    }

    /// Append a phase boundary.
    pub fn record(&mut self, entry: ManifestEntry) -> Result<(), IntegrityError> {
        self.ensure_open()?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn record_seeds(&mut self, seeds: Vec<SeedRecord>) -> Result<(), IntegrityError> {
        self.ensure_open()?;
        self.seeds = seeds;
        Ok(())
    }

    /// Phases that completed, in order.
    pub fn completed_phases(&self) -> Vec<Phase> {
        self.entries
            .iter()
            .filter(|e| e.status == PhaseStatus::Completed)
            .map(|e| e.phase)
            .collect()
    }

    /// Seal a finished run.
    pub fn seal_completed(
        &mut self,
        ledger_chain_hash: String,
        macro_hash: String,
    ) -> Result<String, IntegrityError> {
        self.ensure_open()?;
        self.status = RunStatus::Completed;
        self.ledger_chain_hash = Some(ledger_chain_hash);
        self.macro_hash = Some(macro_hash);
        self.seal()
    }

    /// Seal an aborted run at the failing phase.
    pub fn seal_aborted(
        &mut self,
        phase: Phase,
        error: &AssayError,
        ledger_chain_hash: Option<String>,
    ) -> Result<String, IntegrityError> {
        self.ensure_open()?;
        let now = Utc::now();
        self.entries.push(ManifestEntry {
            phase,
            status: PhaseStatus::Failed,
            output_digest: None,
            item_count: 0,
            started_at: now,
            finished_at: now,
            flags: Vec::new(),
        });
        self.status = RunStatus::Aborted;
        self.abort = Some(AbortRecord {
            phase,
            kind: error.kind(),
            message: error.to_string(),
            at: now,
        });
        self.ledger_chain_hash = ledger_chain_hash;
        self.seal()
    }

    fn seal(&mut self) -> Result<String, IntegrityError> {
        self.sealed_at = Some(Utc::now());
        let hash = self.compute_integrity_hash()?;
        self.integrity_hash = Some(hash.clone());
        info!(status = ?self.status, digest = %hash, "manifest sealed");
        Ok(hash)
    }

    /// Digest of everything except the integrity hash itself.
    pub fn compute_integrity_hash(&self) -> Result<String, IntegrityError> {
        let mut value = serde_json::to_value(self).map_err(|e| IntegrityError::Storage {
            what: "manifest".to_string(),
            message: e.to_string(),
        })?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("integrity_hash");
        }
        Ok(hash_json(&value))
    }

    /// Recompute the integrity hash and compare with the sealed one.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let Some(recorded) = &self.integrity_hash else {
            return Err(IntegrityError::ManifestDigestMismatch {
                recorded: "<unsealed>".to_string(),
                recomputed: self.compute_integrity_hash()?,
            });
        };
        let recomputed = self.compute_integrity_hash()?;
        if &recomputed != recorded {
            return Err(IntegrityError::ManifestDigestMismatch {
                recorded: recorded.clone(),
                recomputed,
            });
        }
        Ok(())
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), IntegrityError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| storage(path, e))?;
        fs::write(path, json).map_err(|e| storage(path, e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IntegrityError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| storage(path, e))?;
        serde_json::from_str(&contents).map_err(|e| storage(path, e))
    }
}

fn storage(path: &Path, err: impl std::fmt::Display) -> IntegrityError {
    IntegrityError::Storage {
        what: path.display().to_string(),
        message: err.to_string(),
    }
}
