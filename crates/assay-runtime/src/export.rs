//! Run artifacts and their verification.
//!
//! A run directory holds three files:
//! - `manifest.json`: the sealed [`PipelineManifest`]
//! - `report.json`: the full aggregation tree, certificates and recommendations
//! - `evidence_ledger.json`: every committed evidence record
//!
//! The report carries no timestamps, so identical inputs export identical
//! reports whatever the worker count.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use assay_core::contracts::RiskCertificate;
use assay_core::manifest::MANIFEST_FILE;
use assay_core::{AssayError, EvidenceLedger, IntegrityError, PipelineManifest, Recommendation, Rollup};

pub const REPORT_FILE: &str = "report.json";
pub const LEDGER_FILE: &str = "evidence_ledger.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub document_id: String,
    pub correlation_id: String,
    pub ledger_chain_hash: String,
    pub macro_hash: String,
    pub rollup: Rollup,
    pub certificates: Vec<RiskCertificate>,
    pub recommendations: Vec<Recommendation>,
    pub degraded_tasks: Vec<String>,
    pub uncovered_tasks: Vec<String>,
}

/// Where a run's artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub manifest: PathBuf,
    pub report: PathBuf,
    pub ledger: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            manifest: dir.join(MANIFEST_FILE),
            report: dir.join(REPORT_FILE),
            ledger: dir.join(LEDGER_FILE),
        }
    }
}

fn storage(path: &Path, err: impl std::fmt::Display) -> IntegrityError {
    IntegrityError::Storage {
        what: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Write the ledger and report. The manifest is written by the orchestrator
/// once it is sealed.
pub fn write_artifacts(
    dir: impl AsRef<Path>,
    ledger: &EvidenceLedger,
    report: &RunReport,
) -> Result<ArtifactPaths, IntegrityError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| storage(dir, e))?;
    let paths = ArtifactPaths::in_dir(dir);

    ledger.save(&paths.ledger)?;
    let json = serde_json::to_string_pretty(report).map_err(|e| storage(&paths.report, e))?;
    fs::write(&paths.report, json).map_err(|e| storage(&paths.report, e))?;

    info!(dir = %dir.display(), records = ledger.len(), "artifacts written");
    Ok(paths)
}

pub fn load_report(path: impl AsRef<Path>) -> Result<RunReport, IntegrityError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| storage(path, e))?;
    serde_json::from_str(&contents).map_err(|e| storage(path, e))
}

/// Result of re-checking a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub manifest: PipelineManifest,
    pub ledger_records: usize,
}

/// Re-check a run directory after the fact.
///
/// 1. The manifest's integrity hash must match its contents.
/// 2. The ledger's recomputed chain hash must match the sealed one.
/// 3. Every ledger record and link must verify.
/// 4. Every node hash in the report above the dimension level must match
///    the hash recomputed from its children, and the macro hash must match
///    the sealed one.
pub fn verify_artifacts(dir: impl AsRef<Path>) -> Result<Verification, AssayError> {
    let paths = ArtifactPaths::in_dir(dir);

    let manifest = PipelineManifest::load(&paths.manifest)?;
    manifest.verify()?;

    let mut ledger_records = 0;
    if let Some(sealed) = &manifest.ledger_chain_hash {
        let ledger = EvidenceLedger::load_unverified(&paths.ledger)?;
        if let Err(err) = ledger.verify_against(sealed) {
            warn!(error = %err, "ledger does not match sealed manifest");
            return Err(err.into());
        }
        ledger.verify()?;
        ledger_records = ledger.len();
    }

    if let Some(sealed) = &manifest.macro_hash {
        let report = load_report(&paths.report)?;
        report.rollup.verify()?;
        if report.rollup.macro_hash() != sealed {
            return Err(IntegrityError::ManifestDigestMismatch {
                recorded: sealed.clone(),
                recomputed: report.rollup.macro_hash().to_string(),
            }
            .into());
        }
    }

    info!(records = ledger_records, status = ?manifest.status, "artifacts verified");
    Ok(Verification {
        manifest,
        ledger_records,
    })
}
