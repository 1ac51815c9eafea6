//! The pipeline orchestrator.
//!
//! Runs the eleven phases strictly in order:
//!
//! ```text
//! Validate → Ingest → Plan → Dispatch → Score → AggregateDimension →
//! AggregatePolicyArea → AggregateCluster → Macro → Recommend → Export
//! ```
//!
//! Every phase runs under its own timeout and after an abort check. A
//! completed phase appends a manifest entry carrying a digest of its output.
//! A failure that reaches a phase boundary is routed through
//! [`FallbackPolicy`]; the first one seals the manifest and nothing after it
//! runs. A phase past its budget raises the abort signal and is drained
//! before it fails, so in-flight dispatch work still commits. This is the
//! single entry point for callers.

use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use assay_core::contracts::{bootstrap_mean, check_traceability, InputSnapshot, RiskCertificate, RunContext};
use assay_core::digest::{hash_json, hash_serializable};
use assay_core::hierarchy::{all_expectations, ATTR_CLUSTER};
use assay_core::manifest::{ManifestEntry, PhaseStatus};
use assay_core::planner::plan_at;
use assay_core::score::score_evidence;
use assay_core::seed::SeedRegistry;
use assay_core::{
    roll_up_level, AggregationNode, AssayError, ChunkRouter, Document, EvidenceAssembler,
    EvidenceLedger, Expectations, Fallback, FallbackPolicy, IntegrityError, InvariantViolation,
    Leaf, Level, MethodBindings, Phase, PipelineManifest, Questionnaire, RecommendationEngine,
    Rollup, ValidationError,
};

use crate::abort::AbortSignal;
use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::export::{write_artifacts, ArtifactPaths, RunReport};
use crate::ledger_writer::LedgerWriter;
use crate::methods::MethodTable;
use crate::pool::WorkerPool;
use crate::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Yaml,
}

impl InputFormat {
    /// `.json` is JSON; anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => InputFormat::Json,
            _ => InputFormat::Yaml,
        }
    }
}

/// One external input, held as the exact text that was supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSource {
    pub name: String,
    pub format: InputFormat,
    pub contents: String,
    /// File the contents were read from, if any.
    pub path: Option<PathBuf>,
}

impl InputSource {
    pub fn new(name: impl Into<String>, format: InputFormat, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format,
            contents: contents.into(),
            path: None,
        }
    }

    /// Read a file. The name is the file stem.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let contents = read_input(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("input")
            .to_string();
        let mut source = Self::new(name, InputFormat::from_path(path), contents);
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    /// Re-read a file-backed input and refuse if it changed since `snapshot`
    /// froze it under `role`. In-memory inputs cannot change.
    pub fn verify_unchanged(&self, role: &str, snapshot: &InputSnapshot) -> Result<(), ValidationError> {
        match &self.path {
            Some(path) => snapshot.verify_input(role, read_input(path)?.as_bytes()),
            None => Ok(()),
        }
    }
}

fn read_input(path: &Path) -> Result<String, ValidationError> {
    std::fs::read_to_string(path).map_err(|e| ValidationError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// The runtime configuration as recorded in the run context.
fn config_value(config: &RuntimeConfig) -> Result<Value, IntegrityError> {
    serde_json::to_value(config).map_err(|e| IntegrityError::Storage {
        what: "runtime config".to_string(),
        message: e.to_string(),
    })
}

/// The two external inputs of a run.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub questionnaire: InputSource,
    pub document: InputSource,
}

impl PipelineInputs {
    pub fn new(questionnaire: InputSource, document: InputSource) -> Self {
        Self {
            questionnaire,
            document,
        }
    }

    pub fn from_paths(
        questionnaire: impl AsRef<Path>,
        document: impl AsRef<Path>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(
            InputSource::from_path(questionnaire)?,
            InputSource::from_path(document)?,
        ))
    }
}

/// How a run ended. The manifest is sealed and written in both cases.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        manifest_path: PathBuf,
        manifest: PipelineManifest,
        report: RunReport,
    },
    Aborted {
        phase: Phase,
        error: AssayError,
        manifest_path: PathBuf,
        manifest: PipelineManifest,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn manifest_path(&self) -> &Path {
        match self {
            RunOutcome::Completed { manifest_path, .. } | RunOutcome::Aborted { manifest_path, .. } => {
                manifest_path
            }
        }
    }

    pub fn manifest(&self) -> &PipelineManifest {
        match self {
            RunOutcome::Completed { manifest, .. } | RunOutcome::Aborted { manifest, .. } => manifest,
        }
    }
}

struct PhaseFailure {
    phase: Phase,
    error: AssayError,
}

type PhaseResult<T> = Result<PhaseOutput<T>, AssayError>;

struct PhaseOutput<T> {
    value: T,
    digest: String,
    items: usize,
    flags: Vec<String>,
}

impl<T> PhaseOutput<T> {
    fn new(value: T, digest: String, items: usize) -> Self {
        Self {
            value,
            digest,
            items,
            flags: Vec::new(),
        }
    }

    fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }
}

/// What survives a failed phase for the abort record.
#[derive(Default)]
struct RunTrace {
    ledger: Option<EvidenceLedger>,
}

pub struct PipelineOrchestrator {
    config: RuntimeConfig,
    table: Arc<MethodTable>,
    artifacts_dir: PathBuf,
    abort: AbortSignal,
    correlation_id: Option<String>,
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineOrchestratorBuilder {
        PipelineOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// A handle that can cancel the run from elsewhere.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Run every phase and seal the manifest.
    pub async fn run(&self, inputs: PipelineInputs) -> RunOutcome {
        let snapshot = InputSnapshot::freeze([
            ("questionnaire", inputs.questionnaire.contents.as_bytes()),
            ("document", inputs.document.contents.as_bytes()),
        ]);

        // An unserializable config is reported by Validate, once a manifest exists.
        let (config, config_error) = match config_value(&self.config) {
            Ok(value) => (value, None),
            Err(err) => (Value::Null, Some(err)),
        };
        let mut builder = RunContext::builder(inputs.document.name.clone())
            .snapshot_digest(snapshot.snapshot_digest())
            .config(config);
        if let Some(id) = &self.correlation_id {
            builder = builder.correlation_id(id.clone());
        }
        let context = builder.build();

        info!(
            document_id = %context.document_id(),
            correlation_id = %context.correlation_id(),
            workers = self.config.workers,
            "run started"
        );

        let mut manifest = PipelineManifest::new(&context, snapshot.digests().clone());
        let mut seeds = SeedRegistry::new(context.document_id(), context.correlation_id());
        let mut trace = RunTrace::default();

        let result = self
            .execute(&inputs, &snapshot, config_error, &context, &mut manifest, &mut seeds, &mut trace)
            .await;

        if let Err(err) = manifest.record_seeds(seeds.audit_log()) {
            warn!(error = %err, "seed audit log not recorded");
        }
        self.conclude(result, manifest, trace)
    }

    async fn run_phase<T, F>(
        &self,
        manifest: &mut PipelineManifest,
        phase: Phase,
        work: F,
    ) -> Result<T, PhaseFailure>
    where
        F: Future<Output = PhaseResult<T>>,
    {
        let fail = |error: AssayError| PhaseFailure { phase, error };

        self.abort.check().map_err(fail)?;
        let limit = self.config.phase_timeouts.for_phase(phase);
        let started_at = chrono::Utc::now();
        info!(phase = %phase, "phase started");

        tokio::pin!(work);
        let finished = tokio::select! {
            biased;
            result = &mut work => Some(result),
            _ = tokio::time::sleep(limit) => None,
        };
        let result = match finished {
            Some(result) => result,
            None => {
                let timeout = AssayError::PhaseTimeout {
                    phase: phase.to_string(),
                    limit_ms: limit.as_millis() as u64,
                };
                warn!(phase = %phase, limit = ?limit, "phase budget exhausted, draining");
                self.abort.abort(timeout.to_string());
                if let Err(err) = work.await {
                    warn!(phase = %phase, error = %err, "drained phase also failed");
                }
                Err(timeout)
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let fallback = FallbackPolicy::decide(&err);
                if fallback != Fallback::Abort {
                    // Degrade and skip act on single tasks; a phase has none to act on.
                    warn!(phase = %phase, kind = %err.kind(), fallback = ?fallback, "task-scoped failure reached phase boundary");
                }
                return Err(fail(err));
            }
        };

        for flag in &output.flags {
            warn!(phase = %phase, flag = %flag, "item flagged");
        }
        manifest
            .record(ManifestEntry {
                phase,
                status: PhaseStatus::Completed,
                output_digest: Some(output.digest.clone()),
                item_count: output.items,
                started_at,
                finished_at: chrono::Utc::now(),
                flags: output.flags,
            })
            .map_err(|e| fail(e.into()))?;

        info!(phase = %phase, digest = %output.digest, items = output.items, "phase completed");
        Ok(output.value)
    }

    async fn execute(
        &self,
        inputs: &PipelineInputs,
        snapshot: &InputSnapshot,
        config_error: Option<IntegrityError>,
        context: &RunContext,
        manifest: &mut PipelineManifest,
        seeds: &mut SeedRegistry,
        trace: &mut RunTrace,
    ) -> Result<RunReport, PhaseFailure> {
        let config = &self.config;
        let rubric = config.rubric;

        let (questionnaire, document) = self
            .run_phase(manifest, Phase::Validate, async {
                if let Some(err) = config_error {
                    return Err(AssayError::from(err));
                }
                config.validate()?;
                snapshot.verify_pinned(&config.pinned_inputs)?;
                let questionnaire = parse_questionnaire(&inputs.questionnaire)?;
                let document = parse_document(&inputs.document)?;
                let items = questionnaire.questions.len();
                PhaseResult::Ok(PhaseOutput::new((questionnaire, document), snapshot.snapshot_digest(), items))
            })
            .await?;

        let bindings = self
            .run_phase(manifest, Phase::Ingest, async {
                inputs.questionnaire.verify_unchanged("questionnaire", snapshot)?;
                inputs.document.verify_unchanged("document", snapshot)?;

                let router = ChunkRouter::new(&document);
                let cells: Vec<_> = document
                    .chunks
                    .iter()
                    .map(|c| json!([c.policy_area_id, c.dimension_id, c.chunk_id]))
                    .collect();
                let flags = questionnaire
                    .referenced_methods()
                    .into_iter()
                    .filter(|name| !self.table.contains(name))
                    .map(|name| format!("missing_method:{name}"))
                    .collect();
                PhaseResult::Ok(PhaseOutput::new(
                    MethodBindings::from_questionnaire(&questionnaire),
                    hash_json(&json!(cells)),
                    router.len(),
                )
                .with_flags(flags))
            })
            .await?;

        let tasks = self
            .run_phase(manifest, Phase::Plan, async {
                let tasks = plan_at(&questionnaire, &document, context.created_at())?;
                let fingerprints: Vec<String> = tasks.iter().map(|t| t.fingerprint()).collect();
                let items = tasks.len();
                PhaseResult::Ok(PhaseOutput::new(tasks, hash_json(&json!(fingerprints)), items))
            })
            .await?;

        let ledger_slot = &mut trace.ledger;
        let pool_report = self
            .run_phase(manifest, Phase::Dispatch, async {
                let dispatcher = Arc::new(Dispatcher::new(
                    Arc::clone(&self.table),
                    bindings,
                    &document,
                    EvidenceAssembler::new(config.scoring.merge_strategy),
                    config.task_timeout,
                ));
                let writer = LedgerWriter::spawn(EvidenceLedger::new(), config.workers * 2);
                let pooled = WorkerPool::new(config.workers)
                    .run(tasks.clone(), dispatcher, writer.handle(), &self.abort)
                    .await;
                let ledger = writer.finish().await?;
                let digest = ledger.chain_hash();
                let items = ledger.len();
                *ledger_slot = Some(ledger);

                let report = pooled.map_err(|stopped| {
                    warn!(not_started = stopped.report.not_started, "dispatch stopped early");
                    stopped.error
                })?;
                let flags = report.degraded.iter().map(|t| format!("degraded:{t}")).collect();
                PhaseResult::Ok(PhaseOutput::new(report, digest, items).with_flags(flags))
            })
            .await?;

        let ledger = trace.ledger.as_ref().ok_or_else(|| PhaseFailure {
            phase: Phase::Dispatch,
            error: IntegrityError::Storage {
                what: "evidence ledger".to_string(),
                message: "dispatch produced no ledger".to_string(),
            }
            .into(),
        })?;

        let (leaves, uncovered) = self
            .run_phase(manifest, Phase::Score, async {
                ledger.verify()?;
                let leaves = score_evidence(ledger, &tasks, &questionnaire, &rubric);
                check_traceability(&leaves, ledger)?;

                let mut uncovered = Vec::new();
                let mut flags = Vec::new();
                for task in tasks.iter().filter(|t| ledger.get_by_task(&t.task_id).is_none()) {
                    let err = AssayError::MissingEvidence {
                        task_id: task.task_id.clone(),
                    };
                    match FallbackPolicy::decide(&err) {
                        Fallback::Abort => return Err(err),
                        fallback => {
                            flags.push(format!("uncovered:{}:{fallback:?}", task.task_id));
                            uncovered.push(task.task_id.clone());
                        }
                    }
                }

                let pairs: Vec<_> = leaves.iter().map(|l| json!([l.member_id, l.digest])).collect();
                let items = leaves.len();
                PhaseResult::Ok(PhaseOutput::new((leaves, uncovered), hash_json(&json!(pairs)), items).with_flags(flags))
            })
            .await?;

        let expectations = all_expectations(&questionnaire);
        let empty = Expectations::new();
        let expect = |level: Level| expectations.get(&level).unwrap_or(&empty);

        let settings = &config.aggregation;
        let dimension_seed = seeds.seed_for("permutation:dimension");
        let dimensions = self
            .run_phase(manifest, Phase::AggregateDimension, async {
                level_output(roll_up_level(
                    Level::Dimension,
                    &leaves,
                    settings,
                    expect(Level::Dimension),
                    &rubric,
                    dimension_seed,
                )?)
            })
            .await?;

        let policy_area_seed = seeds.seed_for("permutation:policy_area");
        let policy_areas = self
            .run_phase(manifest, Phase::AggregatePolicyArea, async {
                level_output(roll_up_level(
                    Level::PolicyArea,
                    &dimensions,
                    settings,
                    expect(Level::PolicyArea),
                    &rubric,
                    policy_area_seed,
                )?)
            })
            .await?;

        let cluster_seed = seeds.seed_for("permutation:cluster");
        let clusters = self
            .run_phase(manifest, Phase::AggregateCluster, async {
                level_output(roll_up_level(
                    Level::Cluster,
                    &policy_areas,
                    settings,
                    expect(Level::Cluster),
                    &rubric,
                    cluster_seed,
                )?)
            })
            .await?;

        let macro_seed = seeds.seed_for("permutation:macro");
        let certificate_seeds: Vec<(String, u64)> = clusters
            .iter()
            .map(|c| c.node_id.as_str())
            .chain(std::iter::once("MACRO"))
            .map(|id| (id.to_string(), seeds.seed_for(&format!("certificate:{id}"))))
            .collect();
        let (macro_node, certificates) = self
            .run_phase(manifest, Phase::Macro, async {
                let mut top = roll_up_level(
                    Level::Macro,
                    &clusters,
                    settings,
                    expect(Level::Macro),
                    &rubric,
                    macro_seed,
                )?;
                let macro_node = top.pop().ok_or_else(|| InvariantViolation::EmptyLevel {
                    level: Level::Macro.as_str().to_string(),
                })?;
                let certificates = self.certificates(&leaves, &clusters, &macro_node, &certificate_seeds);
                let digest = macro_node.node_hash.clone();
                PhaseResult::Ok(PhaseOutput::new((macro_node, certificates), digest, 1))
            })
            .await?;

        let recommendations = self
            .run_phase(manifest, Phase::Recommend, async {
                let recommendations = RecommendationEngine::new().recommend(&dimensions, &clusters, &macro_node);
                let digest = digest_of(&recommendations)?;
                let items = recommendations.len();
                PhaseResult::Ok(PhaseOutput::new(recommendations, digest, items))
            })
            .await?;

        let rollup = Rollup {
            dimensions,
            policy_areas,
            clusters,
            macro_node,
        };
        let report = RunReport {
            document_id: context.document_id().to_string(),
            correlation_id: context.correlation_id().to_string(),
            ledger_chain_hash: ledger.chain_hash(),
            macro_hash: rollup.macro_hash().to_string(),
            rollup,
            certificates,
            recommendations,
            degraded_tasks: pool_report.degraded,
            uncovered_tasks: uncovered,
        };

        self.run_phase(manifest, Phase::Export, async {
            write_artifacts(&self.artifacts_dir, ledger, &report)?;
            let digest = digest_of(&report)?;
            PhaseResult::Ok(PhaseOutput::new((), digest, ledger.len()))
        })
        .await?;

        Ok(report)
    }

    /// Percentile-bootstrap intervals over leaf scores, per cluster and for
    /// the whole run.
    fn certificates(
        &self,
        leaves: &[Leaf],
        clusters: &[AggregationNode],
        macro_node: &AggregationNode,
        seeds: &[(String, u64)],
    ) -> Vec<RiskCertificate> {
        let seed_for = |id: &str| seeds.iter().find(|(n, _)| n == id).map(|(_, s)| *s).unwrap_or(0);
        let settings = &self.config.certificate;
        let mut out = Vec::with_capacity(clusters.len() + 1);

        for cluster in clusters {
            let Some(cluster_id) = cluster.attributes.get(ATTR_CLUSTER) else {
                continue;
            };
            let samples: Vec<f64> = leaves
                .iter()
                .filter(|l| l.attributes.get(ATTR_CLUSTER) == Some(cluster_id))
                .filter_map(|l| l.score)
                .collect();
            out.extend(bootstrap_mean(&cluster.node_id, &samples, settings, seed_for(&cluster.node_id)));
        }

        let all: Vec<f64> = leaves.iter().filter_map(|l| l.score).collect();
        out.extend(bootstrap_mean(&macro_node.node_id, &all, settings, seed_for(&macro_node.node_id)));
        out
    }

    fn conclude(
        &self,
        result: Result<RunReport, PhaseFailure>,
        mut manifest: PipelineManifest,
        trace: RunTrace,
    ) -> RunOutcome {
        let paths = ArtifactPaths::in_dir(&self.artifacts_dir);
        if let Err(err) = std::fs::create_dir_all(&self.artifacts_dir) {
            error!(dir = %self.artifacts_dir.display(), error = %err, "cannot create artifacts dir");
        }

        match result {
            Ok(report) => {
                let sealed = manifest
                    .seal_completed(report.ledger_chain_hash.clone(), report.macro_hash.clone())
                    .and_then(|_| manifest.write(&paths.manifest));
                match sealed {
                    Ok(()) => {
                        info!(
                            manifest = %paths.manifest.display(),
                            macro_hash = %report.macro_hash,
                            "run completed"
                        );
                        RunOutcome::Completed {
                            manifest_path: paths.manifest,
                            manifest,
                            report,
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "manifest could not be sealed");
                        RunOutcome::Aborted {
                            phase: Phase::Export,
                            error: err.into(),
                            manifest_path: paths.manifest,
                            manifest,
                        }
                    }
                }
            }
            Err(PhaseFailure { phase, error }) => {
                error!(phase = %phase, kind = %error.kind(), error = %error, "run aborted");
                let chain_hash = trace.ledger.as_ref().map(EvidenceLedger::chain_hash);
                if let Some(ledger) = &trace.ledger {
                    if let Err(err) = ledger.save(&paths.ledger) {
                        warn!(error = %err, "partial ledger not saved");
                    }
                }
                if let Err(err) = manifest.seal_aborted(phase, &error, chain_hash) {
                    error!(error = %err, "manifest could not be sealed");
                }
                if let Err(err) = manifest.write(&paths.manifest) {
                    error!(error = %err, "manifest could not be written");
                }
                RunOutcome::Aborted {
                    phase,
                    error,
                    manifest_path: paths.manifest,
                    manifest,
                }
            }
        }
    }
}

fn parse_questionnaire(source: &InputSource) -> Result<Questionnaire, ValidationError> {
    let parsed = match source.format {
        InputFormat::Json => Questionnaire::from_json(&source.contents),
        InputFormat::Yaml => Questionnaire::from_yaml(&source.contents),
    };
    parsed.map_err(ValidationError::from)
}

fn parse_document(source: &InputSource) -> Result<Document, ValidationError> {
    match source.format {
        InputFormat::Json => Document::from_json(&source.contents),
        InputFormat::Yaml => Document::from_yaml(&source.contents),
    }
}

fn digest_of<T: Serialize>(value: &T) -> Result<String, AssayError> {
    hash_serializable(value).map_err(|e| {
        IntegrityError::Storage {
            what: "phase output".to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn level_output(nodes: Vec<AggregationNode>) -> PhaseResult<Vec<AggregationNode>> {
    let pairs: Vec<_> = nodes.iter().map(|n| json!([n.node_id, n.node_hash])).collect();
    let items = nodes.len();
    Ok(PhaseOutput::new(nodes, hash_json(&json!(pairs)), items))
}

/// Builder for [`PipelineOrchestrator`].
pub struct PipelineOrchestratorBuilder {
    config: RuntimeConfig,
    table: Option<MethodTable>,
    artifacts_dir: Option<PathBuf>,
    abort: Option<AbortSignal>,
    correlation_id: Option<String>,
}

impl PipelineOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            table: None,
            artifacts_dir: None,
            abort: None,
            correlation_id: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Method table; defaults to the built-in pattern methods.
    pub fn methods(mut self, table: MethodTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn build(self) -> Result<PipelineOrchestrator, RuntimeError> {
        let artifacts_dir = self
            .artifacts_dir
            .ok_or(RuntimeError::NotConfigured("artifacts_dir"))?;

        Ok(PipelineOrchestrator {
            config: self.config,
            table: Arc::new(self.table.unwrap_or_else(MethodTable::builtin)),
            artifacts_dir,
            abort: self.abort.unwrap_or_default(),
            correlation_id: self.correlation_id,
        })
    }
}

impl Default for PipelineOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::verify_artifacts;
    use crate::methods::{Method, MethodContext, MethodError};
    use assay_core::{ErrorKind, RunStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    const QUESTIONNAIRE: &str = r#"
questionnaire_version: "1.0"
schema_version: "2026-01-15"
name: "Orchestrator"
dimensions: [{id: DIM01}, {id: DIM02}]
policy_areas:
  - {id: PA01, cluster_id: CL01}
  - {id: PA02, cluster_id: CL02}
clusters: [{id: CL01}, {id: CL02}]
questions:
  - {question_id: Q001, question_global: 1, policy_area_id: PA01, dimension_id: DIM01, methods: [pattern_presence], patterns: [baseline]}
  - {question_id: Q002, question_global: 2, policy_area_id: PA01, dimension_id: DIM02, methods: [pattern_presence], patterns: [target]}
  - {question_id: Q003, question_global: 3, policy_area_id: PA02, dimension_id: DIM01, methods: [pattern_presence], patterns: [budget]}
  - {question_id: Q004, question_global: 4, policy_area_id: PA02, dimension_id: DIM02, methods: [pattern_presence], patterns: [indicator]}
"#;

    const DOCUMENT: &str = r#"
document_id: plan
chunks:
  - {chunk_id: c1, policy_area_id: PA01, dimension_id: DIM01, text: "The baseline is 2019."}
  - {chunk_id: c2, policy_area_id: PA01, dimension_id: DIM02, text: "No goals yet."}
  - {chunk_id: c3, policy_area_id: PA02, dimension_id: DIM01, text: "Budget allocated."}
  - {chunk_id: c4, policy_area_id: PA02, dimension_id: DIM02, text: "Each indicator is tracked."}
"#;

    fn inputs() -> PipelineInputs {
        PipelineInputs::new(
            InputSource::new("questionnaire", InputFormat::Yaml, QUESTIONNAIRE),
            InputSource::new("plan", InputFormat::Yaml, DOCUMENT),
        )
    }

    fn orchestrator(dir: &Path, config: RuntimeConfig) -> PipelineOrchestrator {
        PipelineOrchestrator::builder()
            .config(config)
            .artifacts_dir(dir)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_artifacts_dir() {
        assert!(matches!(
            PipelineOrchestrator::builder().build(),
            Err(RuntimeError::NotConfigured("artifacts_dir"))
        ));
    }

    #[test]
    fn test_input_format_from_extension() {
        assert_eq!(InputFormat::from_path(Path::new("q.JSON")), InputFormat::Json);
        assert_eq!(InputFormat::from_path(Path::new("q.yaml")), InputFormat::Yaml);
        assert_eq!(InputFormat::from_path(Path::new("q")), InputFormat::Yaml);
    }

    #[tokio::test]
    async fn test_small_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = orchestrator(dir.path(), RuntimeConfig::default()).run(inputs()).await;

        let RunOutcome::Completed { manifest, report, manifest_path } = outcome else {
            panic!("run did not complete");
        };
        assert!(manifest_path.exists());
        assert_eq!(manifest.status, RunStatus::Completed);
        assert_eq!(manifest.completed_phases(), Phase::ALL.to_vec());
        assert_eq!(report.rollup.clusters.len(), 2);
        assert_eq!(report.rollup.macro_node.member_ids.len(), 2);
        assert!(report.degraded_tasks.is_empty());
        assert!(report.uncovered_tasks.is_empty());
        // Two clusters plus the macro node.
        assert_eq!(report.certificates.len(), 3);
        assert!(!manifest.seeds.is_empty());
        manifest.verify().unwrap();
    }

    #[tokio::test]
    async fn test_pinned_digest_mismatch_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.pinned_inputs.insert("document".into(), "00".repeat(32));

        let outcome = orchestrator(dir.path(), config).run(inputs()).await;
        let RunOutcome::Aborted { phase, error, manifest, .. } = outcome else {
            panic!("run should abort");
        };
        assert_eq!(phase, Phase::Validate);
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(manifest.completed_phases().is_empty());
        assert!(manifest.ledger_chain_hash.is_none());
        manifest.verify().unwrap();
    }

    #[tokio::test]
    async fn test_abort_before_start_seals_at_validate() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), RuntimeConfig::default());
        orchestrator.abort_signal().abort("operator");

        let outcome = orchestrator.run(inputs()).await;
        let RunOutcome::Aborted { phase, error, .. } = outcome else {
            panic!("run should abort");
        };
        assert_eq!(phase, Phase::Validate);
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_malformed_questionnaire_aborts_at_validate() {
        let dir = tempfile::tempdir().unwrap();
        let bad = PipelineInputs::new(
            InputSource::new("questionnaire", InputFormat::Yaml, "name: [unterminated"),
            InputSource::new("plan", InputFormat::Yaml, DOCUMENT),
        );
        let outcome = orchestrator(dir.path(), RuntimeConfig::default()).run(bad).await;
        assert!(!outcome.is_completed());
        assert!(outcome.manifest_path().exists());
        assert_eq!(outcome.manifest().abort.as_ref().unwrap().phase, Phase::Validate);
    }

    /// Stands in for `pattern_presence` and takes a while.
    struct SlowPresence;

    #[async_trait]
    impl Method for SlowPresence {
        fn name(&self) -> &str {
            "pattern_presence"
        }
        async fn invoke(&self, _: &MethodContext<'_>) -> Result<Value, MethodError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!({"score": 2.0}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_timeout_aborts_after_draining() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default().with_workers(1);
        config.phase_timeouts.dispatch = Duration::from_millis(50);
        let orchestrator = PipelineOrchestrator::builder()
            .config(config)
            .methods(MethodTable::new().with(SlowPresence))
            .artifacts_dir(dir.path())
            .build()
            .unwrap();

        let outcome = orchestrator.run(inputs()).await;
        let RunOutcome::Aborted { phase, error, manifest, .. } = outcome else {
            panic!("run should abort");
        };
        assert_eq!(phase, Phase::Dispatch);
        assert_eq!(error.kind(), ErrorKind::PhaseTimeout);
        assert_eq!(FallbackPolicy::decide(&error), Fallback::Abort);
        assert!(orchestrator.abort_signal().is_aborted());

        let abort = manifest.abort.as_ref().unwrap();
        assert_eq!(abort.phase, Phase::Dispatch);
        assert_eq!(abort.kind, ErrorKind::PhaseTimeout);
        assert_eq!(manifest.completed_phases(), vec![Phase::Validate, Phase::Ingest, Phase::Plan]);

        // The task running when the budget expired still committed.
        let verification = verify_artifacts(dir.path()).unwrap();
        assert_eq!(verification.ledger_records, 1);
        let ledger = EvidenceLedger::load(dir.path().join(crate::export::LEDGER_FILE)).unwrap();
        assert!(ledger.get_by_task("MQC-001_PA01").is_some());
    }

    #[test]
    fn test_changed_input_file_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questionnaire.yaml");
        std::fs::write(&path, QUESTIONNAIRE).unwrap();

        let source = InputSource::from_path(&path).unwrap();
        assert_eq!(source.path.as_deref(), Some(path.as_path()));
        let snapshot = InputSnapshot::freeze([("questionnaire", source.contents.as_bytes())]);
        source.verify_unchanged("questionnaire", &snapshot).unwrap();

        std::fs::write(&path, QUESTIONNAIRE.replace("Orchestrator", "Edited")).unwrap();
        let err = source.verify_unchanged("questionnaire", &snapshot).unwrap_err();
        assert!(matches!(err, ValidationError::SnapshotMismatch { ref input, .. } if input == "questionnaire"));

        let in_memory = InputSource::new("questionnaire", InputFormat::Yaml, "edited");
        in_memory.verify_unchanged("questionnaire", &snapshot).unwrap();
    }

    #[test]
    fn test_config_recorded_in_context() {
        let config = RuntimeConfig::default().with_workers(3);
        let value = config_value(&config).unwrap();
        assert_eq!(value["workers"], json!(3));
        assert!(value.get("phase_timeouts").is_some());
    }
}
