//! Error taxonomy.
//!
//! Every failure the core can raise belongs to exactly one [`ErrorKind`].
//! The kind, not the concrete variant, decides what happens next: see
//! [`crate::fallback::FallbackPolicy`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used by the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape; refuse before running.
    Validation,
    /// Task or id construction failure; abort planning.
    Construction,
    /// One analytic method failed; degrade that task only.
    MethodExecution,
    /// One task exceeded its time budget.
    ExecutionTimeout,
    /// A whole phase exceeded its time budget.
    PhaseTimeout,
    /// Chain or digest mismatch; never recoverable locally.
    Integrity,
    /// Aggregation invariant check failed.
    Invariant,
    /// A bound method is absent from the capability table.
    MissingMethod,
    /// A planned task has no committed evidence after dispatch.
    MissingEvidence,
    /// Cooperative abort was requested.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Construction => "construction",
            ErrorKind::MethodExecution => "method_execution",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::PhaseTimeout => "phase_timeout",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Invariant => "invariant",
            ErrorKind::MissingMethod => "missing_method",
            ErrorKind::MissingEvidence => "missing_evidence",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input shape errors, raised before any work is scheduled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("schema validation failed: {}", errors.join("; "))]
    Schema { errors: Vec<String> },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("{referenced_by} references unknown {kind} '{id}'")]
    UnknownReference {
        kind: &'static str,
        id: String,
        referenced_by: String,
    },

    #[error("malformed {kind} id: '{id}'")]
    InvalidIdentifier { kind: &'static str, id: String },

    #[error("failed to parse {source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("{what} is empty")]
    EmptyInput { what: String },

    #[error("input '{input}' does not match its frozen digest (expected {expected}, found {actual})")]
    SnapshotMismatch {
        input: String,
        expected: String,
        actual: String,
    },
}

/// Task construction errors. Any one of these aborts planning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("task construction failure for {question_id}: question_global missing")]
    MissingQuestionGlobal { question_id: String },

    #[error("task construction failure for {question_id}: question_global must be an integer in 0..=999, got {value}")]
    InvalidQuestionGlobal { question_id: String, value: String },

    #[error("duplicate task id {task_id} (question {question_id})")]
    DuplicateTaskId { task_id: String, question_id: String },

    #[error("chunk routing for {question_id} produced no (policy_area, chunk) pair")]
    EmptyRouting { question_id: String },

    #[error("task construction failure for {question_id}: {field} cannot be empty")]
    EmptyField { question_id: String, field: &'static str },

    #[error("planned {actual} tasks, questionnaire requires {expected}")]
    CountMismatch { expected: usize, actual: usize },
}

impl ConstructionError {
    /// The question the failure is attributed to, if any.
    pub fn question_id(&self) -> Option<&str> {
        match self {
            ConstructionError::MissingQuestionGlobal { question_id }
            | ConstructionError::InvalidQuestionGlobal { question_id, .. }
            | ConstructionError::DuplicateTaskId { question_id, .. }
            | ConstructionError::EmptyRouting { question_id }
            | ConstructionError::EmptyField { question_id, .. } => Some(question_id),
            ConstructionError::CountMismatch { .. } => None,
        }
    }
}

/// A single method failure, attached to the degraded evidence it produced.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("method '{method}' failed on {task_id}: {message}")]
pub struct MethodExecutionError {
    pub method: String,
    pub task_id: String,
    pub message: String,
}

/// Chain, digest and tamper detection failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("content hash mismatch for {evidence_id}: recorded {recorded}, recomputed {recomputed}")]
    ContentHashMismatch {
        evidence_id: String,
        recorded: String,
        recomputed: String,
    },

    #[error("broken chain at index {index}: previous_hash {found}, expected {expected}")]
    BrokenChain {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("conflicting evidence for {task_id}: ledger holds {existing}, got {incoming}")]
    ConflictingEvidence {
        task_id: String,
        existing: String,
        incoming: String,
    },

    #[error("ledger chain hash {recomputed} does not match sealed digest {sealed}")]
    ChainHashMismatch { sealed: String, recomputed: String },

    #[error("node {node_id} hash {recorded} does not match recomputed {recomputed}")]
    NodeHashMismatch {
        node_id: String,
        recorded: String,
        recomputed: String,
    },

    #[error("manifest integrity hash {recomputed} does not match recorded {recorded}")]
    ManifestDigestMismatch { recorded: String, recomputed: String },

    #[error("manifest is sealed; no further entries may be appended")]
    ManifestSealed,

    #[error("run context digest {actual} does not match frozen digest {expected}")]
    ContextTampered { expected: String, actual: String },

    #[error("failed to persist or load {what}: {message}")]
    Storage { what: String, message: String },
}

/// Aggregation invariant failures. These abort the aggregation level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("member {member_id} appears more than once in {level} input")]
    DuplicateMember { level: String, member_id: String },

    #[error("member {member_id} lacks grouping key '{key}' required at {level}")]
    MissingGroupingKey {
        level: String,
        member_id: String,
        key: String,
    },

    #[error("hermeticity breach at {level}: member {member_id} assigned to both {first} and {second}")]
    HermeticityBreach {
        level: String,
        member_id: String,
        first: String,
        second: String,
    },

    #[error("{level} output changed under input permutation ({detail})")]
    PermutationSensitive { level: String, detail: String },

    #[error("monotonicity breach at {node_id}: {detail}")]
    MonotonicityBreach { node_id: String, detail: String },

    #[error("coverage {coverage:.3} for {node_id} is below minimum {minimum:.3}")]
    CoverageBelowMinimum {
        node_id: String,
        coverage: f64,
        minimum: f64,
    },

    #[error("{level} received no children")]
    EmptyLevel { level: String },

    #[error("member {member_id} does not resolve to committed evidence")]
    Untraceable { member_id: String },
}

/// Root error type for everything the core and runtime can surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssayError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("construction error: {0}")]
    Construction(#[from] ConstructionError),

    #[error("method execution error: {0}")]
    MethodExecution(#[from] MethodExecutionError),

    #[error("missing method '{method}' for {task_id}")]
    MissingMethod { method: String, task_id: String },

    #[error("execution timeout: {scope} exceeded {limit_ms}ms")]
    ExecutionTimeout { scope: String, limit_ms: u64 },

    #[error("phase timeout: {phase} exceeded {limit_ms}ms")]
    PhaseTimeout { phase: String, limit_ms: u64 },

    #[error("no committed evidence for {task_id}")]
    MissingEvidence { task_id: String },

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("run cancelled: {reason}")]
    Cancelled { reason: String },
}

impl AssayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssayError::Validation(_) => ErrorKind::Validation,
            AssayError::Construction(_) => ErrorKind::Construction,
            AssayError::MethodExecution(_) => ErrorKind::MethodExecution,
            AssayError::MissingMethod { .. } => ErrorKind::MissingMethod,
            AssayError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            AssayError::PhaseTimeout { .. } => ErrorKind::PhaseTimeout,
            AssayError::MissingEvidence { .. } => ErrorKind::MissingEvidence,
            AssayError::Integrity(_) => ErrorKind::Integrity,
            AssayError::Invariant(_) => ErrorKind::Invariant,
            AssayError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

pub type AssayResult<T> = Result<T, AssayError>;
