//! Fixed mapping from error kind to fallback behavior.
//!
//! Every failure decision in the pipeline goes through
//! [`FallbackPolicy::fallback_for`]: dispatch consults it per method failure,
//! scoring per uncovered task, and the orchestrator at every phase boundary.

use serde::{Deserialize, Serialize};

use crate::error::{AssayError, ErrorKind};

/// What happens after a typed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Record a degraded placeholder for the affected task and continue.
    Degrade,

    /// Skip the affected item, flag it, and continue.
    SkipWithFlag,

    /// Seal the manifest with the failure and stop the run.
    Abort,
}

/// The fallback table. Not configurable.
#[derive(Debug, Clone, Copy)]
pub struct FallbackPolicy;

impl FallbackPolicy {
    /// Exactly one fallback per error kind.
    pub const fn fallback_for(kind: ErrorKind) -> Fallback {
        match kind {
            ErrorKind::MethodExecution | ErrorKind::ExecutionTimeout | ErrorKind::MissingMethod => {
                Fallback::Degrade
            }
            ErrorKind::MissingEvidence => Fallback::SkipWithFlag,
            ErrorKind::Validation
            | ErrorKind::Construction
            | ErrorKind::PhaseTimeout
            | ErrorKind::Integrity
            | ErrorKind::Invariant
            | ErrorKind::Cancelled => Fallback::Abort,
        }
    }

    /// Shorthand for `fallback_for(err.kind())`.
    pub fn decide(err: &AssayError) -> Fallback {
        Self::fallback_for(err.kind())
    }

    /// The full table, in a stable order.
    pub fn table() -> Vec<(ErrorKind, Fallback)> {
        [
            ErrorKind::Validation,
            ErrorKind::Construction,
            ErrorKind::MethodExecution,
            ErrorKind::ExecutionTimeout,
            ErrorKind::PhaseTimeout,
            ErrorKind::Integrity,
            ErrorKind::Invariant,
            ErrorKind::MissingMethod,
            ErrorKind::MissingEvidence,
            ErrorKind::Cancelled,
        ]
        .into_iter()
        .map(|kind| (kind, Self::fallback_for(kind)))
        .collect()
    }
}
