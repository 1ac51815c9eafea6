//! # assay-runtime
//!
//! Async execution for Assay: method dispatch, the single-writer ledger, the
//! bounded worker pool and the eleven-phase pipeline orchestrator.
//!
//! Everything deterministic lives in `assay-core`. This crate only decides
//! *when* things run; what they compute, and how results are identified and
//! combined, is fixed by the core.
//!
//! ## Example
//!
//! ```rust,ignore
//! use assay_runtime::{PipelineInputs, PipelineOrchestrator, RuntimeConfig};
//!
//! let orchestrator = PipelineOrchestrator::builder()
//!     .config(RuntimeConfig::from_file("assay.yaml")?)
//!     .artifacts_dir("out/run-1")
//!     .build()?;
//!
//! let inputs = PipelineInputs::from_paths("questionnaire.yaml", "document.json")?;
//! let outcome = orchestrator.run(inputs).await;
//! println!("{}", outcome.manifest_path().display());
//! ```

pub mod abort;
pub mod config;
pub mod dispatch;
pub mod export;
pub mod ledger_writer;
pub mod methods;
pub mod orchestrator;
pub mod pool;

pub use abort::AbortSignal;
pub use config::{PhaseTimeouts, RuntimeConfig, ScoringConfig};
pub use dispatch::Dispatcher;
pub use export::{verify_artifacts, ArtifactPaths, RunReport, Verification};
pub use ledger_writer::{LedgerHandle, LedgerWriter};
pub use methods::{Method, MethodContext, MethodError, MethodTable};
pub use orchestrator::{
    InputFormat, InputSource, PipelineInputs, PipelineOrchestrator, PipelineOrchestratorBuilder,
    RunOutcome,
};
pub use pool::{PoolReport, PoolStopped, WorkerPool};

use thiserror::Error;

/// Errors from setting up the runtime. Failures during a run are reported
/// through [`RunOutcome`] instead.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("orchestrator not configured: {0} is required")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Assay(#[from] assay_core::AssayError),
}
