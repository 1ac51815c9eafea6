//! Determinism contracts enforced at component boundaries.
//!
//! Each contract is independently testable:
//!
//! - [`snapshot`]: inputs must match digests frozen at run start
//! - [`context`]: the run context cannot change after construction
//! - [`invariants`]: permutation invariance, monotone compliance, lineage,
//!   traceability
//! - [`certificate`]: confidence intervals with a stated coverage target

pub mod certificate;
pub mod context;
pub mod invariants;
pub mod snapshot;

pub use certificate::{bootstrap_mean, empirical_coverage, CertificateSettings, RiskCertificate};
pub use context::{RunContext, RunContextBuilder};
pub use invariants::{
    check_lineage, check_monotone_subset, check_monotonicity, check_permutation_invariance,
    check_traceability,
};
pub use snapshot::InputSnapshot;
