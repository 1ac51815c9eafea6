//! Analytic methods and the capability table they are looked up in.
//!
//! The table is built once before dispatch starts and shared read-only by
//! every worker. A bound method that is absent from the table is a checked
//! condition handled by dispatch, not a lookup failure.

mod builtin;
mod table;
mod traits;

pub use builtin::{ExpectedElements, PatternDensity, PatternPresence};
pub use table::MethodTable;
pub use traits::{Method, MethodContext, MethodError};
