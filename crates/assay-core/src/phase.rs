//! Pipeline phases, in execution order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Ingest,
    Plan,
    Dispatch,
    Score,
    AggregateDimension,
    AggregatePolicyArea,
    AggregateCluster,
    Macro,
    Recommend,
    Export,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Validate,
        Phase::Ingest,
        Phase::Plan,
        Phase::Dispatch,
        Phase::Score,
        Phase::AggregateDimension,
        Phase::AggregatePolicyArea,
        Phase::AggregateCluster,
        Phase::Macro,
        Phase::Recommend,
        Phase::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validate => "validate",
            Phase::Ingest => "ingest",
            Phase::Plan => "plan",
            Phase::Dispatch => "dispatch",
            Phase::Score => "score",
            Phase::AggregateDimension => "aggregate_dimension",
            Phase::AggregatePolicyArea => "aggregate_policy_area",
            Phase::AggregateCluster => "aggregate_cluster",
            Phase::Macro => "macro",
            Phase::Recommend => "recommend",
            Phase::Export => "export",
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
