//! Hierarchical aggregation.
//!
//! One generic [`aggregate`] function serves every level. What a level groups
//! by, how it reduces and what coverage it demands all come from a
//! [`LevelSpec`]; nothing here knows which attribute defines a dimension or a
//! cluster.

mod engine;
mod reducer;
mod rubric;

pub use engine::{aggregate, aggregate_with, node_id, recompute_node_hash, Expectations};
pub use reducer::{compensated_sum, Reducer, Reduction};
pub use rubric::{QualityLevel, Rubric, SCORE_MAX};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Hierarchy level of an [`AggregationNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Dimension,
    PolicyArea,
    Cluster,
    Macro,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Dimension, Level::PolicyArea, Level::Cluster, Level::Macro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Dimension => "dimension",
            Level::PolicyArea => "policy_area",
            Level::Cluster => "cluster",
            Level::Macro => "macro",
        }
    }

    /// Prefix used in node ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            Level::Dimension => "DIM",
            Level::PolicyArea => "PA",
            Level::Cluster => "CL",
            Level::Macro => "MACRO",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compliance judgment of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Sat,
    Unsat,
}

/// Configuration for one aggregation level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub level: Level,
    /// Attribute keys children are partitioned by. Empty means one node.
    pub group_by: Vec<String>,
    #[serde(default)]
    pub reducer: Reducer,
    /// Fraction of expected members that must be satisfied for `SAT`.
    #[serde(default = "default_quorum")]
    pub quorum: f64,
    /// Minimum scored/expected ratio; below it the level aborts.
    #[serde(default)]
    pub min_coverage: f64,
}

fn default_quorum() -> f64 {
    0.5
}

impl LevelSpec {
    pub fn new(level: Level, group_by: &[&str]) -> Self {
        Self {
            level,
            group_by: group_by.iter().map(|k| k.to_string()).collect(),
            reducer: Reducer::default(),
            quorum: default_quorum(),
            min_coverage: 0.0,
        }
    }

    pub fn with_reducer(mut self, reducer: Reducer) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn with_quorum(mut self, quorum: f64) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_min_coverage(mut self, min_coverage: f64) -> Self {
        self.min_coverage = min_coverage;
        self
    }
}

/// Anything the engine can group and reduce.
pub trait Aggregand {
    fn member_id(&self) -> &str;
    fn score(&self) -> Option<f64>;
    fn weight(&self) -> f64 {
        1.0
    }
    fn satisfied(&self) -> bool;
    fn attributes(&self) -> &BTreeMap<String, String>;
    /// Content digest folded into the parent's node hash.
    fn digest(&self) -> &str;
}

/// A scored entity at one hierarchy level. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationNode {
    pub node_id: String,
    pub level: Level,
    pub member_ids: BTreeSet<String>,
    pub score: Option<f64>,
    pub coverage: f64,
    pub expected_members: usize,
    pub satisfied_members: usize,
    pub verdict: Verdict,
    pub quality: QualityLevel,
    /// Attributes shared by every member, inherited upward.
    pub attributes: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub node_hash: String,
}

impl Aggregand for AggregationNode {
    fn member_id(&self) -> &str {
        &self.node_id
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn weight(&self) -> f64 {
        self.member_ids.len() as f64
    }

    fn satisfied(&self) -> bool {
        self.verdict == Verdict::Sat
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn digest(&self) -> &str {
        &self.node_hash
    }
}

/// One evaluated leaf with its grouping attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub member_id: String,
    pub score: Option<f64>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub satisfied: bool,
    pub attributes: BTreeMap<String, String>,
    pub digest: String,
}

fn default_weight() -> f64 {
    1.0
}

impl Aggregand for Leaf {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn satisfied(&self) -> bool {
        self.satisfied
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn digest(&self) -> &str {
        &self.digest
    }
}
