//! The four-level rollup used by the pipeline.
//!
//! Dimension nodes group leaves by `(policy_area_id, dimension_id)`, policy
//! area nodes group dimensions by `policy_area_id`, clusters group policy
//! areas by `cluster_id`, and the macro node takes everything.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregation::{node_id, Expectations, Level, LevelSpec, Reducer};
use crate::questionnaire::Questionnaire;

pub const ATTR_QUESTION: &str = "question_id";
pub const ATTR_POLICY_AREA: &str = "policy_area_id";
pub const ATTR_DIMENSION: &str = "dimension_id";
pub const ATTR_CLUSTER: &str = "cluster_id";

/// Per-level knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelSettings {
    pub reducer: Reducer,
    pub quorum: f64,
    pub min_coverage: f64,
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            reducer: Reducer::Mean,
            quorum: 0.5,
            min_coverage: 0.0,
        }
    }
}

/// Aggregation configuration for all four levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub dimension: LevelSettings,
    pub policy_area: LevelSettings,
    pub cluster: LevelSettings,
    #[serde(rename = "macro")]
    pub macro_level: LevelSettings,
}

impl AggregationSettings {
    pub fn settings(&self, level: Level) -> &LevelSettings {
        match level {
            Level::Dimension => &self.dimension,
            Level::PolicyArea => &self.policy_area,
            Level::Cluster => &self.cluster,
            Level::Macro => &self.macro_level,
        }
    }

    /// Level spec with the standard grouping keys.
    pub fn level_spec(&self, level: Level) -> LevelSpec {
        let settings = self.settings(level);
        LevelSpec::new(level, group_keys(level))
            .with_reducer(settings.reducer)
            .with_quorum(settings.quorum)
            .with_min_coverage(settings.min_coverage)
    }
}

/// Grouping keys of the standard hierarchy.
pub fn group_keys(level: Level) -> &'static [&'static str] {
    match level {
        Level::Dimension => &[ATTR_POLICY_AREA, ATTR_DIMENSION],
        Level::PolicyArea => &[ATTR_POLICY_AREA],
        Level::Cluster => &[ATTR_CLUSTER],
        Level::Macro => &[],
    }
}

/// Expected member counts for every node the questionnaire implies.
pub fn expectations(questionnaire: &Questionnaire, level: Level) -> Expectations {
    let cells = questionnaire.questions_per_cell();
    let mut out = Expectations::new();

    match level {
        Level::Dimension => {
            for ((pa, dim), count) in &cells {
                out.insert(node_id(level, &[pa.as_str(), dim.as_str()]), *count);
            }
        }
        Level::PolicyArea => {
            for (pa, _) in cells.keys() {
                *out.entry(node_id(level, &[pa.as_str()])).or_insert(0) += 1;
            }
        }
        Level::Cluster => {
            let areas: BTreeSet<&str> = cells.keys().map(|(pa, _)| pa.as_str()).collect();
            for pa in areas {
                if let Some(cluster) = questionnaire.cluster_of(pa) {
                    *out.entry(node_id(level, &[cluster])).or_insert(0) += 1;
                }
            }
        }
        Level::Macro => {
            let clusters: BTreeSet<&str> = cells
                .keys()
                .filter_map(|(pa, _)| questionnaire.cluster_of(pa))
                .collect();
            out.insert(node_id(level, &[]), clusters.len());
        }
    }
    out
}

/// Expectations for all levels at once.
pub fn all_expectations(questionnaire: &Questionnaire) -> BTreeMap<Level, Expectations> {
    Level::ALL
        .iter()
        .map(|level| (*level, expectations(questionnaire, *level)))
        .collect()
}
