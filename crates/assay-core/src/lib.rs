//! # assay-core
//!
//! Deterministic task orchestration, evidence ledger and hierarchical
//! aggregation for questionnaire-driven document assessment.
//!
//! This crate answers three questions for every run:
//! - What work must be done? (planner)
//! - What exactly happened? (evidence ledger)
//! - What does it add up to? (aggregation engine)
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same questionnaire and document, same task ids,
//!    same evidence ids, same node hashes
//! 2. **Idempotent**: re-appending identical evidence is a no-op
//! 3. **Order-independent**: aggregation output does not depend on input
//!    order or worker count
//! 4. **Traceable**: every node hash folds in its members' digests, down to
//!    ledger content hashes
//!
//! ## Example
//!
//! ```rust,ignore
//! use assay_core::{plan, Questionnaire, Document};
//!
//! let questionnaire = Questionnaire::from_file("questionnaire.yaml")?;
//! let document = Document::from_file("document.json")?;
//! let tasks = plan(&questionnaire, &document)?;
//! ```
//!
//! Method execution is async and lives in `assay-runtime`.

pub mod aggregation;
pub mod assembler;
pub mod contracts;
pub mod digest;
pub mod document;
pub mod error;
pub mod evidence;
pub mod fallback;
pub mod hierarchy;
pub mod ledger;
pub mod manifest;
pub mod phase;
pub mod planner;
pub mod questionnaire;
pub mod recommend;
pub mod score;
pub mod seed;
pub mod task;

// Re-export main types at crate root
pub use aggregation::{
    aggregate, AggregationNode, Aggregand, Expectations, Leaf, Level, LevelSpec, QualityLevel,
    Reducer, Rubric, Verdict,
};
pub use assembler::{EvidenceAssembler, MergeStrategy, MethodOutcome};
pub use document::{ChunkRouter, Document, DocumentChunk};
pub use error::{
    AssayError, AssayResult, ConstructionError, ErrorKind, IntegrityError, InvariantViolation,
    MethodExecutionError, ValidationError,
};
pub use evidence::{Evidence, EvidenceBuilder, EvidenceCandidate};
pub use fallback::{Fallback, FallbackPolicy};
pub use hierarchy::AggregationSettings;
pub use ledger::{AppendOutcome, EvidenceLedger};
pub use manifest::{PipelineManifest, RunStatus};
pub use phase::Phase;
pub use planner::{plan, MethodBindings};
pub use questionnaire::{Questionnaire, QuestionnaireError};
pub use recommend::{Recommendation, RecommendationEngine};
pub use task::ExecutableTask;

use serde::{Deserialize, Serialize};

use aggregation::recompute_node_hash;
use contracts::{check_lineage, check_monotone_subset, check_permutation_invariance};

/// Shuffled re-aggregations per level during the permutation check.
pub const PERMUTATION_ROUNDS: usize = 3;

/// All four levels of one rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub dimensions: Vec<AggregationNode>,
    pub policy_areas: Vec<AggregationNode>,
    pub clusters: Vec<AggregationNode>,
    pub macro_node: AggregationNode,
}

impl Rollup {
    pub fn macro_hash(&self) -> &str {
        &self.macro_node.node_hash
    }

    /// Recompute every node hash above the dimension level from the digests
    /// of the level below and compare it with the recorded one.
    pub fn verify(&self) -> AssayResult<()> {
        let levels: [(&[AggregationNode], &[AggregationNode]); 3] = [
            (&self.policy_areas, &self.dimensions),
            (&self.clusters, &self.policy_areas),
            (std::slice::from_ref(&self.macro_node), &self.clusters),
        ];
        for (nodes, children) in levels {
            for node in nodes {
                let recomputed = recompute_node_hash(node, children)?;
                if recomputed != node.node_hash {
                    return Err(IntegrityError::NodeHashMismatch {
                        node_id: node.node_id.clone(),
                        recorded: node.node_hash.clone(),
                        recomputed,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Aggregate one level of the rollup and enforce its boundary contracts.
///
/// Levels are chained by passing each call's output as the next call's
/// `children`: leaves into [`Level::Dimension`], then policy area, cluster
/// and macro.
///
/// # Arguments
///
/// * `level` - The level to build.
/// * `children` - The complete output of the level below (or the leaves).
/// * `settings` - Per-level reducer, quorum and coverage floor.
/// * `expectations` - Expected member counts for this level's nodes.
/// * `rubric` - Quality band thresholds.
/// * `seed` - Drives the permutation shuffles and the monotonicity subset.
///
/// # Returns
///
/// The level's nodes, sorted by node id.
///
/// # Errors
///
/// Any [`InvariantViolation`]: the aggregation itself failed, the output
/// changed under a shuffle, a child is not claimed by exactly one node, or a
/// subset of the children reached a verdict the full set lost.
pub fn roll_up_level<C: Aggregand + Clone>(
    level: Level,
    children: &[C],
    settings: &AggregationSettings,
    expectations: &Expectations,
    rubric: &Rubric,
    seed: u64,
) -> Result<Vec<AggregationNode>, InvariantViolation> {
    let spec = settings.level_spec(level);
    let nodes = check_permutation_invariance(&spec, children, expectations, rubric, seed, PERMUTATION_ROUNDS)?;
    check_lineage(children, &nodes)?;
    check_monotone_subset(&spec, children, &nodes, rubric, seed.wrapping_add(1))?;
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::all_expectations;
    use crate::score::score_evidence;
    use serde_json::json;

    const QUESTIONNAIRE: &str = r#"
questionnaire_version: "1.0"
schema_version: "2026-01-15"
name: "Rollup"
dimensions: [{id: DIM01}, {id: DIM02}]
policy_areas:
  - {id: PA01, cluster_id: CL01}
  - {id: PA02, cluster_id: CL02}
clusters: [{id: CL01}, {id: CL02}]
questions:
  - {question_id: Q001, question_global: 1, policy_area_id: PA01, dimension_id: DIM01, methods: [m]}
  - {question_id: Q002, question_global: 2, policy_area_id: PA01, dimension_id: DIM02, methods: [m]}
  - {question_id: Q003, question_global: 3, policy_area_id: PA02, dimension_id: DIM01, methods: [m]}
  - {question_id: Q004, question_global: 4, policy_area_id: PA02, dimension_id: DIM02, methods: [m]}
"#;

    fn document() -> Document {
        let chunks = [("PA01", "DIM01"), ("PA01", "DIM02"), ("PA02", "DIM01"), ("PA02", "DIM02")]
            .iter()
            .enumerate()
            .map(|(i, (pa, dim))| DocumentChunk {
                chunk_id: format!("chunk-{i}"),
                policy_area_id: pa.to_string(),
                dimension_id: dim.to_string(),
                text: String::new(),
                position: i as u32,
            })
            .collect();
        Document {
            document_id: "doc".into(),
            chunks,
        }
    }

    #[test]
    fn test_end_to_end_rollup() {
        let questionnaire = Questionnaire::from_yaml(QUESTIONNAIRE).unwrap();
        let tasks = plan(&questionnaire, &document()).unwrap();
        assert_eq!(tasks.len(), 4);

        let mut ledger = EvidenceLedger::new();
        for (task, score) in tasks.iter().zip([3.0, 2.0, 1.0, 0.0]) {
            ledger
                .append(
                    EvidenceBuilder::new(&task.task_id, "doc")
                        .payload(json!({"score": score, "degraded": false}))
                        .build(),
                )
                .unwrap();
        }

        let rubric = Rubric::default();
        let settings = AggregationSettings::default();
        let expectations = all_expectations(&questionnaire);
        let leaves = score_evidence(&ledger, &tasks, &questionnaire, &rubric);

        let dimensions =
            roll_up_level(Level::Dimension, &leaves, &settings, &expectations[&Level::Dimension], &rubric, 1).unwrap();
        let policy_areas =
            roll_up_level(Level::PolicyArea, &dimensions, &settings, &expectations[&Level::PolicyArea], &rubric, 2)
                .unwrap();
        let clusters =
            roll_up_level(Level::Cluster, &policy_areas, &settings, &expectations[&Level::Cluster], &rubric, 3).unwrap();
        let macro_node = roll_up_level(Level::Macro, &clusters, &settings, &expectations[&Level::Macro], &rubric, 4)
            .unwrap()
            .remove(0);
        let rollup = Rollup {
            dimensions,
            policy_areas,
            clusters,
            macro_node,
        };

        assert_eq!(rollup.dimensions.len(), 4);
        assert_eq!(rollup.policy_areas.len(), 2);
        assert_eq!(rollup.clusters.len(), 2);
        assert_eq!(rollup.macro_node.node_id, "MACRO");
        assert_eq!(rollup.macro_node.member_ids.len(), 2);
        assert_eq!(rollup.macro_node.score, Some(1.5));
        assert_eq!(rollup.policy_areas[0].score, Some(2.5));
        assert_eq!(rollup.policy_areas[0].attributes["cluster_id"], "CL01");
        rollup.verify().unwrap();
    }

    #[test]
    fn test_rollup_verify_detects_edited_cluster() {
        let questionnaire = Questionnaire::from_yaml(QUESTIONNAIRE).unwrap();
        let tasks = plan(&questionnaire, &document()).unwrap();
        let mut ledger = EvidenceLedger::new();
        for task in &tasks {
            ledger
                .append(
                    EvidenceBuilder::new(&task.task_id, "doc")
                        .payload(json!({"score": 2.0, "degraded": false}))
                        .build(),
                )
                .unwrap();
        }
        let rubric = Rubric::default();
        let settings = AggregationSettings::default();
        let expectations = all_expectations(&questionnaire);
        let leaves = score_evidence(&ledger, &tasks, &questionnaire, &rubric);
        let level = |level: Level, children: &[AggregationNode]| {
            roll_up_level(level, children, &settings, &expectations[&level], &rubric, 7).unwrap()
        };

        let dimensions =
            roll_up_level(Level::Dimension, &leaves, &settings, &expectations[&Level::Dimension], &rubric, 7).unwrap();
        let policy_areas = level(Level::PolicyArea, &dimensions);
        let clusters = level(Level::Cluster, &policy_areas);
        let macro_node = level(Level::Macro, &clusters).remove(0);
        let mut rollup = Rollup {
            dimensions,
            policy_areas,
            clusters,
            macro_node,
        };
        rollup.verify().unwrap();

        rollup.clusters[0].score = Some(0.0);
        let err = rollup.verify().unwrap_err();
        assert!(matches!(
            err,
            AssayError::Integrity(IntegrityError::NodeHashMismatch { ref node_id, .. }) if node_id == "CL:CL01"
        ));
    }
}
