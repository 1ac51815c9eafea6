//! Turning committed evidence into aggregation leaves.

use std::collections::BTreeMap;

use crate::aggregation::{Leaf, QualityLevel, Rubric};
use crate::hierarchy::{ATTR_CLUSTER, ATTR_DIMENSION, ATTR_POLICY_AREA, ATTR_QUESTION};
use crate::ledger::EvidenceLedger;
use crate::questionnaire::Questionnaire;
use crate::task::ExecutableTask;

/// Signal key carrying an optional leaf weight.
pub const WEIGHT_SIGNAL: &str = "weight";

/// One leaf per task that has committed evidence, ordered by task id.
///
/// A leaf is satisfied when its score reaches the rubric's acceptable band.
/// Tasks without evidence produce no leaf and show up as lost coverage.
pub fn score_evidence(
    ledger: &EvidenceLedger,
    tasks: &[ExecutableTask],
    questionnaire: &Questionnaire,
    rubric: &Rubric,
) -> Vec<Leaf> {
    let mut leaves: Vec<Leaf> = tasks
        .iter()
        .filter_map(|task| {
            let evidence = ledger.get_by_task(&task.task_id)?;
            let score = evidence.score();

            let mut attributes = BTreeMap::new();
            attributes.insert(ATTR_QUESTION.to_string(), task.question_id.clone());
            attributes.insert(ATTR_POLICY_AREA.to_string(), task.policy_area_id.clone());
            attributes.insert(ATTR_DIMENSION.to_string(), task.dimension_id.clone());
            if let Some(cluster) = questionnaire.cluster_of(&task.policy_area_id) {
                attributes.insert(ATTR_CLUSTER.to_string(), cluster.to_string());
            }

            let weight = task
                .signals
                .get(WEIGHT_SIGNAL)
                .and_then(serde_json::Value::as_f64)
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(1.0);

            Some(Leaf {
                member_id: evidence.evidence_id.clone(),
                score,
                weight,
                satisfied: rubric.band(score) >= QualityLevel::Acceptable,
                attributes,
                digest: evidence.content_hash.clone(),
            })
        })
        .collect();

    leaves.sort_by(|a, b| a.member_id.cmp(&b.member_id));
    leaves
}
