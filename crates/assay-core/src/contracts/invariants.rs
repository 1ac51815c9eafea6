//! Checks for the aggregation contracts: permutation invariance, monotone
//! compliance, and traceability back to the ledger.
//!
//! [`crate::roll_up_level`] runs the permutation, lineage and subset
//! monotonicity checks at every level boundary.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregation::{aggregate, Aggregand, AggregationNode, Expectations, LevelSpec, Rubric, Verdict};
use crate::error::InvariantViolation;
use crate::ledger::EvidenceLedger;

/// Aggregate `children` once as given and again under `rounds` seeded
/// shuffles. Any difference in node ids, scores or hashes is a violation.
///
/// Returns the nodes from the unshuffled input.
pub fn check_permutation_invariance<C: Aggregand + Clone>(
    spec: &LevelSpec,
    children: &[C],
    expectations: &Expectations,
    rubric: &Rubric,
    seed: u64,
    rounds: usize,
) -> Result<Vec<AggregationNode>, InvariantViolation> {
    let baseline = aggregate(spec, children, expectations, rubric)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shuffled = children.to_vec();

    for round in 0..rounds {
        shuffled.shuffle(&mut rng);
        let candidate = aggregate(spec, &shuffled, expectations, rubric)?;
        if let Some(detail) = first_difference(&baseline, &candidate) {
            return Err(InvariantViolation::PermutationSensitive {
                level: spec.level.as_str().to_string(),
                detail: format!("round {round}: {detail}"),
            });
        }
    }
    Ok(baseline)
}

fn first_difference(a: &[AggregationNode], b: &[AggregationNode]) -> Option<String> {
    if a.len() != b.len() {
        return Some(format!("{} nodes vs {}", a.len(), b.len()));
    }
    for (x, y) in a.iter().zip(b) {
        if x.node_id != y.node_id {
            return Some(format!("node {} vs {}", x.node_id, y.node_id));
        }
        if x.score.map(f64::to_bits) != y.score.map(f64::to_bits) {
            return Some(format!("{} score {:?} vs {:?}", x.node_id, x.score, y.score));
        }
        if x.node_hash != y.node_hash {
            return Some(format!("{} hash {} vs {}", x.node_id, x.node_hash, y.node_hash));
        }
    }
    None
}

/// Given nodes from an evidence set and from a superset of it, check that the
/// superset's nodes cover the subset's and that no `SAT` judgment was lost.
pub fn check_monotonicity(
    subset: &[AggregationNode],
    superset: &[AggregationNode],
) -> Result<(), InvariantViolation> {
    let larger: BTreeMap<&str, &AggregationNode> =
        superset.iter().map(|n| (n.node_id.as_str(), n)).collect();

    for node in subset {
        let Some(other) = larger.get(node.node_id.as_str()) else {
            return Err(InvariantViolation::MonotonicityBreach {
                node_id: node.node_id.clone(),
                detail: "node missing from superset aggregation".to_string(),
            });
        };
        if node.verdict == Verdict::Sat && other.verdict != Verdict::Sat {
            return Err(InvariantViolation::MonotonicityBreach {
                node_id: node.node_id.clone(),
                detail: format!(
                    "SAT with {} satisfied members became UNSAT with {}",
                    node.satisfied_members, other.satisfied_members
                ),
            });
        }
        if other.satisfied_members < node.satisfied_members {
            return Err(InvariantViolation::MonotonicityBreach {
                node_id: node.node_id.clone(),
                detail: format!(
                    "satisfied members dropped from {} to {}",
                    node.satisfied_members, other.satisfied_members
                ),
            });
        }
    }
    Ok(())
}

/// Re-aggregate a seeded subset of `children` and check the result against
/// `nodes`, the aggregation of the full set.
///
/// The subset is aggregated against the expected member counts the full
/// nodes were built with, and without a coverage floor, so the only way it
/// can fail is a genuine loss of compliance.
pub fn check_monotone_subset<C: Aggregand + Clone>(
    spec: &LevelSpec,
    children: &[C],
    nodes: &[AggregationNode],
    rubric: &Rubric,
    seed: u64,
) -> Result<(), InvariantViolation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let subset: Vec<C> = children.iter().filter(|_| rng.gen_bool(0.5)).cloned().collect();
    if subset.is_empty() {
        return Ok(());
    }

    let pinned: Expectations = nodes
        .iter()
        .map(|n| (n.node_id.clone(), n.expected_members))
        .collect();
    let relaxed = spec.clone().with_min_coverage(0.0);
    let partial = aggregate(&relaxed, &subset, &pinned, rubric)?;
    check_monotonicity(&partial, nodes)
}

/// Every child must be a member of exactly one node, and every node member
/// must be one of the children.
pub fn check_lineage<C: Aggregand>(
    children: &[C],
    nodes: &[AggregationNode],
) -> Result<(), InvariantViolation> {
    let child_ids: BTreeSet<&str> = children.iter().map(Aggregand::member_id).collect();
    let mut claimed = BTreeSet::new();

    for node in nodes {
        for member in &node.member_ids {
            if !child_ids.contains(member.as_str()) {
                return Err(InvariantViolation::Untraceable {
                    member_id: member.clone(),
                });
            }
            claimed.insert(member.as_str());
        }
    }
    match child_ids.difference(&claimed).next() {
        Some(orphan) => Err(InvariantViolation::Untraceable {
            member_id: orphan.to_string(),
        }),
        None => Ok(()),
    }
}

/// Every leaf member of the dimension level must resolve to ledger evidence
/// whose content hash matches the leaf digest.
pub fn check_traceability<C: Aggregand>(
    leaves: &[C],
    ledger: &EvidenceLedger,
) -> Result<(), InvariantViolation> {
    for leaf in leaves {
        match ledger.get(leaf.member_id()) {
            Some(evidence) if evidence.content_hash == leaf.digest() => {}
            _ => {
                return Err(InvariantViolation::Untraceable {
                    member_id: leaf.member_id().to_string(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Leaf, Level};
    use crate::evidence::EvidenceBuilder;
    use serde_json::json;

    fn leaves(scores: &[f64]) -> Vec<Leaf> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| Leaf {
                member_id: format!("EV-{i:04}"),
                score: Some(*s),
                weight: 1.0,
                satisfied: *s >= 1.65,
                attributes: [("policy_area_id".to_string(), format!("PA0{}", i % 3 + 1))]
                    .into_iter()
                    .collect(),
                digest: format!("d{i}"),
            })
            .collect()
    }

    #[test]
    fn test_permutation_invariance_holds_for_mean() {
        let children = leaves(&[0.1, 0.7, 2.9, 1.3, 0.2, 2.2, 0.3, 1.1, 2.0]);
        let spec = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]);
        let nodes =
            check_permutation_invariance(&spec, &children, &Expectations::new(), &Rubric::default(), 42, 16)
                .unwrap();
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_monotonicity_detects_lost_sat() {
        let spec = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]).with_quorum(1.0);
        let small = aggregate(&spec, &leaves(&[3.0]), &Expectations::new(), &Rubric::default()).unwrap();
        assert_eq!(small[0].verdict, Verdict::Sat);

        let bigger = aggregate(&spec, &leaves(&[3.0, 0.0, 0.0, 0.0]), &Expectations::new(), &Rubric::default())
            .unwrap();
        let err = check_monotonicity(&small, &bigger).unwrap_err();
        assert!(matches!(err, InvariantViolation::MonotonicityBreach { .. }));
    }

    #[test]
    fn test_monotonicity_holds_with_fixed_expectations() {
        let spec = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]).with_quorum(0.5);
        let mut expectations = Expectations::new();
        for pa in ["PA:PA01", "PA:PA02", "PA:PA03"] {
            expectations.insert(pa.to_string(), 2);
        }
        let all = leaves(&[3.0, 3.0, 0.0, 0.0, 3.0, 3.0]);
        let small = aggregate(&spec, &all[..3], &expectations, &Rubric::default()).unwrap();
        let big = aggregate(&spec, &all, &expectations, &Rubric::default()).unwrap();
        check_monotonicity(&small, &big).unwrap();
    }

    #[test]
    fn test_monotone_subset_holds_without_expectations() {
        // Without pinned counts a one-member subset would be SAT on its own.
        let spec = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]).with_quorum(1.0);
        let children = leaves(&[3.0, 0.0, 0.0, 3.0, 0.5, 2.9, 3.0, 0.1, 0.2]);
        let nodes = aggregate(&spec, &children, &Expectations::new(), &Rubric::default()).unwrap();
        for seed in 0..32 {
            check_monotone_subset(&spec, &children, &nodes, &Rubric::default(), seed).unwrap();
        }
    }

    #[test]
    fn test_monotone_subset_detects_inflated_superset() {
        let spec = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]).with_quorum(0.3);
        let children = leaves(&[3.0, 3.0, 3.0, 3.0, 3.0, 3.0]);
        let mut nodes = aggregate(&spec, &children, &Expectations::new(), &Rubric::default()).unwrap();
        for node in &mut nodes {
            node.satisfied_members = 0;
            node.verdict = Verdict::Unsat;
        }
        let breached = (0..16).any(|seed| {
            check_monotone_subset(&spec, &children, &nodes, &Rubric::default(), seed).is_err()
        });
        assert!(breached);
    }

    #[test]
    fn test_lineage_requires_every_child_once() {
        let spec = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]);
        let children = leaves(&[1.0, 2.0, 3.0, 0.5]);
        let nodes = aggregate(&spec, &children, &Expectations::new(), &Rubric::default()).unwrap();
        check_lineage(&children, &nodes).unwrap();

        let mut extra = children.clone();
        extra.push(leaves(&[0.0; 5]).remove(4));
        assert!(matches!(
            check_lineage(&extra, &nodes),
            Err(InvariantViolation::Untraceable { ref member_id }) if member_id == "EV-0004"
        ));
        assert!(check_lineage(&children[..3], &nodes).is_err());
    }

    #[test]
    fn test_traceability_against_ledger() {
        let mut ledger = EvidenceLedger::new();
        let evidence = ledger
            .append(
                EvidenceBuilder::new("MQC-001_PA01", "doc")
                    .payload(json!({"score": 1.0}))
                    .build(),
            )
            .unwrap();

        let mut leaf = leaves(&[1.0]).remove(0);
        leaf.member_id = evidence.evidence_id.clone();
        leaf.digest = evidence.content_hash.clone();
        check_traceability(std::slice::from_ref(&leaf), &ledger).unwrap();

        leaf.digest = "forged".into();
        assert!(matches!(
            check_traceability(&[leaf], &ledger),
            Err(InvariantViolation::Untraceable { .. })
        ));
    }
}
