use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::reducer::Reduction;
use super::rubric::Rubric;
use super::{Aggregand, AggregationNode, Level, LevelSpec, Verdict};
use crate::digest::hash_json;
use crate::error::InvariantViolation;

/// Expected member count per node id.
///
/// Nodes absent from the map expect exactly the members they received.
pub type Expectations = BTreeMap<String, usize>;

/// Node id for a level and its grouping values.
pub fn node_id(level: Level, values: &[&str]) -> String {
    if values.is_empty() {
        level.prefix().to_string()
    } else {
        format!("{}:{}", level.prefix(), values.join("/"))
    }
}

/// Aggregate children with the level's configured reducer.
pub fn aggregate<C: Aggregand>(
    spec: &LevelSpec,
    children: &[C],
    expectations: &Expectations,
    rubric: &Rubric,
) -> Result<Vec<AggregationNode>, InvariantViolation> {
    aggregate_with(spec, &spec.reducer, children, expectations, rubric)
}

/// Aggregate children with a caller-supplied reduction.
///
/// Children are sorted by member id before partitioning, so the output
/// (scores, hashes and node order) does not depend on input order.
///
/// # Arguments
///
/// * `spec` - Level, grouping keys, quorum and coverage floor.
/// * `reducer` - Folds `(score, weight)` pairs of scored members into a node score.
/// * `children` - The complete child set of the level; ids must be unique.
/// * `expectations` - Expected member count per node id, for coverage and quorum.
/// * `rubric` - Quality band thresholds.
///
/// # Returns
///
/// One node per distinct grouping value, sorted by node id.
///
/// # Errors
///
/// `EmptyLevel`, `DuplicateMember`, `MissingGroupingKey`,
/// `CoverageBelowMinimum` or `HermeticityBreach`.
pub fn aggregate_with<C, R>(
    spec: &LevelSpec,
    reducer: &R,
    children: &[C],
    expectations: &Expectations,
    rubric: &Rubric,
) -> Result<Vec<AggregationNode>, InvariantViolation>
where
    C: Aggregand,
    R: Reduction + ?Sized,
{
    let level = spec.level.as_str();
    if children.is_empty() {
        return Err(InvariantViolation::EmptyLevel {
            level: level.to_string(),
        });
    }

    let mut sorted: Vec<&C> = children.iter().collect();
    sorted.sort_by(|a, b| a.member_id().cmp(b.member_id()));
    for pair in sorted.windows(2) {
        if pair[0].member_id() == pair[1].member_id() {
            return Err(InvariantViolation::DuplicateMember {
                level: level.to_string(),
                member_id: pair[0].member_id().to_string(),
            });
        }
    }

    let mut groups: BTreeMap<String, Vec<&C>> = BTreeMap::new();
    for child in sorted {
        let mut values = Vec::with_capacity(spec.group_by.len());
        for key in &spec.group_by {
            match child.attributes().get(key) {
                Some(value) => values.push(value.as_str()),
                None => {
                    return Err(InvariantViolation::MissingGroupingKey {
                        level: level.to_string(),
                        member_id: child.member_id().to_string(),
                        key: key.clone(),
                    })
                }
            }
        }
        groups.entry(node_id(spec.level, &values)).or_default().push(child);
    }

    let mut nodes = Vec::with_capacity(groups.len());
    for (id, members) in groups {
        let node = build_node(spec, reducer, id, &members, expectations, rubric);
        if node.coverage < spec.min_coverage {
            return Err(InvariantViolation::CoverageBelowMinimum {
                node_id: node.node_id,
                coverage: node.coverage,
                minimum: spec.min_coverage,
            });
        }
        debug!(
            node_id = %node.node_id,
            level,
            score = ?node.score,
            coverage = node.coverage,
            digest = %node.node_hash,
            "node aggregated"
        );
        nodes.push(node);
    }

    check_hermeticity(spec.level, &nodes)?;
    Ok(nodes)
}

fn build_node<C, R>(
    spec: &LevelSpec,
    reducer: &R,
    node_id: String,
    members: &[&C],
    expectations: &Expectations,
    rubric: &Rubric,
) -> AggregationNode
where
    C: Aggregand,
    R: Reduction + ?Sized,
{
    let values: Vec<(f64, f64)> = members
        .iter()
        .filter_map(|m| m.score().map(|s| (s, m.weight())))
        .collect();
    let score = reducer.reduce(&values);

    let expected = expectations.get(&node_id).copied().unwrap_or(members.len()).max(1);
    let coverage = (values.len() as f64 / expected as f64).min(1.0);
    let satisfied = members.iter().filter(|m| m.satisfied()).count();
    let verdict = if satisfied as f64 >= spec.quorum * expected as f64 {
        Verdict::Sat
    } else {
        Verdict::Unsat
    };
    let quality = rubric.band(score);

    let member_digests: Vec<[&str; 2]> = members.iter().map(|m| [m.member_id(), m.digest()]).collect();

    let mut metadata = BTreeMap::new();
    metadata.insert("reducer".to_string(), json!(reducer.name()));
    metadata.insert("scored_members".to_string(), json!(values.len()));

    let mut node = AggregationNode {
        node_id,
        level: spec.level,
        member_ids: members.iter().map(|m| m.member_id().to_string()).collect(),
        score,
        coverage,
        expected_members: expected,
        satisfied_members: satisfied,
        verdict,
        quality,
        attributes: common_attributes(members),
        metadata,
        node_hash: String::new(),
    };
    node.node_hash = hash_node(&node, &member_digests, reducer.name());
    node
}

fn hash_node(node: &AggregationNode, member_digests: &[[&str; 2]], reducer: &str) -> String {
    hash_json(&json!({
        "node_id": node.node_id,
        "level": node.level,
        "members": member_digests,
        "score": node.score,
        "coverage": node.coverage,
        "expected_members": node.expected_members,
        "satisfied_members": node.satisfied_members,
        "verdict": node.verdict,
        "quality": node.quality,
        "reducer": reducer,
    }))
}

/// Recompute a node's hash from its recorded fields and the digests of the
/// children it names.
///
/// # Arguments
///
/// * `node` - A node as produced by [`aggregate`], possibly reloaded from disk.
/// * `children` - The level below; must contain every id in `node.member_ids`.
///
/// # Returns
///
/// The hash [`aggregate`] would have assigned. Comparing it with
/// `node.node_hash` detects edits to the node or to any child digest.
///
/// # Errors
///
/// `Untraceable` if a member id has no matching child.
pub fn recompute_node_hash<C: Aggregand>(
    node: &AggregationNode,
    children: &[C],
) -> Result<String, InvariantViolation> {
    let by_id: BTreeMap<&str, &C> = children.iter().map(|c| (c.member_id(), c)).collect();
    let mut member_digests = Vec::with_capacity(node.member_ids.len());
    for member in &node.member_ids {
        let child = by_id.get(member.as_str()).ok_or_else(|| InvariantViolation::Untraceable {
            member_id: member.clone(),
        })?;
        member_digests.push([member.as_str(), child.digest()]);
    }
    let reducer = node
        .metadata
        .get("reducer")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    Ok(hash_node(node, &member_digests, reducer))
}

/// Attributes whose value is identical across every member.
fn common_attributes<C: Aggregand>(members: &[&C]) -> BTreeMap<String, String> {
    let Some((first, rest)) = members.split_first() else {
        return BTreeMap::new();
    };
    first
        .attributes()
        .iter()
        .filter(|(key, value)| rest.iter().all(|m| m.attributes().get(*key) == Some(*value)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// No member may belong to two sibling nodes.
pub(crate) fn check_hermeticity(level: Level, nodes: &[AggregationNode]) -> Result<(), InvariantViolation> {
    let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
    for node in nodes {
        for member in &node.member_ids {
            if let Some(first) = owner.insert(member, &node.node_id) {
                return Err(InvariantViolation::HermeticityBreach {
                    level: level.as_str().to_string(),
                    member_id: member.clone(),
                    first: first.to_string(),
                    second: node.node_id.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Leaf, Reducer};

    fn leaf(id: &str, pa: &str, dim: &str, score: Option<f64>) -> Leaf {
        let mut attributes = BTreeMap::new();
        attributes.insert("policy_area_id".to_string(), pa.to_string());
        attributes.insert("dimension_id".to_string(), dim.to_string());
        Leaf {
            member_id: id.to_string(),
            score,
            weight: 1.0,
            satisfied: score.is_some_and(|s| s >= 1.65),
            attributes,
            digest: crate::digest::hash_bytes(id.as_bytes()),
        }
    }

    fn dimension_spec() -> LevelSpec {
        LevelSpec::new(Level::Dimension, &["policy_area_id", "dimension_id"])
    }

    #[test]
    fn test_groups_by_configured_keys() {
        let children = vec![
            leaf("e1", "PA01", "DIM01", Some(3.0)),
            leaf("e2", "PA01", "DIM01", Some(1.0)),
            leaf("e3", "PA01", "DIM02", Some(2.0)),
        ];
        let nodes = aggregate(&dimension_spec(), &children, &Expectations::new(), &Rubric::default()).unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_id, "DIM:PA01/DIM01");
        assert_eq!(nodes[0].score, Some(2.0));
        assert_eq!(nodes[0].member_ids.len(), 2);
        assert_eq!(nodes[0].attributes["policy_area_id"], "PA01");
        assert_eq!(nodes[1].node_id, "DIM:PA01/DIM02");

        let by_area = LevelSpec::new(Level::PolicyArea, &["policy_area_id"]);
        let rolled = aggregate(&by_area, &nodes, &Expectations::new(), &Rubric::default()).unwrap();
        assert_eq!(rolled.len(), 1);
        assert_eq!(rolled[0].node_id, "PA:PA01");
        assert!(!rolled[0].attributes.contains_key("dimension_id"));
    }

    #[test]
    fn test_empty_group_by_yields_single_node() {
        let children = vec![leaf("e1", "PA01", "DIM01", Some(3.0)), leaf("e2", "PA02", "DIM01", Some(0.0))];
        let spec = LevelSpec::new(Level::Macro, &[]).with_reducer(Reducer::Min);
        let nodes = aggregate(&spec, &children, &Expectations::new(), &Rubric::default()).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "MACRO");
        assert_eq!(nodes[0].score, Some(0.0));
    }

    #[test]
    fn test_input_order_does_not_change_output() {
        let children = vec![
            leaf("e1", "PA01", "DIM01", Some(0.1)),
            leaf("e2", "PA01", "DIM01", Some(0.2)),
            leaf("e3", "PA01", "DIM01", Some(0.3)),
        ];
        let mut reversed = children.clone();
        reversed.reverse();

        let a = aggregate(&dimension_spec(), &children, &Expectations::new(), &Rubric::default()).unwrap();
        let b = aggregate(&dimension_spec(), &reversed, &Expectations::new(), &Rubric::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let children = vec![leaf("e1", "PA01", "DIM01", Some(1.0)), leaf("e1", "PA01", "DIM02", Some(2.0))];
        let err = aggregate(&dimension_spec(), &children, &Expectations::new(), &Rubric::default()).unwrap_err();
        assert!(matches!(err, InvariantViolation::DuplicateMember { .. }));
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut child = leaf("e1", "PA01", "DIM01", Some(1.0));
        child.attributes.remove("dimension_id");
        let err = aggregate(&dimension_spec(), &[child], &Expectations::new(), &Rubric::default()).unwrap_err();
        assert!(matches!(err, InvariantViolation::MissingGroupingKey { ref key, .. } if key == "dimension_id"));
    }

    #[test]
    fn test_coverage_against_expectations() {
        let children = vec![leaf("e1", "PA01", "DIM01", Some(3.0)), leaf("e2", "PA01", "DIM01", None)];
        let mut expectations = Expectations::new();
        expectations.insert("DIM:PA01/DIM01".to_string(), 4);

        let nodes = aggregate(&dimension_spec(), &children, &expectations, &Rubric::default()).unwrap();
        assert_eq!(nodes[0].coverage, 0.25);
        assert_eq!(nodes[0].expected_members, 4);

        let strict = dimension_spec().with_min_coverage(0.5);
        let err = aggregate(&strict, &children, &expectations, &Rubric::default()).unwrap_err();
        assert!(matches!(err, InvariantViolation::CoverageBelowMinimum { .. }));
    }

    #[test]
    fn test_verdict_uses_quorum_of_expected() {
        let children = vec![leaf("e1", "PA01", "DIM01", Some(3.0)), leaf("e2", "PA01", "DIM01", Some(0.0))];
        let mut expectations = Expectations::new();
        expectations.insert("DIM:PA01/DIM01".to_string(), 2);

        let half = dimension_spec().with_quorum(0.5);
        assert_eq!(aggregate(&half, &children, &expectations, &Rubric::default()).unwrap()[0].verdict, Verdict::Sat);

        let all = dimension_spec().with_quorum(1.0);
        assert_eq!(aggregate(&all, &children, &expectations, &Rubric::default()).unwrap()[0].verdict, Verdict::Unsat);
    }

    #[test]
    fn test_empty_level_rejected() {
        let err = aggregate::<Leaf>(&dimension_spec(), &[], &Expectations::new(), &Rubric::default()).unwrap_err();
        assert!(matches!(err, InvariantViolation::EmptyLevel { .. }));
    }

    #[test]
    fn test_hermeticity_check_detects_overlap() {
        let children = vec![leaf("e1", "PA01", "DIM01", Some(1.0)), leaf("e2", "PA01", "DIM02", Some(1.0))];
        let mut nodes = aggregate(&dimension_spec(), &children, &Expectations::new(), &Rubric::default()).unwrap();
        nodes[1].member_ids.insert("e1".to_string());
        assert!(matches!(
            check_hermeticity(Level::Dimension, &nodes),
            Err(InvariantViolation::HermeticityBreach { .. })
        ));
    }

    #[test]
    fn test_recomputed_hash_matches_and_detects_edits() {
        let children = vec![
            leaf("e1", "PA01", "DIM01", Some(3.0)),
            leaf("e2", "PA01", "DIM01", None),
            leaf("e3", "PA02", "DIM01", Some(0.5)),
        ];
        let nodes = aggregate(&dimension_spec(), &children, &Expectations::new(), &Rubric::default()).unwrap();
        for node in &nodes {
            assert_eq!(recompute_node_hash(node, &children).unwrap(), node.node_hash);
        }

        let mut edited = nodes[0].clone();
        edited.score = Some(1.0);
        assert_ne!(recompute_node_hash(&edited, &children).unwrap(), edited.node_hash);

        let mut forged = children.clone();
        forged[0].digest = "forged".into();
        assert_ne!(recompute_node_hash(&nodes[0], &forged).unwrap(), nodes[0].node_hash);

        assert!(matches!(
            recompute_node_hash(&nodes[0], &children[2..]),
            Err(InvariantViolation::Untraceable { .. })
        ));
    }
}
