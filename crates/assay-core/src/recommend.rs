//! Recommendations derived from aggregated quality bands.
//!
//! The rules are strict and non-configurable:
//! 1. Every INSUFFICIENT dimension node → one MICRO recommendation
//! 2. Every INSUFFICIENT or ACCEPTABLE cluster node → one MESO recommendation
//! 3. The macro node → exactly one MACRO recommendation, whatever its band
//!
//! Output is ordered by level, then node id.

use serde::{Deserialize, Serialize};

use crate::aggregation::{AggregationNode, Level, QualityLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Micro,
    Meso,
    Macro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub scope: Scope,
    pub node_id: String,
    pub quality: QualityLevel,
    pub score: Option<f64>,
    pub priority: Priority,
    pub message: String,
}

/// Applies the recommendation rules.
#[derive(Debug, Default)]
pub struct RecommendationEngine;

impl RecommendationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn recommend(
        &self,
        dimensions: &[AggregationNode],
        clusters: &[AggregationNode],
        macro_node: &AggregationNode,
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();

        // Rule 1: insufficient dimensions
        for node in dimensions.iter().filter(|n| n.level == Level::Dimension) {
            if node.quality == QualityLevel::Insufficient {
                out.push(Recommendation {
                    scope: Scope::Micro,
                    node_id: node.node_id.clone(),
                    quality: node.quality,
                    score: node.score,
                    priority: Priority::High,
                    message: format!(
                        "{} is insufficient ({}); strengthen the evidence for its questions",
                        node.node_id,
                        describe_score(node.score)
                    ),
                });
            }
        }

        // Rule 2: weak clusters
        for node in clusters.iter().filter(|n| n.level == Level::Cluster) {
            let priority = match node.quality {
                QualityLevel::Insufficient => Priority::High,
                QualityLevel::Acceptable => Priority::Medium,
                QualityLevel::Good | QualityLevel::Excellent => continue,
            };
            out.push(Recommendation {
                scope: Scope::Meso,
                node_id: node.node_id.clone(),
                quality: node.quality,
                score: node.score,
                priority,
                message: format!(
                    "cluster {} is {} ({}); review its policy areas together",
                    node.node_id,
                    node.quality.as_str().to_lowercase(),
                    describe_score(node.score)
                ),
            });
        }

        // Rule 3: one macro recommendation
        let (priority, advice) = match macro_node.quality {
            QualityLevel::Insufficient => (Priority::High, "the plan needs structural revision"),
            QualityLevel::Acceptable => (Priority::Medium, "the plan is adequate with targeted gaps"),
            QualityLevel::Good => (Priority::Low, "the plan is sound; address remaining weak clusters"),
            QualityLevel::Excellent => (Priority::Low, "the plan meets the standard; maintain it"),
        };
        out.push(Recommendation {
            scope: Scope::Macro,
            node_id: macro_node.node_id.clone(),
            quality: macro_node.quality,
            score: macro_node.score,
            priority,
            message: format!("{advice} ({})", describe_score(macro_node.score)),
        });

        out.sort_by(|a, b| (a.scope, &a.node_id).cmp(&(b.scope, &b.node_id)));
        out
    }
}

fn describe_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("score {s:.2}/3"),
        None => "unscored".to_string(),
    }
}
