//! Score reductions.
//!
//! Every reduction receives its inputs already sorted by member id, so the
//! result is bit-identical for any permutation of the children. Sums use
//! Neumaier compensation.

use serde::{Deserialize, Serialize};

/// A caller-supplied reduction over `(score, weight)` pairs.
pub trait Reduction {
    fn name(&self) -> &str;

    /// Reduce member scores. `None` when nothing was scored.
    fn reduce(&self, values: &[(f64, f64)]) -> Option<f64>;
}

/// Built-in reductions selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    #[default]
    Mean,
    Min,
    Max,
    WeightedMean,
}

impl Reduction for Reducer {
    fn name(&self) -> &str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::WeightedMean => "weighted_mean",
        }
    }

    fn reduce(&self, values: &[(f64, f64)]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reducer::Mean => Some(compensated_sum(values.iter().map(|(s, _)| *s)) / values.len() as f64),
            Reducer::Min => values.iter().map(|(s, _)| *s).reduce(f64::min),
            Reducer::Max => values.iter().map(|(s, _)| *s).reduce(f64::max),
            Reducer::WeightedMean => {
                let total_weight = compensated_sum(values.iter().map(|(_, w)| *w));
                if total_weight <= 0.0 {
                    return None;
                }
                let weighted = compensated_sum(values.iter().map(|(s, w)| s * w));
                Some(weighted / total_weight)
            }
        }
    }
}

/// Neumaier-compensated summation.
pub fn compensated_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut compensation = 0.0_f64;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}
