//! Quality bands over normalized scores.

use serde::{Deserialize, Serialize};

/// Upper bound of the score scale.
pub const SCORE_MAX: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLevel {
    Insufficient,
    Acceptable,
    Good,
    Excellent,
}

impl QualityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Insufficient => "INSUFFICIENT",
            QualityLevel::Acceptable => "ACCEPTABLE",
            QualityLevel::Good => "GOOD",
            QualityLevel::Excellent => "EXCELLENT",
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds on the normalized score (`score / SCORE_MAX`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rubric {
    pub excellent: f64,
    pub good: f64,
    pub acceptable: f64,
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            excellent: 0.85,
            good: 0.70,
            acceptable: 0.55,
        }
    }
}

impl Rubric {
    /// Band for a 0..=3 score. Unscored is insufficient.
    pub fn band(&self, score: Option<f64>) -> QualityLevel {
        let Some(score) = score else {
            return QualityLevel::Insufficient;
        };
        let normalized = (score / SCORE_MAX).clamp(0.0, 1.0);
        if normalized >= self.excellent {
            QualityLevel::Excellent
        } else if normalized >= self.good {
            QualityLevel::Good
        } else if normalized >= self.acceptable {
            QualityLevel::Acceptable
        } else {
            QualityLevel::Insufficient
        }
    }

    /// Thresholds must be ordered and inside `[0, 1]`.
    pub fn is_well_formed(&self) -> bool {
        (0.0..=1.0).contains(&self.acceptable)
            && self.acceptable <= self.good
            && self.good <= self.excellent
            && self.excellent <= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_thresholds() {
        let rubric = Rubric::default();
        assert_eq!(rubric.band(Some(3.0)), QualityLevel::Excellent);
        assert_eq!(rubric.band(Some(2.7)), QualityLevel::Excellent);
        assert_eq!(rubric.band(Some(2.2)), QualityLevel::Good);
        assert_eq!(rubric.band(Some(1.8)), QualityLevel::Acceptable);
        assert_eq!(rubric.band(Some(1.0)), QualityLevel::Insufficient);
        assert_eq!(rubric.band(None), QualityLevel::Insufficient);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(QualityLevel::Excellent > QualityLevel::Good);
        assert!(QualityLevel::Acceptable > QualityLevel::Insufficient);
    }

    #[test]
    fn test_well_formed() {
        assert!(Rubric::default().is_well_formed());
        let inverted = Rubric { excellent: 0.5, good: 0.7, acceptable: 0.55 };
        assert!(!inverted.is_well_formed());
    }
}
