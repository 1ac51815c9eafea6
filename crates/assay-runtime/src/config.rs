//! Runtime configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file is a valid
//! configuration. Durations are written in humantime form (`30s`, `2m`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use assay_core::contracts::CertificateSettings;
use assay_core::{AggregationSettings, MergeStrategy, Phase, Rubric, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Concurrent dispatch workers (at least 1).
    pub workers: usize,

    /// Budget for all methods of one task.
    #[serde(with = "duration_str")]
    pub task_timeout: Duration,

    pub phase_timeouts: PhaseTimeouts,

    pub rubric: Rubric,

    pub aggregation: AggregationSettings,

    pub scoring: ScoringConfig,

    pub certificate: CertificateSettings,

    /// Expected SHA-256 digests keyed by input name (`questionnaire`,
    /// `document`). A mismatch refuses the run.
    pub pinned_inputs: BTreeMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            task_timeout: Duration::from_secs(30),
            phase_timeouts: PhaseTimeouts::default(),
            rubric: Rubric::default(),
            aggregation: AggregationSettings::default(),
            scoring: ScoringConfig::default(),
            certificate: CertificateSettings::default(),
            pinned_inputs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub merge_strategy: MergeStrategy,
}

/// Wall-clock limit for each phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    #[serde(with = "duration_str")]
    pub validate: Duration,
    #[serde(with = "duration_str")]
    pub ingest: Duration,
    #[serde(with = "duration_str")]
    pub plan: Duration,
    #[serde(with = "duration_str")]
    pub dispatch: Duration,
    #[serde(with = "duration_str")]
    pub score: Duration,
    #[serde(with = "duration_str")]
    pub aggregate_dimension: Duration,
    #[serde(with = "duration_str")]
    pub aggregate_policy_area: Duration,
    #[serde(with = "duration_str")]
    pub aggregate_cluster: Duration,
    #[serde(with = "duration_str", rename = "macro")]
    pub macro_phase: Duration,
    #[serde(with = "duration_str")]
    pub recommend: Duration,
    #[serde(with = "duration_str")]
    pub export: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            validate: Duration::from_secs(60),
            ingest: Duration::from_secs(120),
            plan: Duration::from_secs(60),
            dispatch: Duration::from_secs(600),
            score: Duration::from_secs(300),
            aggregate_dimension: Duration::from_secs(180),
            aggregate_policy_area: Duration::from_secs(120),
            aggregate_cluster: Duration::from_secs(60),
            macro_phase: Duration::from_secs(60),
            recommend: Duration::from_secs(120),
            export: Duration::from_secs(120),
        }
    }
}

impl PhaseTimeouts {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Validate => self.validate,
            Phase::Ingest => self.ingest,
            Phase::Plan => self.plan,
            Phase::Dispatch => self.dispatch,
            Phase::Score => self.score,
            Phase::AggregateDimension => self.aggregate_dimension,
            Phase::AggregatePolicyArea => self.aggregate_policy_area,
            Phase::AggregateCluster => self.aggregate_cluster,
            Phase::Macro => self.macro_phase,
            Phase::Recommend => self.recommend,
            Phase::Export => self.export,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ValidationError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml).map_err(|e| ValidationError::Parse {
            source_name: "runtime config".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ValidationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&contents)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Reject settings the pipeline cannot honor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |field: &str, message: String| ValidationError::Parse {
            source_name: format!("runtime config field '{field}'"),
            message,
        };

        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1".to_string()));
        }
        if self.task_timeout.is_zero() {
            return Err(invalid("task_timeout", "must be positive".to_string()));
        }
        if !self.rubric.is_well_formed() {
            return Err(invalid(
                "rubric",
                "thresholds must satisfy 0 <= acceptable <= good <= excellent <= 1".to_string(),
            ));
        }
        for level in assay_core::Level::ALL {
            let settings = self.aggregation.settings(level);
            if !(0.0..=1.0).contains(&settings.quorum) || !(0.0..=1.0).contains(&settings.min_coverage) {
                return Err(invalid(
                    "aggregation",
                    format!("{level}: quorum and min_coverage must lie in [0, 1]"),
                ));
            }
        }
        let alpha = self.certificate.alpha;
        if !(alpha > 0.0 && alpha < 1.0) || self.certificate.resamples == 0 {
            return Err(invalid(
                "certificate",
                "alpha must lie in (0, 1) and resamples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
