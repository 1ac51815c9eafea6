//! Merging method outputs into one evidence payload.
//!
//! The payload has a fixed shape:
//!
//! ```json
//! {"methods": {"<name>": <output or null>}, "score": <0..3 or null>, "degraded": <bool>}
//! ```
//!
//! Failures never enter the payload; they are attached to metadata so the
//! content hash only reflects what the methods actually produced.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::aggregation::{compensated_sum, SCORE_MAX};
use crate::error::{AssayError, MethodExecutionError};
use crate::evidence::{EvidenceBuilder, EvidenceCandidate};
use crate::task::ExecutableTask;

/// How numeric method scores combine into the task score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    First,
    Last,
    #[default]
    Mean,
    Min,
    Max,
}

impl MergeStrategy {
    pub fn merge(&self, scores: &[f64]) -> Option<f64> {
        if scores.is_empty() {
            return None;
        }
        match self {
            MergeStrategy::First => scores.first().copied(),
            MergeStrategy::Last => scores.last().copied(),
            MergeStrategy::Mean => Some(compensated_sum(scores.iter().copied()) / scores.len() as f64),
            MergeStrategy::Min => scores.iter().copied().reduce(f64::min),
            MergeStrategy::Max => scores.iter().copied().reduce(f64::max),
        }
    }
}

/// What happened to one method of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutcome {
    Completed { method: String, output: Value },
    Failed(MethodExecutionError),
    Missing { method: String },
    TimedOut { method: String, limit_ms: u64 },
}

impl MethodOutcome {
    pub fn method(&self) -> &str {
        match self {
            MethodOutcome::Completed { method, .. }
            | MethodOutcome::Missing { method }
            | MethodOutcome::TimedOut { method, .. } => method,
            MethodOutcome::Failed(err) => &err.method,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, MethodOutcome::Completed { .. })
    }

    /// The typed error behind a failed outcome, `None` when completed.
    pub fn failure(&self, task_id: &str) -> Option<AssayError> {
        match self {
            MethodOutcome::Completed { .. } => None,
            MethodOutcome::Failed(err) => Some(AssayError::MethodExecution(err.clone())),
            MethodOutcome::Missing { method } => Some(AssayError::MissingMethod {
                method: method.clone(),
                task_id: task_id.to_string(),
            }),
            MethodOutcome::TimedOut { method, limit_ms } => Some(AssayError::ExecutionTimeout {
                scope: format!("{task_id}/{method}"),
                limit_ms: *limit_ms,
            }),
        }
    }

    fn failure_record(&self) -> Option<Value> {
        match self {
            MethodOutcome::Completed { .. } => None,
            MethodOutcome::Failed(err) => Some(json!({
                "kind": "method_execution",
                "method": err.method,
                "message": err.message,
            })),
            MethodOutcome::Missing { method } => Some(json!({
                "kind": "missing_method",
                "method": method,
            })),
            MethodOutcome::TimedOut { method, limit_ms } => Some(json!({
                "kind": "execution_timeout",
                "method": method,
                "limit_ms": limit_ms,
            })),
        }
    }
}

/// Score extracted from a method output: a bare number or `{"score": n}`.
fn output_score(output: &Value) -> Option<f64> {
    output
        .as_f64()
        .or_else(|| output.get("score").and_then(Value::as_f64))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceAssembler {
    strategy: MergeStrategy,
}

impl EvidenceAssembler {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Merge outcomes, in declared method order, into one candidate.
    ///
    /// A task with no bound methods, or with any outcome other than
    /// `Completed`, is degraded.
    pub fn assemble(
        &self,
        task: &ExecutableTask,
        document_id: &str,
        outcomes: &[MethodOutcome],
        execution_time_ms: u64,
    ) -> EvidenceCandidate {
        let mut methods = Map::new();
        let mut scores = Vec::new();
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome {
                MethodOutcome::Completed { method, output } => {
                    if let Some(score) = output_score(output) {
                        scores.push(score);
                    }
                    methods.insert(method.clone(), output.clone());
                }
                other => {
                    methods.insert(other.method().to_string(), Value::Null);
                    if let Some(record) = other.failure_record() {
                        failures.push(record);
                    }
                }
            }
        }

        let degraded = outcomes.is_empty() || !failures.is_empty();
        let score = self
            .strategy
            .merge(&scores)
            .map(|s| s.clamp(0.0, SCORE_MAX));

        let source_method = outcomes
            .iter()
            .map(MethodOutcome::method)
            .collect::<Vec<_>>()
            .join("+");

        let mut builder = EvidenceBuilder::new(&task.task_id, document_id)
            .source_method(source_method)
            .execution_time_ms(execution_time_ms)
            .payload(json!({
                "methods": methods,
                "score": score,
                "degraded": degraded,
            }))
            .metadata("question_id", json!(task.question_id))
            .metadata("policy_area_id", json!(task.policy_area_id))
            .metadata("dimension_id", json!(task.dimension_id))
            .metadata("chunk_id", json!(task.chunk_id))
            .metadata("merge_strategy", json!(self.strategy));

        if !failures.is_empty() {
            builder = builder.metadata("failures", Value::Array(failures));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn task() -> ExecutableTask {
        ExecutableTask {
            task_id: "MQC-001_PA01".into(),
            question_id: "Q001".into(),
            question_global: 1,
            policy_area_id: "PA01".into(),
            dimension_id: "DIM01".into(),
            chunk_id: "c1".into(),
            patterns: vec![],
            signals: BTreeMap::new(),
            creation_timestamp: Utc::now(),
            expected_elements: vec![],
            metadata: BTreeMap::new(),
        }
    }

    fn completed(method: &str, output: Value) -> MethodOutcome {
        MethodOutcome::Completed { method: method.into(), output }
    }

    #[test]
    fn test_merge_strategies() {
        let scores = [2.0, 1.0, 3.0];
        assert_eq!(MergeStrategy::First.merge(&scores), Some(2.0));
        assert_eq!(MergeStrategy::Last.merge(&scores), Some(3.0));
        assert_eq!(MergeStrategy::Mean.merge(&scores), Some(2.0));
        assert_eq!(MergeStrategy::Min.merge(&scores), Some(1.0));
        assert_eq!(MergeStrategy::Max.merge(&scores), Some(3.0));
        assert_eq!(MergeStrategy::Mean.merge(&[]), None);
    }

    #[test]
    fn test_assemble_merges_and_clamps() {
        let assembler = EvidenceAssembler::new(MergeStrategy::Max);
        let outcomes = vec![completed("a", json!(7.5)), completed("b", json!({"score": 1.0}))];
        let candidate = assembler.assemble(&task(), "doc", &outcomes, 5);

        assert_eq!(candidate.payload["score"], json!(3.0));
        assert_eq!(candidate.payload["degraded"], json!(false));
        assert_eq!(candidate.source_method, "a+b");
        assert!(!candidate.metadata.contains_key("failures"));
    }

    #[test]
    fn test_missing_method_degrades() {
        let assembler = EvidenceAssembler::default();
        let outcomes = vec![
            completed("a", json!(2.0)),
            MethodOutcome::Missing { method: "ghost".into() },
        ];
        let candidate = assembler.assemble(&task(), "doc", &outcomes, 1);

        assert!(candidate.is_degraded());
        assert_eq!(candidate.payload["score"], json!(2.0));
        assert_eq!(candidate.payload["methods"]["ghost"], Value::Null);
        assert_eq!(candidate.metadata["failures"][0]["kind"], json!("missing_method"));
    }

    #[test]
    fn test_failure_kept_out_of_content_hash() {
        let assembler = EvidenceAssembler::default();
        let failed = |message: &str| {
            vec![MethodOutcome::Failed(MethodExecutionError {
                method: "a".into(),
                task_id: "MQC-001_PA01".into(),
                message: message.into(),
            })]
        };
        let a = assembler.assemble(&task(), "doc", &failed("boom"), 1);
        let b = assembler.assemble(&task(), "doc", &failed("boom again"), 1);
        assert!(a.is_degraded());
        assert_eq!(a.payload["score"], Value::Null);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_no_methods_is_degraded() {
        let candidate = EvidenceAssembler::default().assemble(&task(), "doc", &[], 0);
        assert!(candidate.is_degraded());
    }

    #[test]
    fn test_failure_kinds() {
        use crate::error::ErrorKind;

        let completed = MethodOutcome::Completed {
            method: "a".into(),
            output: json!(1.0),
        };
        assert!(completed.failure("MQC-001_PA01").is_none());

        let missing = MethodOutcome::Missing { method: "b".into() };
        assert_eq!(missing.failure("MQC-001_PA01").unwrap().kind(), ErrorKind::MissingMethod);

        let timed_out = MethodOutcome::TimedOut {
            method: "c".into(),
            limit_ms: 5,
        };
        let err = timed_out.failure("MQC-001_PA01").unwrap();
        assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
        assert!(err.to_string().contains("MQC-001_PA01/c"));
    }
}
