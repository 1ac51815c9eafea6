//! Executor dispatch.
//!
//! Runs the methods bound to one task, in declared order, under the task's
//! time budget, and assembles their outcomes into one evidence candidate.
//! Each failed method is routed through [`FallbackPolicy`]. Dispatch never
//! writes the ledger and never retries.

use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use assay_core::{
    AssayResult, Document, DocumentChunk, EvidenceAssembler, EvidenceCandidate, ExecutableTask,
    Fallback, FallbackPolicy, MethodBindings, MethodOutcome, ValidationError,
};

use crate::methods::{MethodContext, MethodError, MethodTable};

pub struct Dispatcher {
    table: Arc<MethodTable>,
    bindings: MethodBindings,
    document_id: String,
    chunks: BTreeMap<String, DocumentChunk>,
    assembler: EvidenceAssembler,
    task_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        table: Arc<MethodTable>,
        bindings: MethodBindings,
        document: &Document,
        assembler: EvidenceAssembler,
        task_timeout: Duration,
    ) -> Self {
        let chunks = document
            .chunks
            .iter()
            .map(|chunk| (chunk.chunk_id.clone(), chunk.clone()))
            .collect();
        Self {
            table,
            bindings,
            document_id: document.document_id.clone(),
            chunks,
            assembler,
            task_timeout,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Execute one task.
    ///
    /// # Arguments
    ///
    /// * `task` - The planned task; its chunk must exist in the document.
    ///
    /// # Returns
    ///
    /// One candidate merging every bound method's outcome in declared order.
    /// Failures whose kind the fallback table maps to `Degrade` stay on the
    /// candidate as failure records and mark it degraded.
    ///
    /// # Errors
    ///
    /// An unknown chunk, or a method failure whose kind maps to `Abort`.
    pub async fn execute(&self, task: &ExecutableTask) -> AssayResult<EvidenceCandidate> {
        let chunk = self
            .chunks
            .get(&task.chunk_id)
            .ok_or_else(|| ValidationError::UnknownReference {
                kind: "chunk",
                id: task.chunk_id.clone(),
                referenced_by: task.task_id.clone(),
            })?;
        let context = MethodContext {
            task,
            chunk,
            document_id: &self.document_id,
        };

        let started = Instant::now();
        let deadline = started + self.task_timeout;
        let methods = self.bindings.methods_for(&task.dimension_id, &task.question_id);
        let mut outcomes = Vec::with_capacity(methods.len());

        for name in methods {
            let outcome = match self.table.get(name) {
                Some(_) if Instant::now() >= deadline => MethodOutcome::TimedOut {
                    method: name.clone(),
                    limit_ms: self.task_timeout.as_millis() as u64,
                },
                None => {
                    warn!(task_id = %task.task_id, method = %name, "method not in table, degrading");
                    MethodOutcome::Missing { method: name.clone() }
                }
                Some(method) => {
                    let call = AssertUnwindSafe(method.invoke(&context)).catch_unwind();
                    match tokio::time::timeout_at(deadline, call).await {
                        Ok(Ok(Ok(output))) => MethodOutcome::Completed {
                            method: name.clone(),
                            output,
                        },
                        Ok(Ok(Err(err))) => {
                            warn!(task_id = %task.task_id, method = %name, error = %err, "method failed");
                            MethodOutcome::Failed(err.into_execution_error(name, &task.task_id))
                        }
                        Ok(Err(panic)) => {
                            let err = MethodError::Panicked(panic_message(panic.as_ref()));
                            warn!(task_id = %task.task_id, method = %name, error = %err, "method panicked");
                            MethodOutcome::Failed(err.into_execution_error(name, &task.task_id))
                        }
                        Err(_) => {
                            warn!(
                                task_id = %task.task_id,
                                method = %name,
                                timeout = ?self.task_timeout,
                                "task budget exhausted"
                            );
                            MethodOutcome::TimedOut {
                                method: name.clone(),
                                limit_ms: self.task_timeout.as_millis() as u64,
                            }
                        }
                    }
                }
            };
            if let Some(err) = outcome.failure(&task.task_id) {
                match FallbackPolicy::decide(&err) {
                    Fallback::Degrade | Fallback::SkipWithFlag => {}
                    Fallback::Abort => return Err(err),
                }
            }
            outcomes.push(outcome);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let candidate = self
            .assembler
            .assemble(task, &self.document_id, &outcomes, elapsed_ms);

        if candidate.is_degraded() {
            warn!(task_id = %task.task_id, "task degraded");
        } else {
            debug!(task_id = %task.task_id, elapsed_ms, "task executed");
        }
        Ok(candidate)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::Method;
    use assay_core::{ErrorKind, MergeStrategy};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};

    struct Fixed(&'static str, f64);

    #[async_trait]
    impl Method for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        async fn invoke(&self, _: &MethodContext<'_>) -> Result<Value, MethodError> {
            Ok(json!({"score": self.1}))
        }
    }

    struct Failing;

    #[async_trait]
    impl Method for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn invoke(&self, _: &MethodContext<'_>) -> Result<Value, MethodError> {
            Err(MethodError::Failed("model unavailable".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Method for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        async fn invoke(&self, _: &MethodContext<'_>) -> Result<Value, MethodError> {
            panic!("index out of range")
        }
    }

    struct Slow;

    #[async_trait]
    impl Method for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn invoke(&self, _: &MethodContext<'_>) -> Result<Value, MethodError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(3.0))
        }
    }

    fn document() -> Document {
        Document {
            document_id: "doc".into(),
            chunks: vec![DocumentChunk {
                chunk_id: "c1".into(),
                policy_area_id: "PA01".into(),
                dimension_id: "DIM01".into(),
                text: "text".into(),
                position: 0,
            }],
        }
    }

    fn task() -> ExecutableTask {
        ExecutableTask {
            task_id: "MQC-001_PA01".into(),
            question_id: "Q001".into(),
            question_global: 1,
            policy_area_id: "PA01".into(),
            dimension_id: "DIM01".into(),
            chunk_id: "c1".into(),
            patterns: vec![],
            signals: Default::default(),
            creation_timestamp: Utc::now(),
            expected_elements: vec![],
            metadata: Default::default(),
        }
    }

    fn dispatcher(table: MethodTable, methods: &[&str], timeout: Duration) -> Dispatcher {
        let mut bindings = MethodBindings::default();
        bindings.bind("DIM01", "Q001", methods.iter().map(|m| m.to_string()).collect());
        Dispatcher::new(
            Arc::new(table),
            bindings,
            &document(),
            EvidenceAssembler::new(MergeStrategy::Mean),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_merges_in_declared_order() {
        let table = MethodTable::new().with(Fixed("a", 1.0)).with(Fixed("b", 3.0));
        let d = dispatcher(table, &["b", "a"], Duration::from_secs(5));

        let candidate = d.execute(&task()).await.unwrap();
        assert!(!candidate.is_degraded());
        assert_eq!(candidate.source_method, "b+a");
        assert_eq!(candidate.payload["score"], json!(2.0));
        assert_eq!(candidate.document_id, "doc");
    }

    #[tokio::test]
    async fn test_missing_method_degrades() {
        let table = MethodTable::new().with(Fixed("a", 2.0));
        let d = dispatcher(table, &["a", "absent"], Duration::from_secs(5));

        let candidate = d.execute(&task()).await.unwrap();
        assert!(candidate.is_degraded());
        assert_eq!(candidate.payload["methods"]["absent"], Value::Null);
        assert_eq!(candidate.metadata["failures"][0]["kind"], json!("missing_method"));
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_captured() {
        let table = MethodTable::new().with(Failing).with(Panicking).with(Fixed("ok", 3.0));
        let d = dispatcher(table, &["failing", "panicking", "ok"], Duration::from_secs(5));

        let candidate = d.execute(&task()).await.unwrap();
        assert!(candidate.is_degraded());
        assert_eq!(candidate.payload["score"], json!(3.0));
        let failures = candidate.metadata["failures"].as_array().unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures[1]["message"].as_str().unwrap().contains("index out of range"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades() {
        let table = MethodTable::new().with(Slow).with(Fixed("after", 1.0));
        let d = dispatcher(table, &["slow", "after"], Duration::from_millis(100));

        let candidate = d.execute(&task()).await.unwrap();
        assert!(candidate.is_degraded());
        let failures = candidate.metadata["failures"].as_array().unwrap();
        assert_eq!(failures[0]["kind"], json!("execution_timeout"));
        assert_eq!(failures[0]["limit_ms"], json!(100));
        // The budget is per task, so the method after the timeout also misses it.
        assert_eq!(failures[1]["method"], json!("after"));
    }

    #[tokio::test]
    async fn test_recorded_failures_are_degrade_kinds() {
        let table = MethodTable::new().with(Failing).with(Fixed("ok", 2.0));
        let d = dispatcher(table, &["failing", "absent", "ok"], Duration::from_secs(5));

        let candidate = d.execute(&task()).await.unwrap();
        let failures = candidate.metadata["failures"].as_array().unwrap();
        assert_eq!(failures.len(), 2);
        for failure in failures {
            let kind: ErrorKind = serde_json::from_value(failure["kind"].clone()).unwrap();
            assert_eq!(FallbackPolicy::fallback_for(kind), Fallback::Degrade, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_identical_runs_identical_content() {
        let table = Arc::new(MethodTable::builtin());
        let mut bindings = MethodBindings::default();
        bindings.bind("DIM01", "Q001", vec!["pattern_presence".into()]);
        let d = Dispatcher::new(
            table,
            bindings,
            &document(),
            EvidenceAssembler::default(),
            Duration::from_secs(5),
        );

        let a = d.execute(&task()).await.unwrap();
        let b = d.execute(&task()).await.unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.evidence_id(), b.evidence_id());
    }

    #[tokio::test]
    async fn test_unknown_chunk_is_an_error() {
        let d = dispatcher(MethodTable::new(), &[], Duration::from_secs(1));
        let mut t = task();
        t.chunk_id = "nowhere".into();
        assert!(d.execute(&t).await.is_err());
    }
}
