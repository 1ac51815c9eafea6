//! Task planner: questions x routed chunks -> ordered task set.
//!
//! Planning is fail-fast. A single malformed question aborts the whole pass;
//! partial coverage of the questionnaire is never returned.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::document::{ChunkRouter, Document};
use crate::error::ConstructionError;
use crate::questionnaire::Questionnaire;
use crate::task::{ExecutableTask, TaskIdReservations};

/// Method sequence bound to each `(dimension_id, question_id)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodBindings {
    bindings: BTreeMap<(String, String), Vec<String>>,
}

impl MethodBindings {
    pub fn from_questionnaire(questionnaire: &Questionnaire) -> Self {
        let bindings = questionnaire
            .questions
            .iter()
            .map(|q| ((q.dimension_id.clone(), q.question_id.clone()), q.methods.clone()))
            .collect();
        Self { bindings }
    }

    /// Methods for a pair, in declared invocation order.
    pub fn methods_for(&self, dimension_id: &str, question_id: &str) -> &[String] {
        self.bindings
            .get(&(dimension_id.to_string(), question_id.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Override one binding. Used to replace a method sequence before a run.
    pub fn bind(&mut self, dimension_id: &str, question_id: &str, methods: Vec<String>) {
        self.bindings
            .insert((dimension_id.to_string(), question_id.to_string()), methods);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Plan every question against the document.
pub fn plan(
    questionnaire: &Questionnaire,
    document: &Document,
) -> Result<Vec<ExecutableTask>, ConstructionError> {
    plan_at(questionnaire, document, Utc::now())
}

/// [`plan`] with an explicit creation timestamp.
///
/// Questions are planned in questionnaire order; the timestamp is the only
/// input that differs between otherwise identical passes, and it is excluded
/// from [`ExecutableTask::fingerprint`].
///
/// # Arguments
///
/// * `questionnaire` - A structurally validated questionnaire.
/// * `document` - The pre-chunked document; each question routes to the chunk
///   on its `(policy_area_id, dimension_id)` cell.
/// * `created_at` - Stamped on every task.
///
/// # Returns
///
/// Exactly one task per question, ids of the form `MQC-{global:03}_{PA}`.
///
/// # Errors
///
/// The first [`ConstructionError`] aborts the whole pass; no partial task
/// list is returned. `EmptyRouting`, `InvalidQuestionGlobal` and
/// `DuplicateTaskId` name the offending question.
pub fn plan_at(
    questionnaire: &Questionnaire,
    document: &Document,
    created_at: DateTime<Utc>,
) -> Result<Vec<ExecutableTask>, ConstructionError> {
    let router = ChunkRouter::new(document);
    let mut reservations = TaskIdReservations::new();
    let mut tasks = Vec::with_capacity(questionnaire.questions.len());

    for question in &questionnaire.questions {
        let chunk = router
            .route(&question.policy_area_id, &question.dimension_id)
            .ok_or_else(|| ConstructionError::EmptyRouting {
                question_id: question.question_id.clone(),
            })?;

        let task = ExecutableTask::build(question, chunk, &mut reservations, created_at)?;
        debug!(task_id = %task.task_id, chunk_id = %task.chunk_id, "task planned");
        tasks.push(task);
    }

    let expected = questionnaire.questions.len();
    if tasks.len() != expected {
        return Err(ConstructionError::CountMismatch {
            expected,
            actual: tasks.len(),
        });
    }

    tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    info!(
        task_count = tasks.len(),
        reserved = reservations.count(),
        document_id = %document.document_id,
        "planning complete"
    );
    Ok(tasks)
}
