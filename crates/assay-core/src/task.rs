//! The executable unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::digest::hash_json;
use crate::document::DocumentChunk;
use crate::error::ConstructionError;
use crate::questionnaire::Question;

/// Highest admissible `question_global`.
pub const MAX_QUESTION_GLOBAL: u16 = 999;

/// Deterministic task id for a question ordinal and policy area.
pub fn task_id_for(question_global: u16, policy_area_id: &str) -> String {
    format!("MQC-{question_global:03}_{policy_area_id}")
}

/// Parse a raw `question_global` value, naming the question on failure.
pub fn parse_question_global(question_id: &str, raw: Option<&Value>) -> Result<u16, ConstructionError> {
    let raw = match raw {
        None | Some(Value::Null) => {
            return Err(ConstructionError::MissingQuestionGlobal {
                question_id: question_id.to_string(),
            })
        }
        Some(v) => v,
    };

    match raw.as_u64() {
        Some(n) if n <= u64::from(MAX_QUESTION_GLOBAL) => Ok(n as u16),
        _ => Err(ConstructionError::InvalidQuestionGlobal {
            question_id: question_id.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Task ids reserved during one planning pass.
///
/// Owned by a single `plan` invocation and dropped with it.
#[derive(Debug, Default)]
pub struct TaskIdReservations {
    reserved: BTreeSet<String>,
}

impl TaskIdReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id, failing if it was already taken in this pass.
    pub fn reserve(&mut self, task_id: &str, question_id: &str) -> Result<(), ConstructionError> {
        if !self.reserved.insert(task_id.to_string()) {
            return Err(ConstructionError::DuplicateTaskId {
                task_id: task_id.to_string(),
                question_id: question_id.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn count(&self) -> usize {
        self.reserved.len()
    }
}

/// One question routed to one chunk. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutableTask {
    pub task_id: String,
    pub question_id: String,
    pub question_global: u16,
    pub policy_area_id: String,
    pub dimension_id: String,
    pub chunk_id: String,
    pub patterns: Vec<Value>,
    pub signals: BTreeMap<String, Value>,
    pub creation_timestamp: DateTime<Utc>,
    pub expected_elements: Vec<Value>,
    pub metadata: BTreeMap<String, Value>,
}

impl ExecutableTask {
    /// Build a task for `question` routed to `chunk`.
    ///
    /// The id is reserved before any other field is checked, so a failure
    /// later in construction still leaves the id taken for this pass.
    pub fn build(
        question: &Question,
        chunk: &DocumentChunk,
        reservations: &mut TaskIdReservations,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ConstructionError> {
        let question_global =
            parse_question_global(&question.question_id, question.question_global.as_ref())?;
        let task_id = task_id_for(question_global, &chunk.policy_area_id);
        reservations.reserve(&task_id, &question.question_id)?;

        if chunk.chunk_id.trim().is_empty() {
            return Err(ConstructionError::EmptyField {
                question_id: question.question_id.clone(),
                field: "chunk_id",
            });
        }
        if question.dimension_id.trim().is_empty() {
            return Err(ConstructionError::EmptyField {
                question_id: question.question_id.clone(),
                field: "dimension_id",
            });
        }

        let mut metadata = BTreeMap::new();
        if let Some(slot) = &question.base_slot {
            metadata.insert("base_slot".to_string(), Value::String(slot.clone()));
        }
        metadata.insert("chunk_position".to_string(), Value::from(chunk.position));

        Ok(Self {
            task_id,
            question_id: question.question_id.clone(),
            question_global,
            policy_area_id: chunk.policy_area_id.clone(),
            dimension_id: question.dimension_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            patterns: question.patterns.clone(),
            signals: question.signals.clone(),
            creation_timestamp: created_at,
            expected_elements: question.expected_elements.clone(),
            metadata,
        })
    }

    /// Digest of the task's content, excluding its creation timestamp.
    pub fn fingerprint(&self) -> String {
        hash_json(&serde_json::json!({
            "task_id": self.task_id,
            "question_id": self.question_id,
            "question_global": self.question_global,
            "policy_area_id": self.policy_area_id,
            "dimension_id": self.dimension_id,
            "chunk_id": self.chunk_id,
            "patterns": self.patterns,
            "signals": self.signals,
            "expected_elements": self.expected_elements,
            "metadata": self.metadata,
        }))
    }
}
