//! Method trait and common types.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use assay_core::{DocumentChunk, ExecutableTask, MethodExecutionError};

/// Errors a method may raise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MethodError {
    #[error("invalid task input: {0}")]
    InvalidInput(String),

    #[error("method failed: {0}")]
    Failed(String),

    #[error("method panicked: {0}")]
    Panicked(String),
}

impl MethodError {
    /// Attach the method and task the failure belongs to.
    pub fn into_execution_error(self, method: &str, task_id: &str) -> MethodExecutionError {
        MethodExecutionError {
            method: method.to_string(),
            task_id: task_id.to_string(),
            message: self.to_string(),
        }
    }
}

/// Everything a method may read while executing one task.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    pub task: &'a ExecutableTask,
    pub chunk: &'a DocumentChunk,
    pub document_id: &'a str,
}

/// An opaque analytic capability.
///
/// # Isolation Contract
/// - MUST NOT hold mutable state shared across tasks
/// - MUST NOT read anything besides the supplied context
/// - MUST return the same output for the same context
///
/// Output is any JSON value. A bare number or an object with a numeric
/// `score` field (0..=3) contributes to the task score.
#[async_trait]
pub trait Method: Send + Sync {
    /// Name the questionnaire binds this method by.
    fn name(&self) -> &str;

    async fn invoke(&self, context: &MethodContext<'_>) -> Result<Value, MethodError>;
}
