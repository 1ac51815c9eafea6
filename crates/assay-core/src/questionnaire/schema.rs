//! JSON Schema gate for questionnaires.
//!
//! The schema in `schema/questionnaire.schema.json` is embedded at compile
//! time and compiled on first use. It checks shape only: identifier formats,
//! cross references and `question_global` are left to structural validation
//! and the planner, whose errors name the offending question.

use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

const QUESTIONNAIRE_SCHEMA: &str = include_str!("../../../../schema/questionnaire.schema.json");

/// Cap on violations reported per call.
const MAX_REPORTED: usize = 20;

static VALIDATOR: OnceLock<Result<jsonschema::Validator, SchemaError>> = OnceLock::new();

#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    #[error("embedded questionnaire schema is not valid JSON: {0}")]
    Malformed(String),

    #[error("embedded questionnaire schema failed to compile: {0}")]
    Uncompilable(String),
}

fn compile() -> Result<jsonschema::Validator, SchemaError> {
    let schema: Value =
        serde_json::from_str(QUESTIONNAIRE_SCHEMA).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    jsonschema::options()
        .build(&schema)
        .map_err(|e| SchemaError::Uncompilable(e.to_string()))
}

fn validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    VALIDATOR.get_or_init(compile).as_ref().map_err(Clone::clone)
}

/// Check a raw questionnaire value, returning each violation with its
/// instance path.
pub fn validate_questionnaire_schema(value: &Value) -> Result<(), Vec<String>> {
    let validator = validator().map_err(|e| vec![e.to_string()])?;

    let mut violations = validator.iter_errors(value).map(|e| {
        let path = e.instance_path.to_string();
        let at = if path.is_empty() { "/" } else { path.as_str() };
        format!("{e} at {at}")
    });
    let mut reported: Vec<String> = violations.by_ref().take(MAX_REPORTED).collect();
    let remaining = violations.count();
    if remaining > 0 {
        reported.push(format!("... and {remaining} more"));
    }

    if reported.is_empty() {
        Ok(())
    } else {
        Err(reported)
    }
}
