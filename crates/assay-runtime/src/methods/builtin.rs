//! Built-in pattern methods.
//!
//! Each method reads the task's patterns or expected elements and the routed
//! chunk text, and reports a score on the 0..=3 scale.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use super::traits::{Method, MethodContext, MethodError};

const SCORE_MAX: f64 = 3.0;

/// A pattern is either a bare string or `{"pattern": "..."}`.
fn pattern_source(value: &Value) -> Option<&str> {
    value
        .as_str()
        .or_else(|| value.get("pattern").and_then(Value::as_str))
}

fn compile_patterns(patterns: &[Value]) -> Result<Vec<(String, Regex)>, MethodError> {
    patterns
        .iter()
        .filter_map(pattern_source)
        .map(|source| {
            RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .map(|regex| (source.to_string(), regex))
                .map_err(|e| MethodError::InvalidInput(format!("pattern '{source}': {e}")))
        })
        .collect()
}

/// Fraction of task patterns found in the chunk, scaled to 0..=3.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternPresence;

#[async_trait]
impl Method for PatternPresence {
    fn name(&self) -> &str {
        "pattern_presence"
    }

    async fn invoke(&self, context: &MethodContext<'_>) -> Result<Value, MethodError> {
        let patterns = compile_patterns(&context.task.patterns)?;
        if patterns.is_empty() {
            return Ok(json!({"score": null, "matched": [], "total": 0}));
        }

        let matched: Vec<&str> = patterns
            .iter()
            .filter(|(_, regex)| regex.is_match(&context.chunk.text))
            .map(|(source, _)| source.as_str())
            .collect();
        let score = SCORE_MAX * matched.len() as f64 / patterns.len() as f64;

        Ok(json!({
            "score": score,
            "matched": matched,
            "total": patterns.len(),
        }))
    }
}

/// Total pattern hits in the chunk, one point per hit up to 3.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDensity;

#[async_trait]
impl Method for PatternDensity {
    fn name(&self) -> &str {
        "pattern_density"
    }

    async fn invoke(&self, context: &MethodContext<'_>) -> Result<Value, MethodError> {
        let patterns = compile_patterns(&context.task.patterns)?;
        if patterns.is_empty() {
            return Ok(json!({"score": null, "hits": 0}));
        }

        let hits: usize = patterns
            .iter()
            .map(|(_, regex)| regex.find_iter(&context.chunk.text).count())
            .sum();

        Ok(json!({
            "score": (hits as f64).min(SCORE_MAX),
            "hits": hits,
        }))
    }
}

/// Fraction of expected elements mentioned in the chunk, scaled to 0..=3.
///
/// An element is a bare string or an object with an `element` or `type`
/// field; matching is a case-insensitive substring test.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedElements;

fn element_label(value: &Value) -> Option<&str> {
    value
        .as_str()
        .or_else(|| value.get("element").and_then(Value::as_str))
        .or_else(|| value.get("type").and_then(Value::as_str))
}

#[async_trait]
impl Method for ExpectedElements {
    fn name(&self) -> &str {
        "expected_elements"
    }

    async fn invoke(&self, context: &MethodContext<'_>) -> Result<Value, MethodError> {
        let elements: Vec<&str> = context
            .task
            .expected_elements
            .iter()
            .filter_map(element_label)
            .collect();
        if elements.is_empty() {
            return Ok(json!({"score": null, "found": [], "missing": []}));
        }

        let haystack = context.chunk.text.to_lowercase();
        let (found, missing): (Vec<&str>, Vec<&str>) = elements
            .iter()
            .copied()
            .partition(|label| haystack.contains(&label.to_lowercase()));
        let score = SCORE_MAX * found.len() as f64 / elements.len() as f64;

        Ok(json!({
            "score": score,
            "found": found,
            "missing": missing,
        }))
    }
}
