//! Shared fixture: ten policy areas by six dimensions, five questions per
//! cell, one chunk per cell.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::Path;

use assay_runtime::{InputFormat, InputSource, PipelineInputs, PipelineOrchestrator, RuntimeConfig};

pub const POLICY_AREAS: u16 = 10;
pub const DIMENSIONS: u16 = 6;
pub const QUESTIONS_PER_CELL: u16 = 5;
pub const QUESTION_COUNT: usize = (POLICY_AREAS * DIMENSIONS * QUESTIONS_PER_CELL) as usize;

const KEYWORDS: [&str; 6] = ["baseline", "target", "budget", "indicator", "timeline", "owner"];

pub fn cluster_of(policy_area: u16) -> &'static str {
    match policy_area {
        1..=3 => "CL01",
        4..=6 => "CL02",
        7..=8 => "CL03",
        _ => "CL04",
    }
}

pub fn questionnaire() -> Value {
    let dimensions: Vec<Value> = (1..=DIMENSIONS).map(|d| json!({"id": format!("DIM{d:02}")})).collect();
    let policy_areas: Vec<Value> = (1..=POLICY_AREAS)
        .map(|p| json!({"id": format!("PA{p:02}"), "cluster_id": cluster_of(p)}))
        .collect();
    let clusters: Vec<Value> = ["CL01", "CL02", "CL03", "CL04"]
        .iter()
        .map(|c| json!({"id": c}))
        .collect();

    let mut questions = Vec::with_capacity(QUESTION_COUNT);
    for p in 1..=POLICY_AREAS {
        for d in 1..=DIMENSIONS {
            for k in 0..QUESTIONS_PER_CELL {
                let global = ((p - 1) * DIMENSIONS + (d - 1)) * QUESTIONS_PER_CELL + k + 1;
                let keyword = KEYWORDS[usize::from((d + k) % DIMENSIONS)];
                questions.push(json!({
                    "question_id": format!("Q{global:03}"),
                    "question_global": global,
                    "policy_area_id": format!("PA{p:02}"),
                    "dimension_id": format!("DIM{d:02}"),
                    "methods": ["pattern_presence", "pattern_density"],
                    "patterns": [keyword, "indicator"],
                    "expected_elements": [keyword],
                }));
            }
        }
    }

    json!({
        "questionnaire_version": "2.1",
        "schema_version": "2026-01-15",
        "name": "Municipal development plan review",
        "dimensions": dimensions,
        "policy_areas": policy_areas,
        "clusters": clusters,
        "questions": questions,
    })
}

pub fn document() -> Value {
    let mut chunks = Vec::new();
    for p in 1..=POLICY_AREAS {
        for d in 1..=DIMENSIONS {
            let position = u32::from((p - 1) * DIMENSIONS + (d - 1));
            let keyword = KEYWORDS[usize::from((p + d) % DIMENSIONS)];
            chunks.push(json!({
                "chunk_id": format!("chunk-PA{p:02}-DIM{d:02}"),
                "policy_area_id": format!("PA{p:02}"),
                "dimension_id": format!("DIM{d:02}"),
                "text": format!("Section {position}: the {keyword} is stated and one indicator is tracked."),
                "position": position,
            }));
        }
    }
    json!({"document_id": "plan-2026", "chunks": chunks})
}

pub fn inputs_from(questionnaire: &Value, document: &Value) -> PipelineInputs {
    PipelineInputs::new(
        InputSource::new("questionnaire", InputFormat::Json, questionnaire.to_string()),
        InputSource::new("plan-2026", InputFormat::Json, document.to_string()),
    )
}

pub fn inputs() -> PipelineInputs {
    inputs_from(&questionnaire(), &document())
}

pub fn orchestrator(dir: &Path, config: RuntimeConfig) -> PipelineOrchestrator {
    PipelineOrchestrator::builder()
        .config(config)
        .artifacts_dir(dir)
        .build()
        .unwrap()
}
