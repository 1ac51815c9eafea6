//! Questionnaire parsing from YAML/JSON.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_questionnaire_schema;
use crate::error::ValidationError;

lazy_static! {
    static ref QUESTION_ID: Regex = Regex::new(r"^Q\d{3}$").unwrap();
    static ref POLICY_AREA_ID: Regex = Regex::new(r"^PA\d{2}$").unwrap();
    static ref DIMENSION_ID: Regex = Regex::new(r"^DIM\d{2}$").unwrap();
    static ref CLUSTER_ID: Regex = Regex::new(r"^CL\d{2}$").unwrap();
}

/// Errors that can occur when loading a questionnaire.
#[derive(Error, Debug)]
pub enum QuestionnaireError {
    #[error("Failed to read questionnaire {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl From<QuestionnaireError> for ValidationError {
    fn from(err: QuestionnaireError) -> Self {
        match err {
            QuestionnaireError::Io { path, source } => ValidationError::Io {
                path,
                message: source.to_string(),
            },
            QuestionnaireError::Yaml(e) => ValidationError::Parse {
                source_name: "questionnaire".to_string(),
                message: e.to_string(),
            },
            QuestionnaireError::Json(e) => ValidationError::Parse {
                source_name: "questionnaire".to_string(),
                message: e.to_string(),
            },
            QuestionnaireError::Invalid(e) => e,
        }
    }
}

/// An analytic dimension (e.g. "DIM03").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimension {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A policy area; belongs to exactly one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyArea {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One atomic question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// Unique identifier (e.g. "Q007")
    pub question_id: String,

    /// Global ordinal. Kept raw so the planner can name the offending
    /// question when it is missing or out of range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_global: Option<Value>,

    pub policy_area_id: String,
    pub dimension_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_slot: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Method names, invoked in declared order.
    pub methods: Vec<String>,

    #[serde(default)]
    pub patterns: Vec<Value>,

    #[serde(default)]
    pub expected_elements: Vec<Value>,

    #[serde(default)]
    pub signals: BTreeMap<String, Value>,
}

/// A validated questionnaire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Questionnaire {
    /// Version of this questionnaire (semver-like)
    pub questionnaire_version: String,

    /// Version of the questionnaire schema (date-based)
    pub schema_version: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub dimensions: Vec<Dimension>,
    pub policy_areas: Vec<PolicyArea>,
    pub clusters: Vec<Cluster>,
    pub questions: Vec<Question>,
}

impl Questionnaire {
    /// Parse a questionnaire from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, QuestionnaireError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a questionnaire from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, QuestionnaireError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a questionnaire from a file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QuestionnaireError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| QuestionnaireError::Io {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: Value) -> Result<Self, QuestionnaireError> {
        validate_questionnaire_schema(&value).map_err(|errors| ValidationError::Schema { errors })?;
        let questionnaire: Questionnaire = serde_json::from_value(value)?;
        questionnaire.validate()?;
        Ok(questionnaire)
    }

    /// Validate the questionnaire structure.
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".to_string(),
            });
        }
        if self.questions.is_empty() {
            return Err(ValidationError::EmptyInput {
                what: "questions".to_string(),
            });
        }

        let clusters = unique_ids("cluster", &CLUSTER_ID, self.clusters.iter().map(|c| &c.id))?;
        let dimensions = unique_ids("dimension", &DIMENSION_ID, self.dimensions.iter().map(|d| &d.id))?;
        let policy_areas = unique_ids(
            "policy area",
            &POLICY_AREA_ID,
            self.policy_areas.iter().map(|p| &p.id),
        )?;

        for area in &self.policy_areas {
            if !clusters.contains(area.cluster_id.as_str()) {
                return Err(ValidationError::UnknownReference {
                    kind: "cluster",
                    id: area.cluster_id.clone(),
                    referenced_by: area.id.clone(),
                });
            }
        }

        unique_ids("question", &QUESTION_ID, self.questions.iter().map(|q| &q.question_id))?;

        for question in &self.questions {
            if !policy_areas.contains(question.policy_area_id.as_str()) {
                return Err(ValidationError::UnknownReference {
                    kind: "policy area",
                    id: question.policy_area_id.clone(),
                    referenced_by: question.question_id.clone(),
                });
            }
            if !dimensions.contains(question.dimension_id.as_str()) {
                return Err(ValidationError::UnknownReference {
                    kind: "dimension",
                    id: question.dimension_id.clone(),
                    referenced_by: question.question_id.clone(),
                });
            }
            if question.methods.iter().any(|m| m.trim().is_empty()) {
                return Err(ValidationError::MissingField {
                    field: format!("{}.methods[]", question.question_id),
                });
            }
        }

        Ok(())
    }

    /// Cluster that owns a policy area.
    pub fn cluster_of(&self, policy_area_id: &str) -> Option<&str> {
        self.policy_areas
            .iter()
            .find(|p| p.id == policy_area_id)
            .map(|p| p.cluster_id.as_str())
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }

    /// Number of questions per (policy area, dimension) pair.
    pub fn questions_per_cell(&self) -> BTreeMap<(String, String), usize> {
        let mut cells = BTreeMap::new();
        for q in &self.questions {
            *cells
                .entry((q.policy_area_id.clone(), q.dimension_id.clone()))
                .or_insert(0) += 1;
        }
        cells
    }

    /// Every method name referenced by any question.
    pub fn referenced_methods(&self) -> BTreeSet<&str> {
        self.questions
            .iter()
            .flat_map(|q| q.methods.iter().map(String::as_str))
            .collect()
    }
}

fn unique_ids<'a>(
    kind: &'static str,
    shape: &Regex,
    ids: impl Iterator<Item = &'a String>,
) -> Result<BTreeSet<&'a str>, ValidationError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !shape.is_match(id) {
            return Err(ValidationError::InvalidIdentifier {
                kind,
                id: id.clone(),
            });
        }
        if !seen.insert(id.as_str()) {
            return Err(ValidationError::DuplicateId {
                kind,
                id: id.clone(),
            });
        }
    }
    Ok(seen)
}
