//! Questionnaire parsing and validation.
//!
//! A questionnaire is structured data validated against
//! `schema/questionnaire.schema.json`. This module handles parsing YAML/JSON
//! questionnaires, validating them, and answering the structural lookups the
//! planner and aggregation engine need.

mod parser;
mod schema;

pub use parser::{
    Cluster, Dimension, PolicyArea, Question, Questionnaire, QuestionnaireError,
};
pub use schema::{validate_questionnaire_schema, SchemaError};
