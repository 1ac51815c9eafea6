//! Ingested document model and chunk routing.
//!
//! A document arrives pre-chunked: each chunk is tagged with the policy area
//! and dimension it speaks to. The [`ChunkRouter`] resolves a question's
//! `(policy_area_id, dimension_id)` cell to exactly one chunk.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::ValidationError;

/// One routed slice of the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub policy_area_id: String,
    pub dimension_id: String,
    pub text: String,
    /// Ordinal position within the source document.
    #[serde(default)]
    pub position: u32,
}

/// An immutable, pre-chunked document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub document_id: String,
    pub chunks: Vec<DocumentChunk>,
}

impl Document {
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let doc: Document = serde_json::from_str(json).map_err(|e| ValidationError::Parse {
            source_name: "document".to_string(),
            message: e.to_string(),
        })?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ValidationError> {
        let doc: Document = serde_yaml::from_str(yaml).map_err(|e| ValidationError::Parse {
            source_name: "document".to_string(),
            message: e.to_string(),
        })?;
        doc.validate()?;
        Ok(doc)
    }

    /// Load a document, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ValidationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.document_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "document_id".to_string(),
            });
        }
        if self.chunks.is_empty() {
            return Err(ValidationError::EmptyInput {
                what: format!("document {}", self.document_id),
            });
        }

        let mut ids = BTreeSet::new();
        let mut cells = BTreeSet::new();
        for chunk in &self.chunks {
            if chunk.chunk_id.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "chunks[].chunk_id".to_string(),
                });
            }
            if !ids.insert(chunk.chunk_id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    kind: "chunk",
                    id: chunk.chunk_id.clone(),
                });
            }
            // Two chunks on one cell would make routing order-dependent.
            if !cells.insert((chunk.policy_area_id.as_str(), chunk.dimension_id.as_str())) {
                return Err(ValidationError::DuplicateId {
                    kind: "chunk route",
                    id: format!("{}/{}", chunk.policy_area_id, chunk.dimension_id),
                });
            }
        }
        Ok(())
    }
}

/// Deterministic `(policy_area_id, dimension_id) -> chunk` lookup.
#[derive(Debug)]
pub struct ChunkRouter<'a> {
    document: &'a Document,
    routes: BTreeMap<(String, String), usize>,
}

impl<'a> ChunkRouter<'a> {
    pub fn new(document: &'a Document) -> Self {
        let routes = document
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| ((c.policy_area_id.clone(), c.dimension_id.clone()), i))
            .collect();
        Self { document, routes }
    }

    /// The chunk serving a cell, if one exists and carries an id.
    pub fn route(&self, policy_area_id: &str, dimension_id: &str) -> Option<&'a DocumentChunk> {
        let key = (policy_area_id.to_string(), dimension_id.to_string());
        let chunk = self.document.chunks.get(*self.routes.get(&key)?)?;
        if chunk.chunk_id.is_empty() || chunk.policy_area_id.is_empty() {
            return None;
        }
        Some(chunk)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
