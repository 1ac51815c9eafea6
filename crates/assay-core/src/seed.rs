//! Deterministic seeds derived from run identity.
//!
//! Every random draw in a run (bootstrap resampling, permutation checks) is
//! seeded from `SHA-256("<document_id>:<correlation_id>:<component>")`, so
//! identical inputs always replay identically.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One issued seed, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRecord {
    pub component: String,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct SeedRegistry {
    document_id: String,
    correlation_id: String,
    issued: BTreeMap<String, u64>,
}

impl SeedRegistry {
    pub fn new(document_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            correlation_id: correlation_id.into(),
            issued: BTreeMap::new(),
        }
    }

    /// Seed for a component. Repeated calls return the same value.
    pub fn seed_for(&mut self, component: &str) -> u64 {
        let seed = derive_seed(&self.document_id, &self.correlation_id, component);
        self.issued.insert(component.to_string(), seed);
        seed
    }

    /// Issued seeds, ordered by component.
    pub fn audit_log(&self) -> Vec<SeedRecord> {
        self.issued
            .iter()
            .map(|(component, seed)| SeedRecord {
                component: component.clone(),
                seed: *seed,
            })
            .collect()
    }
}

/// First eight bytes, big-endian, of the SHA-256 of the seed material.
pub fn derive_seed(document_id: &str, correlation_id: &str, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{document_id}:{correlation_id}:{component}").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
