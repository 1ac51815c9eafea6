//! The read-only run context threaded through every phase.
//!
//! A [`RunContext`] has no setters. Its digest is computed at construction and
//! re-checked whenever the context is deserialized or [`RunContext::verify`]
//! is called, so an edited copy is rejected instead of silently used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::hash_json;
use crate::error::IntegrityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextFields {
    document_id: String,
    correlation_id: String,
    snapshot_digest: String,
    config: Value,
    created_at: DateTime<Utc>,
}

impl ContextFields {
    fn digest(&self) -> String {
        hash_json(&serde_json::json!({
            "document_id": self.document_id,
            "correlation_id": self.correlation_id,
            "snapshot_digest": self.snapshot_digest,
            "config": self.config,
            "created_at": self.created_at.to_rfc3339(),
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawRunContext {
    #[serde(flatten)]
    fields: ContextFields,
    digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRunContext")]
pub struct RunContext {
    #[serde(flatten)]
    fields: ContextFields,
    digest: String,
}

impl PartialEq for ContextFields {
    fn eq(&self, other: &Self) -> bool {
        self.digest() == other.digest()
    }
}

impl TryFrom<RawRunContext> for RunContext {
    type Error = IntegrityError;

    fn try_from(raw: RawRunContext) -> Result<Self, Self::Error> {
        let context = RunContext {
            fields: raw.fields,
            digest: raw.digest,
        };
        context.verify()?;
        Ok(context)
    }
}

impl RunContext {
    pub fn builder(document_id: impl Into<String>) -> RunContextBuilder {
        RunContextBuilder {
            document_id: document_id.into(),
            correlation_id: None,
            snapshot_digest: String::new(),
            config: Value::Null,
            created_at: None,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.fields.document_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.fields.correlation_id
    }

    pub fn snapshot_digest(&self) -> &str {
        &self.fields.snapshot_digest
    }

    pub fn config(&self) -> &Value {
        &self.fields.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.fields.created_at
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Recompute the digest and compare it with the frozen one.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let actual = self.fields.digest();
        if actual != self.digest {
            return Err(IntegrityError::ContextTampered {
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

pub struct RunContextBuilder {
    document_id: String,
    correlation_id: Option<String>,
    snapshot_digest: String,
    config: Value,
    created_at: Option<DateTime<Utc>>,
}

impl RunContextBuilder {
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn snapshot_digest(mut self, digest: impl Into<String>) -> Self {
        self.snapshot_digest = digest.into();
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Freeze the context. The correlation id defaults to a digest of the
    /// document id and snapshot, so identical inputs share one.
    pub fn build(self) -> RunContext {
        let correlation_id = self.correlation_id.unwrap_or_else(|| {
            let digest = hash_json(&serde_json::json!([self.document_id, self.snapshot_digest]));
            format!("run-{}", &digest[..16])
        });
        let fields = ContextFields {
            document_id: self.document_id,
            correlation_id,
            snapshot_digest: self.snapshot_digest,
            config: self.config,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        };
        let digest = fields.digest();
        RunContext { fields, digest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> RunContext {
        RunContext::builder("doc-1")
            .snapshot_digest("abc")
            .config(json!({"workers": 4}))
            .build()
    }

    #[test]
    fn test_context_roundtrips_through_json() {
        let ctx = context();
        ctx.verify().unwrap();
        assert!(ctx.correlation_id().starts_with("run-"));

        let json = serde_json::to_string(&ctx).unwrap();
        let back: RunContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.digest(), ctx.digest());
        assert_eq!(back.config()["workers"], json!(4));
    }

    #[test]
    fn test_edited_context_is_rejected() {
        let mut value = serde_json::to_value(context()).unwrap();
        value["config"]["workers"] = json!(64);
        let err = serde_json::from_value::<RunContext>(value).unwrap_err();
        assert!(err.to_string().contains("does not match frozen digest"));
    }

    #[test]
    fn test_default_correlation_id_is_deterministic() {
        let a = RunContext::builder("doc").snapshot_digest("s").build();
        let b = RunContext::builder("doc").snapshot_digest("s").build();
        assert_eq!(a.correlation_id(), b.correlation_id());
        let c = RunContext::builder("doc").correlation_id("explicit").build();
        assert_eq!(c.correlation_id(), "explicit");
    }
}
