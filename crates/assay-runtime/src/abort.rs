//! Cooperative abort signal.
//!
//! Checked between tasks and at every phase boundary. Work already in flight
//! finishes and commits; nothing new starts.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use assay_core::AssayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortReason {
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    reason: Mutex<Option<AbortReason>>,
}

/// Cloneable handle; all clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. The first reason wins.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            let reason = reason.into();
            warn!(reason = %reason, "abort requested");
            *slot = Some(AbortReason {
                reason,
                at: Utc::now(),
            });
        }
        self.inner.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.inner.reason.lock().clone()
    }

    /// `Err(Cancelled)` once the signal is raised.
    pub fn check(&self) -> Result<(), AssayError> {
        if !self.is_aborted() {
            return Ok(());
        }
        let reason = self
            .reason()
            .map(|r| r.reason)
            .unwrap_or_else(|| "abort requested".to_string());
        Err(AssayError::Cancelled { reason })
    }
}
