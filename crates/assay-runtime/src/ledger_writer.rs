//! Single-writer ledger task.
//!
//! One tokio task owns the [`EvidenceLedger`]; workers send candidates over a
//! bounded channel and wait for the committed record on a oneshot reply. The
//! chain stays linear because only the owner ever appends.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use assay_core::{AppendOutcome, AssayError, Evidence, EvidenceCandidate, EvidenceLedger, IntegrityError};

type Reply = oneshot::Sender<Result<(Evidence, AppendOutcome), IntegrityError>>;

struct AppendRequest {
    candidate: EvidenceCandidate,
    reply: Reply,
}

/// Cloneable sender side.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<AppendRequest>,
}

fn writer_closed() -> AssayError {
    AssayError::Integrity(IntegrityError::Storage {
        what: "ledger writer".to_string(),
        message: "writer task is no longer running".to_string(),
    })
}

impl LedgerHandle {
    /// Submit a candidate and wait for the ledger's answer.
    pub async fn append(
        &self,
        candidate: EvidenceCandidate,
    ) -> Result<(Evidence, AppendOutcome), AssayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AppendRequest { candidate, reply })
            .await
            .map_err(|_| writer_closed())?;
        let result = rx.await.map_err(|_| writer_closed())?;
        Ok(result?)
    }
}

pub struct LedgerWriter {
    handle: LedgerHandle,
    join: JoinHandle<EvidenceLedger>,
}

impl LedgerWriter {
    /// Spawn the writer over an existing ledger.
    pub fn spawn(mut ledger: EvidenceLedger, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AppendRequest>(capacity.max(1));
        let join = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = ledger.append_with_outcome(request.candidate);
                // The submitter may have gone away; the commit stands regardless.
                let _ = request.reply.send(result);
            }
            debug!(records = ledger.len(), "ledger writer drained");
            ledger
        });
        Self {
            handle: LedgerHandle { tx },
            join,
        }
    }

    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Close the channel and take the ledger back once every queued append
    /// has been applied. Outstanding handles keep the writer alive.
    pub async fn finish(self) -> Result<EvidenceLedger, AssayError> {
        drop(self.handle);
        self.join.await.map_err(|e| AssayError::Integrity(IntegrityError::Storage {
            what: "ledger writer".to_string(),
            message: e.to_string(),
        }))
    }
}
