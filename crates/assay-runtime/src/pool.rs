//! Bounded worker pool for task dispatch.
//!
//! At most `workers` tasks execute at once. Each worker dispatches its task
//! and hands the candidate to the ledger writer. The abort signal is checked
//! before every new task; tasks already running still commit.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use assay_core::{AppendOutcome, AssayError, ExecutableTask};

use crate::abort::AbortSignal;
use crate::dispatch::Dispatcher;
use crate::ledger_writer::LedgerHandle;

/// What one dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub committed: usize,
    pub duplicates: usize,
    /// Task ids whose evidence is degraded, sorted.
    pub degraded: Vec<String>,
    /// Tasks never started because the run was aborted.
    pub not_started: usize,
}

/// A dispatch pass that stopped before every task ran.
#[derive(Debug)]
pub struct PoolStopped {
    pub error: AssayError,
    /// What was committed before and while the pass drained.
    pub report: PoolReport,
}

struct Completed {
    task_id: String,
    degraded: bool,
    outcome: AppendOutcome,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Dispatch every task and commit its evidence.
    ///
    /// # Arguments
    ///
    /// * `tasks` - Planned tasks, dispatched in order.
    /// * `dispatcher` - Shared executor for one task at a time.
    /// * `ledger` - Handle to the single ledger writer.
    /// * `abort` - Checked before each task is started.
    ///
    /// # Returns
    ///
    /// Commit counts and the sorted ids of degraded tasks.
    ///
    /// # Errors
    ///
    /// The first abort-class error (unknown chunk, ledger conflict) stops
    /// further dispatch; a raised abort signal does the same and yields
    /// `Cancelled`. Either way in-flight work drains and commits first, and
    /// the returned [`PoolStopped`] carries the partial report.
    pub async fn run(
        &self,
        tasks: Vec<ExecutableTask>,
        dispatcher: Arc<Dispatcher>,
        ledger: LedgerHandle,
        abort: &AbortSignal,
    ) -> Result<PoolReport, PoolStopped> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set: JoinSet<Result<Completed, AssayError>> = JoinSet::new();
        let mut report = PoolReport::default();
        let mut failure: Option<AssayError> = None;
        let total = tasks.len();
        let mut started = 0;

        info!(tasks = total, workers = self.workers, "dispatch started");

        for task in tasks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            while let Some(joined) = set.try_join_next() {
                absorb(joined, &mut report, &mut failure);
            }
            if failure.is_some() || abort.is_aborted() {
                break;
            }

            let dispatcher = Arc::clone(&dispatcher);
            let ledger = ledger.clone();
            started += 1;
            set.spawn(async move {
                let _permit = permit;
                let candidate = dispatcher.execute(&task).await?;
                let degraded = candidate.is_degraded();
                let (_, outcome) = ledger.append(candidate).await?;
                Ok(Completed {
                    task_id: task.task_id,
                    degraded,
                    outcome,
                })
            });
        }

        while let Some(joined) = set.join_next().await {
            absorb(joined, &mut report, &mut failure);
        }
        report.not_started = total - started;
        report.degraded.sort();

        if let Some(error) = failure.or_else(|| abort.check().err()) {
            warn!(error = %error, not_started = report.not_started, "dispatch stopped");
            return Err(PoolStopped { error, report });
        }

        info!(
            committed = report.committed,
            duplicates = report.duplicates,
            degraded = report.degraded.len(),
            "dispatch complete"
        );
        Ok(report)
    }
}

fn absorb(
    joined: Result<Result<Completed, AssayError>, JoinError>,
    report: &mut PoolReport,
    failure: &mut Option<AssayError>,
) {
    let result = joined.unwrap_or_else(|e| {
        Err(AssayError::Cancelled {
            reason: format!("worker task failed: {e}"),
        })
    });
    match result {
        Ok(done) => {
            match done.outcome {
                AppendOutcome::Committed => report.committed += 1,
                AppendOutcome::Duplicate => report.duplicates += 1,
            }
            if done.degraded {
                report.degraded.push(done.task_id.clone());
            }
            debug!(task_id = %done.task_id, "task committed");
        }
        Err(err) => {
            if failure.is_none() {
                *failure = Some(err);
            }
        }
    }
}
