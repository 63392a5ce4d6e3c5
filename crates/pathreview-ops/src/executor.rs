//! Remote execution of edits and the serial mutation worker.

use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use pathreview_api::{ApiResult, RetryScope, ReviewApi};
use pathreview_core::{BackendId, MigrationPhase, NodeKey};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::MUTATION_CHANNEL_SIZE;
use crate::bulk::{BulkEdit, BulkReport, submit_bulk, wait_for_task};
use crate::error::MutationError;
use crate::operation::{Mutation, MutationKind};

/// Issues the backend calls for validated edits.
#[derive(Clone)]
pub struct MutationExecutor {
    api: Arc<dyn ReviewApi>,
    migration: CompactString,
}

impl std::fmt::Debug for MutationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationExecutor")
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}

impl MutationExecutor {
    pub fn new(api: Arc<dyn ReviewApi>, migration: impl Into<CompactString>) -> Self {
        Self {
            api,
            migration: migration.into(),
        }
    }

    pub fn api(&self) -> &dyn ReviewApi {
        self.api.as_ref()
    }

    pub fn migration(&self) -> &str {
        &self.migration
    }

    async fn call(&self, kind: MutationKind, id: &BackendId, scope: RetryScope) -> ApiResult<()> {
        let migration = self.migration.as_str();
        match kind {
            MutationKind::Exclude => self.api.exclude_node(migration, id).await,
            MutationKind::Unexclude => self.api.unexclude_node(migration, id).await,
            MutationKind::MarkRetry => self.api.mark_for_retry(migration, id, scope).await,
            MutationKind::UnmarkRetry => self.api.unmark_for_retry(migration, id, scope).await,
        }
    }

    /// Send `mutation` to every side it addresses, primary first.
    ///
    /// If the secondary call fails after the primary succeeded, the primary
    /// is reverted with the inverse edit so both sides end up unchanged.
    pub async fn execute(&self, mutation: &Mutation) -> Result<(), MutationError> {
        let (kind, scope, phase) = (mutation.kind, mutation.scope, mutation.phase);
        let (primary_side, primary) = &mutation.targets.primary;

        self.call(kind, primary, scope)
            .await
            .map_err(|err| MutationError::from_remote(*primary_side, kind, phase, err))?;

        let Some((secondary_side, secondary)) = &mutation.targets.secondary else {
            return Ok(());
        };
        let Err(err) = self.call(kind, secondary, scope).await else {
            return Ok(());
        };

        tracing::warn!(
            target: "mutation",
            node = %mutation.node,
            side = %secondary_side,
            error = %err,
            "Secondary edit failed, reverting primary"
        );
        let compensated = match self.call(kind.inverse(), primary, scope).await {
            Ok(()) => true,
            Err(revert) => {
                tracing::error!(
                    target: "mutation",
                    node = %mutation.node,
                    error = %revert,
                    "Could not revert primary side"
                );
                false
            }
        };
        Err(MutationError::PartialFailure {
            source: err,
            compensated,
        })
    }
}

/// Work accepted by the mutation worker.
#[derive(Debug, Clone)]
pub enum MutationJob {
    Node { seq: u64, mutation: Mutation },
    Bulk {
        edit: BulkEdit,
        phase: MigrationPhase,
    },
}

/// Events emitted by the mutation worker.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    /// A single-node edit finished.
    Settled {
        seq: u64,
        node: NodeKey,
        kind: MutationKind,
        result: Result<(), MutationError>,
    },
    /// The backend deferred a bulk edit to a background task.
    BulkQueued { id: u64, task: CompactString },
    /// A bulk edit finished, inline or through its task.
    BulkSettled {
        id: u64,
        result: Result<BulkReport, MutationError>,
    },
}

/// Handle to a running mutation worker.
#[derive(Debug, Clone)]
pub struct MutationWorker {
    jobs: mpsc::Sender<MutationJob>,
    cancel: CancellationToken,
}

impl MutationWorker {
    /// Queue a job. Jobs run one at a time in submission order.
    pub async fn submit(&self, job: MutationJob) -> Result<(), MutationError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| MutationError::WorkerStopped)
    }

    /// Stop the worker and any background task polling it started.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.jobs.is_closed()
    }
}

/// Start the serial mutation worker.
///
/// Remote calls of queued edits never interleave; bulk tasks are polled
/// every `task_interval` off the queue so later edits are not held up.
pub fn start_mutation_worker(
    executor: MutationExecutor,
    task_interval: Duration,
) -> (MutationWorker, mpsc::Receiver<MutationEvent>) {
    let (job_tx, mut job_rx) = mpsc::channel::<MutationJob>(MUTATION_CHANNEL_SIZE);
    let (tx, rx) = mpsc::channel(MUTATION_CHANNEL_SIZE);
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();

    tokio::spawn(async move {
        loop {
            let job = tokio::select! {
                _ = worker_cancel.cancelled() => break,
                job = job_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let event = match job {
                MutationJob::Node { seq, mutation } => {
                    let result = executor.execute(&mutation).await;
                    if let Err(err) = &result
                        && !err.is_silent()
                    {
                        tracing::warn!(target: "mutation", node = %mutation.node, kind = %mutation.kind, error = %err, "Edit failed");
                    }
                    MutationEvent::Settled {
                        seq,
                        node: mutation.node,
                        kind: mutation.kind,
                        result,
                    }
                }
                MutationJob::Bulk { edit, phase } => {
                    match submit_bulk(executor.api(), executor.migration(), phase, &edit).await {
                        Ok(None) => MutationEvent::BulkSettled {
                            id: edit.id,
                            result: Ok(report(&edit, None)),
                        },
                        Ok(Some(task)) => {
                            spawn_task_tracker(
                                executor.clone(),
                                edit.clone(),
                                task.clone(),
                                task_interval,
                                worker_cancel.clone(),
                                tx.clone(),
                            );
                            MutationEvent::BulkQueued { id: edit.id, task }
                        }
                        Err(err) => MutationEvent::BulkSettled {
                            id: edit.id,
                            result: Err(err),
                        },
                    }
                }
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }
        tracing::debug!(target: "mutation", "Mutation worker stopped");
    });

    (MutationWorker { jobs: job_tx, cancel }, rx)
}

fn spawn_task_tracker(
    executor: MutationExecutor,
    edit: BulkEdit,
    task: CompactString,
    interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<MutationEvent>,
) {
    tokio::spawn(async move {
        let waited = wait_for_task(
            executor.api(),
            executor.migration(),
            &task,
            interval,
            &cancel,
        )
        .await;
        if matches!(waited, Err(MutationError::WorkerStopped)) {
            return;
        }
        let result = waited.map(|()| report(&edit, Some(task)));
        let _ = tx
            .send(MutationEvent::BulkSettled {
                id: edit.id,
                result,
            })
            .await;
    });
}

fn report(edit: &BulkEdit, task: Option<CompactString>) -> BulkReport {
    BulkReport {
        id: edit.id,
        kind: edit.kind,
        nodes: edit.nodes.len(),
        task,
    }
}
