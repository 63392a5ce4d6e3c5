//! Bulk exclusion of a hierarchical selection.
//!
//! The selection is normalized first so a folder and its descendants are
//! sent as the folder alone; the backend propagates to children itself.

use std::time::Duration;

use compact_str::CompactString;
use pathreview_api::{ReviewApi, TaskStatus};
use pathreview_core::{BackendId, MigrationPhase, NodeKey, Selection};
use tokio_util::sync::CancellationToken;

use crate::error::MutationError;
use crate::operation::MutationKind;

/// A bulk exclude or unexclude ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEdit {
    pub id: u64,
    pub kind: MutationKind,
    pub nodes: Vec<BackendId>,
    /// Selected nodes that carried no backend id and were left out.
    pub skipped: Vec<NodeKey>,
}

impl BulkEdit {
    /// Build from the current selection.
    pub fn from_selection(
        id: u64,
        selection: &Selection,
        kind: MutationKind,
        phase: MigrationPhase,
    ) -> Result<Self, MutationError> {
        if !kind.is_exclusion() || !kind.permitted_in(phase) {
            return Err(MutationError::PhaseLocked { kind, phase });
        }
        let (nodes, skipped) = selection.bulk_targets();
        if nodes.is_empty() {
            return Err(skipped
                .into_iter()
                .next()
                .map(|node| MutationError::NoBackendId { node })
                .unwrap_or(MutationError::EmptySelection));
        }
        if !skipped.is_empty() {
            tracing::warn!(
                target: "mutation",
                skipped = skipped.len(),
                "Selected nodes without backend ids left out of bulk edit"
            );
        }
        Ok(Self {
            id,
            kind,
            nodes,
            skipped,
        })
    }
}

/// Result of a finished bulk edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub id: u64,
    pub kind: MutationKind,
    pub nodes: usize,
    /// Background task that carried the edit, when the backend deferred it.
    pub task: Option<CompactString>,
}

/// Send `edit`. Returns the background task id when the backend deferred it.
pub async fn submit_bulk(
    api: &dyn ReviewApi,
    migration: &str,
    phase: MigrationPhase,
    edit: &BulkEdit,
) -> Result<Option<CompactString>, MutationError> {
    let result = match edit.kind {
        MutationKind::Unexclude => api.bulk_unexclude(migration, &edit.nodes).await,
        _ => api.bulk_exclude(migration, &edit.nodes).await,
    };
    let accepted = result.map_err(|err| {
        MutationError::from_remote(pathreview_core::Side::Src, edit.kind, phase, err)
    })?;

    tracing::debug!(
        target: "mutation",
        id = edit.id,
        kind = %edit.kind,
        nodes = edit.nodes.len(),
        task = ?accepted.task_id,
        "Bulk edit accepted"
    );
    Ok(accepted.task_id)
}

/// Poll background tasks every `interval` until `task` finishes.
///
/// Poll failures are logged and retried on the next tick. A task missing
/// from a successful listing has been purged by the backend and counts as
/// finished; the caller reconciles by re-fetching. Returns
/// [`MutationError::WorkerStopped`] if cancelled first.
pub async fn wait_for_task(
    api: &dyn ReviewApi,
    migration: &str,
    task: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), MutationError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(MutationError::WorkerStopped),
            _ = ticker.tick() => {}
        }

        let tasks = match api.background_tasks(migration).await {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::warn!(target: "mutation", task, error = %err, "Task poll failed");
                continue;
            }
        };
        let Some(current) = tasks.into_iter().find(|t| t.id == task) else {
            tracing::debug!(target: "mutation", task, "Task no longer listed");
            return Ok(());
        };
        match current.status {
            TaskStatus::Running => {}
            TaskStatus::Completed => return Ok(()),
            TaskStatus::Failed => {
                return Err(MutationError::TaskFailed {
                    task: current.id,
                    message: current.error.unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathreview_core::{DiffNode, NodeSide, NodeType, SelectionAction};

    fn node(id: &str, path: &str, backend: &str) -> DiffNode {
        DiffNode::new_src_only(id, path, NodeType::Folder, NodeSide::new(backend))
    }

    #[test]
    fn test_from_selection_normalizes() {
        let mut selection = Selection::new();
        selection.apply(SelectionAction::Toggle {
            node: node("foo", "/Foo", "s-foo"),
            index: Some(0),
        });
        selection.apply(SelectionAction::Toggle {
            node: node("other", "/Other", "s-other"),
            index: Some(1),
        });

        let edit = BulkEdit::from_selection(
            1,
            &selection,
            MutationKind::Exclude,
            MigrationPhase::TraversalReview,
        )
        .unwrap();
        assert_eq!(
            edit.nodes,
            vec![BackendId::new("s-foo"), BackendId::new("s-other")]
        );
        assert!(edit.skipped.is_empty());
    }

    #[test]
    fn test_from_selection_rejects() {
        let selection = Selection::new();
        assert_eq!(
            BulkEdit::from_selection(
                1,
                &selection,
                MutationKind::Exclude,
                MigrationPhase::TraversalReview
            ),
            Err(MutationError::EmptySelection)
        );
        assert!(matches!(
            BulkEdit::from_selection(1, &selection, MutationKind::Exclude, MigrationPhase::CopyReview),
            Err(MutationError::PhaseLocked { .. })
        ));
        assert!(matches!(
            BulkEdit::from_selection(
                1,
                &selection,
                MutationKind::MarkRetry,
                MigrationPhase::TraversalReview
            ),
            Err(MutationError::PhaseLocked { .. })
        ));
    }
}
