//! Mutation errors.

use compact_str::CompactString;
use pathreview_api::ApiError;
use pathreview_core::{MigrationPhase, NodeKey, ReviewError, Side};
use thiserror::Error;

use crate::operation::MutationKind;

/// Why an edit did not take effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    /// The node carries no backend id; nothing was sent.
    #[error("Node {node} has no backend id")]
    NoBackendId { node: NodeKey },

    /// Not legal in the current phase. Never retried.
    #[error("{kind} is not permitted during {phase}")]
    PhaseLocked {
        kind: MutationKind,
        phase: MigrationPhase,
    },

    /// Locked folder or destination-only node.
    #[error("Node {node} is read-only")]
    ReadOnly { node: NodeKey },

    /// The node is not loaded.
    #[error("Node {node} is not loaded")]
    UnknownNode { node: NodeKey },

    /// The call for one side failed before anything changed remotely.
    #[error("{side} edit failed: {source}")]
    Remote {
        side: Side,
        #[source]
        source: ApiError,
    },

    /// The primary side changed but the secondary failed.
    #[error("Secondary edit failed ({source}); primary {}", revert_note(.compensated))]
    PartialFailure {
        #[source]
        source: ApiError,
        compensated: bool,
    },

    /// A bulk edit's background task failed.
    #[error("Background task {task} failed: {message}")]
    TaskFailed {
        task: CompactString,
        message: String,
    },

    /// A bulk edit with nothing to address.
    #[error("Nothing selected")]
    EmptySelection,

    #[error(transparent)]
    Invalid(ReviewError),

    /// The mutation worker has shut down.
    #[error("Mutation worker stopped")]
    WorkerStopped,
}

impl MutationError {
    /// Classify a failed remote call for `side`.
    pub fn from_remote(side: Side, kind: MutationKind, phase: MigrationPhase, err: ApiError) -> Self {
        if err.is_phase_locked() {
            Self::PhaseLocked { kind, phase }
        } else {
            Self::Remote { side, source: err }
        }
    }

    /// Phase violations and read-only nodes are no-ops, not user-facing errors.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::PhaseLocked { .. } | Self::ReadOnly { .. })
    }

    /// Network or server trouble; the user may re-trigger the edit.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote { source, .. } | Self::PartialFailure { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

impl From<ReviewError> for MutationError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::NoBackendId { node } => Self::NoBackendId { node },
            ReviewError::ReadOnly { node } => Self::ReadOnly { node },
            ReviewError::UnknownNode { node } => Self::UnknownNode { node },
            other => Self::Invalid(other),
        }
    }
}

fn revert_note(compensated: &bool) -> &'static str {
    if *compensated {
        "reverted"
    } else {
        "could not be reverted"
    }
}
