//! Single-node edits as apply/commit/rollback commands.

use pathreview_api::RetryScope;
use pathreview_core::{
    BackendId, ClickAction, CopyStatus, DiffNode, MigrationPhase, NodeKey, NodeTargets, Side,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::error::MutationError;

/// Kind of edit a node can receive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MutationKind {
    Exclude,
    Unexclude,
    MarkRetry,
    UnmarkRetry,
}

impl MutationKind {
    /// The edit that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::Exclude => Self::Unexclude,
            Self::Unexclude => Self::Exclude,
            Self::MarkRetry => Self::UnmarkRetry,
            Self::UnmarkRetry => Self::MarkRetry,
        }
    }

    /// Exclusion edits belong to traversal review; retry marks to either
    /// review phase.
    pub fn permitted_in(self, phase: MigrationPhase) -> bool {
        match self {
            Self::Exclude | Self::Unexclude => phase == MigrationPhase::TraversalReview,
            Self::MarkRetry | Self::UnmarkRetry => phase.is_review(),
        }
    }

    pub fn is_exclusion(self) -> bool {
        matches!(self, Self::Exclude | Self::Unexclude)
    }

    /// Write this edit's intended state into `node`.
    pub fn apply_to(self, node: &mut DiffNode) {
        match self {
            Self::Exclude => set_exclusion(node, CopyStatus::ExclusionExplicit),
            Self::Unexclude => set_exclusion(node, CopyStatus::Pending),
            Self::MarkRetry => node.retry_marked = true,
            Self::UnmarkRetry => node.retry_marked = false,
        }
    }
}

impl From<ClickAction> for MutationKind {
    fn from(action: ClickAction) -> Self {
        match action {
            ClickAction::Exclude => Self::Exclude,
            ClickAction::Unexclude => Self::Unexclude,
            ClickAction::MarkRetry => Self::MarkRetry,
            ClickAction::UnmarkRetry => Self::UnmarkRetry,
        }
    }
}

/// Display-relevant node state captured before an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    src_copy: Option<CopyStatus>,
    dst_copy: Option<CopyStatus>,
    mirror_copy: Option<CopyStatus>,
    retry_marked: bool,
}

impl NodeSnapshot {
    pub fn capture(node: &DiffNode) -> Self {
        Self {
            src_copy: node.src.as_ref().map(|s| s.copy_status),
            dst_copy: node.dst.as_ref().map(|d| d.copy_status),
            mirror_copy: node.copy_status,
            retry_marked: node.retry_marked,
        }
    }

    /// Put the captured fields back. Sides that disappeared since capture
    /// stay absent.
    pub fn restore(&self, node: &mut DiffNode) {
        if let (Some(side), Some(status)) = (node.src.as_mut(), self.src_copy) {
            side.copy_status = status;
        }
        if let (Some(side), Some(status)) = (node.dst.as_mut(), self.dst_copy) {
            side.copy_status = status;
        }
        node.copy_status = self.mirror_copy;
        node.retry_marked = self.retry_marked;
    }

    /// Whether `node` currently shows exactly the captured state.
    pub fn matches(&self, node: &DiffNode) -> bool {
        *self == Self::capture(node)
    }
}

/// A validated edit of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub node: NodeKey,
    pub kind: MutationKind,
    pub targets: NodeTargets,
    /// Phase the edit was issued in.
    pub phase: MigrationPhase,
    pub scope: RetryScope,
}

impl Mutation {
    /// Validate `kind` against `node` and `phase` and resolve its backend ids.
    ///
    /// Nothing is sent when this fails.
    pub fn prepare(
        node: &DiffNode,
        kind: MutationKind,
        phase: MigrationPhase,
    ) -> Result<Self, MutationError> {
        if !kind.permitted_in(phase) {
            return Err(MutationError::PhaseLocked { kind, phase });
        }
        if node.is_locked() || node.is_dst_only() {
            return Err(MutationError::ReadOnly {
                node: node.id.clone(),
            });
        }
        let targets = node.targets()?;

        Ok(Self {
            node: node.id.clone(),
            kind,
            targets,
            phase,
            scope: RetryScope::for_phase(phase),
        })
    }

    /// Show the edit's intended effect locally.
    pub fn apply(&self, node: &mut DiffNode) {
        self.kind.apply_to(node);
    }

    /// Confirm the edit after the backend accepted it.
    ///
    /// Re-applies the effect so a refresh that raced the edit cannot leave
    /// the node showing the pre-edit state.
    pub fn commit(&self, node: &mut DiffNode) {
        self.apply(node);
    }

    /// Undo the local effect, restoring `snapshot`.
    pub fn rollback(&self, node: &mut DiffNode, snapshot: &NodeSnapshot) {
        snapshot.restore(node);
    }

    /// Remote calls this edit issues, primary first.
    pub fn calls(&self) -> impl Iterator<Item = &(Side, BackendId)> {
        self.targets.iter()
    }
}

fn set_exclusion(node: &mut DiffNode, status: CopyStatus) {
    if let Some(src) = node.src.as_mut() {
        src.copy_status = status;
    }
    if let Some(dst) = node.dst.as_mut() {
        dst.copy_status = status;
    }
    node.copy_status = Some(status);
}
