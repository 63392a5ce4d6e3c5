//! Phase-aware status resolution.
//!
//! Collapses a node's raw status fields into exactly one [`StatusCategory`]
//! using a fixed precedence order per phase, and decides what a click on
//! the node would do.
//!
//! Traversal review precedence:
//!
//! 1. failed on either side
//! 2. excluded (copy status)
//! 3. pending traversal on either side
//! 4. marked for retry
//! 5. destination-only
//! 6. exists on both (or already copied)
//! 7. pending
//!
//! Copy review precedence (source-driven):
//!
//! 1. failed
//! 2. pending or marked for retry
//! 3. excluded, read-only
//! 4. destination-only
//! 5. exists on both
//!
//! Folders present on both sides are locked in every phase: never
//! interactive and never shown as excluded. Destination-only nodes are
//! informational and never interactive either.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::node::DiffNode;
use crate::status::{CopyStatus, MigrationPhase};

/// Mutually exclusive display category of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StatusCategory {
    Failed,
    PendingRetry,
    Excluded,
    ExistsOnBoth,
    ExistsDstOnly,
    Pending,
}

impl StatusCategory {
    /// Categories reachable in traversal-scoped phases.
    pub const TRAVERSAL: [StatusCategory; 6] = [
        Self::Failed,
        Self::Excluded,
        Self::PendingRetry,
        Self::ExistsDstOnly,
        Self::ExistsOnBoth,
        Self::Pending,
    ];

    /// Categories reachable in copy-scoped phases.
    pub const COPY: [StatusCategory; 5] = [
        Self::Failed,
        Self::PendingRetry,
        Self::Excluded,
        Self::ExistsDstOnly,
        Self::ExistsOnBoth,
    ];

    /// Single-glyph icon for terminal output.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Failed => "!",
            Self::PendingRetry => "↻",
            Self::Excluded => "✕",
            Self::ExistsOnBoth => "✓",
            Self::ExistsDstOnly => "◌",
            Self::Pending => "◷",
        }
    }
}

/// What clicking the node's status does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ClickAction {
    Exclude,
    Unexclude,
    MarkRetry,
    UnmarkRetry,
}

/// Result of resolving a node in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub category: StatusCategory,
    /// A click is meaningful in the current phase.
    pub interactive: bool,
    /// The edit a click would issue, when interactive.
    pub action: Option<ClickAction>,
}

impl Resolution {
    fn new(category: StatusCategory, action: Option<ClickAction>) -> Self {
        Self {
            category,
            interactive: action.is_some(),
            action,
        }
    }

    fn read_only(category: StatusCategory) -> Self {
        Self::new(category, None)
    }

    fn locked(mut self) -> Self {
        self.interactive = false;
        self.action = None;
        self
    }
}

/// Resolve a node's display category and interaction in `phase`.
pub fn resolve(node: &DiffNode, phase: MigrationPhase) -> Resolution {
    let resolution = if phase.is_copy_scoped() {
        resolve_copy(node)
    } else {
        resolve_traversal(node)
    };

    if node.is_locked() || node.is_dst_only() || !phase.is_review() {
        resolution.locked()
    } else {
        resolution
    }
}

fn primary_copy_status(node: &DiffNode) -> Option<CopyStatus> {
    node.src.as_ref().map(|s| s.copy_status).or(node.copy_status)
}

fn resolve_traversal(node: &DiffNode) -> Resolution {
    use StatusCategory::*;

    if node.traversal_failed() {
        return Resolution::new(Failed, Some(ClickAction::MarkRetry));
    }

    let copy_status = primary_copy_status(node);
    if !node.is_locked() && copy_status.is_some_and(CopyStatus::is_excluded) {
        return Resolution::new(Excluded, Some(ClickAction::Unexclude));
    }

    if node.traversal_pending() || node.retry_marked {
        return Resolution::new(PendingRetry, Some(ClickAction::UnmarkRetry));
    }

    if node.is_dst_only() {
        return Resolution::read_only(ExistsDstOnly);
    }

    if node.exists_on_both() || copy_status == Some(CopyStatus::Successful) {
        return Resolution::read_only(ExistsOnBoth);
    }

    Resolution::new(Pending, Some(ClickAction::Exclude))
}

fn resolve_copy(node: &DiffNode) -> Resolution {
    use StatusCategory::*;

    let copy_status = primary_copy_status(node);

    if copy_status == Some(CopyStatus::Failed) {
        return Resolution::new(Failed, Some(ClickAction::MarkRetry));
    }

    if node.retry_marked {
        return Resolution::new(PendingRetry, Some(ClickAction::UnmarkRetry));
    }

    if copy_status == Some(CopyStatus::Pending) {
        return Resolution::read_only(PendingRetry);
    }

    if !node.is_locked() && copy_status.is_some_and(CopyStatus::is_excluded) {
        return Resolution::read_only(Excluded);
    }

    if node.is_dst_only() {
        return Resolution::read_only(ExistsDstOnly);
    }

    Resolution::read_only(ExistsOnBoth)
}
