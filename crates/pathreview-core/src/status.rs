//! Raw per-side status values and the migration phase.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Traversal (discovery) status of one side of a node.
///
/// The backend may grow new values; anything unrecognised decodes as
/// [`TraversalStatus::Unknown`] instead of failing the whole page.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TraversalStatus {
    #[default]
    Pending,
    Successful,
    Failed,
    #[serde(alias = "NotOnSrc")]
    NotOnSrc,
    ExclusionExplicit,
    ExclusionInherited,
    #[serde(other)]
    Unknown,
}

impl TraversalStatus {
    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }

    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }
}

/// Copy status of one side of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CopyStatus {
    #[default]
    Pending,
    ExclusionExplicit,
    ExclusionInherited,
    Successful,
    Failed,
}

impl CopyStatus {
    /// Explicit or inherited exclusion.
    pub fn is_excluded(self) -> bool {
        matches!(self, Self::ExclusionExplicit | Self::ExclusionInherited)
    }
}

/// Migration phase derived from the backend's status string.
///
/// Only the two review phases accept edits; everything else is either
/// still working or finished.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumIter,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MigrationPhase {
    /// Roots or filters are set, traversal has not started.
    Setup,
    /// Discovery workers are running.
    TraversalInProgress,
    /// Traversal finished; the user reviews the discovered diff.
    #[default]
    TraversalReview,
    /// Copy workers are running (or preparing).
    CopyInProgress,
    /// Copy finished; the user reviews copy results.
    CopyReview,
    Complete,
    Failed,
    Suspended,
    /// Status string not recognised.
    Unknown,
}

impl MigrationPhase {
    /// Map a backend status or checkpoint string to a phase.
    pub fn from_status(status: &str) -> Self {
        match status {
            "Roots-Set" | "Filters-Set" => Self::Setup,
            "Traversal-In-Progress" | "running" => Self::TraversalInProgress,
            "Awaiting-Path-Review" => Self::TraversalReview,
            "Preparing-For-Copy" | "Copy-In-Progress" | "Copy-Complete" => Self::CopyInProgress,
            "Awaiting-Copy-Review" => Self::CopyReview,
            "Complete" | "completed" => Self::Complete,
            "failed" => Self::Failed,
            "suspended" => Self::Suspended,
            _ => Self::Unknown,
        }
    }

    /// Checkpoint string sent to `changePhase`.
    pub fn checkpoint(self) -> Option<&'static str> {
        match self {
            Self::TraversalReview => Some("Awaiting-Path-Review"),
            Self::CopyInProgress => Some("Preparing-For-Copy"),
            Self::CopyReview => Some("Awaiting-Copy-Review"),
            Self::Complete => Some("Complete"),
            _ => None,
        }
    }

    /// No more worker activity is expected; polling stops for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Suspended)
    }

    /// Workers are active on the backend.
    pub fn is_running(self) -> bool {
        matches!(self, Self::TraversalInProgress | Self::CopyInProgress)
    }

    /// The copy side of the diff is authoritative.
    pub fn is_copy_scoped(self) -> bool {
        matches!(self, Self::CopyInProgress | Self::CopyReview | Self::Complete)
    }

    /// Edits are accepted in this phase.
    pub fn is_review(self) -> bool {
        matches!(self, Self::TraversalReview | Self::CopyReview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_from_checkpoint() {
        assert_eq!(
            MigrationPhase::from_status("Awaiting-Path-Review"),
            MigrationPhase::TraversalReview
        );
        assert_eq!(
            MigrationPhase::from_status("Copy-Complete"),
            MigrationPhase::CopyInProgress
        );
        assert_eq!(MigrationPhase::from_status("Complete"), MigrationPhase::Complete);
        assert_eq!(MigrationPhase::from_status("garbage"), MigrationPhase::Unknown);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(MigrationPhase::from_status("Complete").is_terminal());
        assert!(MigrationPhase::from_status("suspended").is_terminal());
        assert!(!MigrationPhase::from_status("running").is_terminal());
        assert!(!MigrationPhase::from_status("Copy-In-Progress").is_terminal());
        assert!(!MigrationPhase::from_status("Awaiting-Path-Review").is_terminal());
        assert!(!MigrationPhase::from_status("Awaiting-Copy-Review").is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        let status: TraversalStatus = serde_json_like("\"not_on_src\"");
        assert_eq!(status, TraversalStatus::NotOnSrc);
        let status: TraversalStatus = serde_json_like("\"NotOnSrc\"");
        assert_eq!(status, TraversalStatus::NotOnSrc);
        let status: TraversalStatus = serde_json_like("\"queued_somewhere\"");
        assert_eq!(status, TraversalStatus::Unknown);
        assert_eq!(CopyStatus::ExclusionInherited.to_string(), "exclusion_inherited");
    }

    fn serde_json_like<T: serde::de::DeserializeOwned>(raw: &str) -> T {
        serde_json::from_str(raw).unwrap()
    }
}
