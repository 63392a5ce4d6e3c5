//! Server-computed review aggregates.

use serde::{Deserialize, Serialize};

use crate::status::MigrationPhase;

/// Aggregate counts over the reviewed diff. Read-only on the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewStats {
    pub pending: u64,
    pub failed: u64,
    pub excluded: u64,
    pub folders: u64,
    pub files: u64,
    pub total_size: u64,
}

/// Why the copy phase cannot start yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyBlocker {
    WrongPhase(MigrationPhase),
    /// Review totals have not been read yet.
    StatsUnknown,
    FailedNodes(u64),
    InFlight(usize),
    RunningTasks(usize),
}

impl std::fmt::Display for CopyBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongPhase(phase) => write!(f, "migration is in {phase}, not traversal review"),
            Self::StatsUnknown => f.write_str("review totals have not been loaded"),
            Self::FailedNodes(n) => write!(f, "{n} failed node(s) need a retry or exclusion"),
            Self::InFlight(n) => write!(f, "{n} edit(s) still in flight"),
            Self::RunningTasks(n) => write!(f, "{n} background task(s) still running"),
        }
    }
}

impl ReviewStats {
    pub fn total_items(&self) -> u64 {
        self.folders + self.files
    }

    /// Folders per file; `None` when there are no files.
    pub fn folder_file_ratio(&self) -> Option<f64> {
        if self.files == 0 {
            None
        } else {
            Some(self.folders as f64 / self.files as f64)
        }
    }

    /// First reason the copy phase cannot be started, if any.
    pub fn copy_blocker(
        &self,
        phase: MigrationPhase,
        in_flight: usize,
        running_tasks: usize,
    ) -> Option<CopyBlocker> {
        if phase != MigrationPhase::TraversalReview {
            return Some(CopyBlocker::WrongPhase(phase));
        }
        if self.failed > 0 {
            return Some(CopyBlocker::FailedNodes(self.failed));
        }
        if in_flight > 0 {
            return Some(CopyBlocker::InFlight(in_flight));
        }
        if running_tasks > 0 {
            return Some(CopyBlocker::RunningTasks(running_tasks));
        }
        None
    }

    pub fn can_start_copy(&self, phase: MigrationPhase, in_flight: usize, running_tasks: usize) -> bool {
        self.copy_blocker(phase, in_flight, running_tasks).is_none()
    }
}
