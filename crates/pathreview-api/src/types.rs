//! JSON shapes exchanged with the migration backend.

use std::collections::BTreeMap;

use compact_str::CompactString;
use pathreview_core::{BackendId, DiffNode, MigrationPhase, Pagination, ReviewStats};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// One page of diff nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffPage {
    #[serde(default)]
    pub items: Vec<DiffNode>,
    #[serde(default)]
    pub pagination: Pagination,
    /// Aggregates over the whole filtered result; search responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ReviewStats>,
}

/// Which retry endpoint family applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RetryScope {
    Discovery,
    Copy,
}

impl RetryScope {
    pub fn for_phase(phase: MigrationPhase) -> Self {
        if phase.is_copy_scoped() {
            Self::Copy
        } else {
            Self::Discovery
        }
    }
}

/// Request body of the bulk endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    #[serde(rename = "nodeIDs")]
    pub node_ids: Vec<BackendId>,
}

/// Accepted bulk edit. Large batches run as a background task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAccepted {
    #[serde(rename = "taskID", alias = "taskId", default)]
    pub task_id: Option<CompactString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// A backend-side bulk job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTask {
    pub id: CompactString,
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Migration run status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    #[serde(default)]
    pub id: Option<CompactString>,
    pub status: String,
    #[serde(default)]
    pub checkpoint_status: Option<String>,
    #[serde(default)]
    pub source_id: Option<CompactString>,
    #[serde(default)]
    pub destination_id: Option<CompactString>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MigrationStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.checkpoint_status = Some(checkpoint.into());
        self
    }

    /// Phase of the run. A finished run status wins over a stale checkpoint.
    pub fn phase(&self) -> MigrationPhase {
        let from_status = MigrationPhase::from_status(&self.status);
        if matches!(
            from_status,
            MigrationPhase::Complete | MigrationPhase::Failed | MigrationPhase::Suspended
        ) {
            return from_status;
        }
        match self.checkpoint_status.as_deref() {
            Some(checkpoint) => match MigrationPhase::from_status(checkpoint) {
                MigrationPhase::Unknown => from_status,
                phase => phase,
            },
            None => from_status,
        }
    }
}

/// Worker queue counters for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueMetrics {
    pub name: String,
    pub round: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub total_tracked: u64,
    pub workers: u64,
    #[serde(rename = "files_discovered_total")]
    pub files_discovered: Option<u64>,
    #[serde(rename = "folders_discovered_total")]
    pub folders_discovered: Option<u64>,
    #[serde(rename = "discovery_rate_items_per_sec")]
    pub discovery_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueMetricsReport {
    pub src_traversal: Option<QueueMetrics>,
    pub dst_traversal: Option<QueueMetrics>,
    pub copy: Option<QueueMetrics>,
}

impl QueueMetricsReport {
    pub fn stages(&self) -> impl Iterator<Item = (&'static str, &QueueMetrics)> {
        [
            ("src", self.src_traversal.as_ref()),
            ("dst", self.dst_traversal.as_ref()),
            ("copy", self.copy.as_ref()),
        ]
        .into_iter()
        .filter_map(|(label, metrics)| metrics.map(|m| (label, m)))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Free-form log payload. `message` and `timestamp` are the only keys the
/// client interprets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: CompactString,
    pub level: LogLevel,
    #[serde(default)]
    pub data: LogData,
}

/// Newest id already seen per level, so the backend can skip them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsRequest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_seen_ids: BTreeMap<LogLevel, CompactString>,
}

/// Logs grouped by level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub logs: BTreeMap<LogLevel, Vec<LogEntry>>,
}

impl LogBatch {
    pub fn len(&self) -> usize {
        self.logs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_entries(self) -> impl Iterator<Item = LogEntry> {
        self.logs.into_values().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChange {
    pub target_phase: String,
}
