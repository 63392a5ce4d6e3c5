//! Retained migration log lines.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use pathreview_api::{LogBatch, LogEntry, LogLevel};

/// One log entry, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub id: CompactString,
    pub level: LogLevel,
    pub message: String,
    /// Backend timestamp, or receipt time when it was missing or invalid.
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn from_entry(entry: LogEntry, received: DateTime<Utc>) -> Self {
        let timestamp = entry
            .data
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received);
        let message = match entry.data.message {
            Some(message) => message,
            None => serde_json::Value::Object(entry.data.extra).to_string(),
        };

        Self {
            id: entry.id,
            level: entry.level,
            message,
            timestamp,
        }
    }

    /// `HH:MM:SS.mmm`
    pub fn display_time(&self) -> String {
        self.timestamp.format("%H:%M:%S%.3f").to_string()
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:<8} {}",
            self.display_time(),
            self.level.to_string().to_uppercase(),
            self.message
        )
    }
}

/// Record the newest id of each level in `batch`. The poller's log stream
/// keeps the only cursor.
pub fn advance_cursor(cursor: &mut BTreeMap<LogLevel, CompactString>, batch: &LogBatch) {
    for (level, entries) in &batch.logs {
        if let Some(last) = entries.last() {
            cursor.insert(*level, last.id.clone());
        }
    }
}

/// Deduplicated, timestamp-ordered log lines with a retention cap.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    ids: HashSet<CompactString>,
    max_lines: usize,
    filter: Option<BTreeSet<LogLevel>>,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            ids: HashSet::new(),
            max_lines,
            filter: None,
        }
    }

    /// Merge a batch. Returns how many new lines were kept.
    ///
    /// Entries whose id is already retained are skipped; the oldest lines
    /// are evicted once the cap is exceeded.
    pub fn merge(&mut self, batch: LogBatch, received: DateTime<Utc>) -> usize {
        let mut fresh = Vec::new();
        for entry in batch.into_entries() {
            if self.ids.contains(&entry.id) {
                continue;
            }
            let line = LogLine::from_entry(entry, received);
            let at = self.lines.partition_point(|l| l.timestamp <= line.timestamp);
            self.ids.insert(line.id.clone());
            fresh.push(line.id.clone());
            self.lines.insert(at, line);
        }

        while self.lines.len() > self.max_lines {
            if let Some(evicted) = self.lines.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
        fresh.iter().filter(|id| self.ids.contains(*id)).count()
    }

    /// Show only `levels`; `None` shows everything.
    pub fn set_filter(&mut self, levels: Option<BTreeSet<LogLevel>>) {
        self.filter = levels.filter(|l| !l.is_empty());
    }

    /// Retained lines passing the level filter, oldest first.
    pub fn visible(&self) -> impl Iterator<Item = &LogLine> {
        self.lines
            .iter()
            .filter(|line| self.filter.as_ref().is_none_or(|f| f.contains(&line.level)))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.ids.clear();
    }
}
