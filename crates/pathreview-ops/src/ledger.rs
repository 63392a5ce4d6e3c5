//! Ledger of in-flight edits and their settlement history.
//!
//! Every edit gets a sequence number when it starts. Overlapping edits of
//! the same node are kept in order; when one resolves, the ledger decides
//! whether the local node should keep its current state, or be restored
//! to a snapshot.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use pathreview_core::NodeKey;

use crate::operation::{MutationKind, NodeSnapshot};

/// What the caller should do with the local node after an edit resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The edit succeeded and is the latest for its node.
    Commit,
    /// The edit failed and is the latest for its node: restore this state.
    Rollback(NodeSnapshot),
    /// A later edit of the same node owns the local state now.
    Superseded,
    /// The sequence number was not in flight.
    Unknown,
}

/// How an edit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Committed,
    RolledBack { reason: String },
    Superseded { failed: bool },
}

/// A resolved edit.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub seq: u64,
    pub node: NodeKey,
    pub kind: MutationKind,
    pub outcome: LedgerOutcome,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct InFlight {
    seq: u64,
    kind: MutationKind,
    snapshot: NodeSnapshot,
}

/// Tracks unresolved edits per node plus a capped history.
#[derive(Debug)]
pub struct MutationLedger {
    in_flight: HashMap<NodeKey, VecDeque<InFlight>>,
    history: VecDeque<LedgerEntry>,
    max_history: usize,
    next_seq: u64,
}

impl Default for MutationLedger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MutationLedger {
    pub fn new(max_history: usize) -> Self {
        Self {
            in_flight: HashMap::new(),
            history: VecDeque::with_capacity(max_history.min(1000)),
            max_history,
            next_seq: 0,
        }
    }

    /// Register an edit whose local effect is about to be applied.
    ///
    /// `snapshot` is the node state immediately before the edit.
    pub fn begin(&mut self, node: NodeKey, kind: MutationKind, snapshot: NodeSnapshot) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.entry(node).or_default().push_back(InFlight {
            seq,
            kind,
            snapshot,
        });
        seq
    }

    /// Resolve edit `seq` of `node`.
    ///
    /// A failed edit that has a later sibling hands its snapshot to that
    /// sibling, so if the sibling fails too the node returns to the state
    /// before both.
    pub fn settle(&mut self, node: &NodeKey, seq: u64, error: Option<String>) -> Settlement {
        let Some(queue) = self.in_flight.get_mut(node) else {
            return Settlement::Unknown;
        };
        let Some(position) = queue.iter().position(|entry| entry.seq == seq) else {
            return Settlement::Unknown;
        };
        let Some(entry) = queue.remove(position) else {
            return Settlement::Unknown;
        };
        let successor = queue.iter_mut().find(|later| later.seq > seq);

        let (settlement, outcome) = match (error, successor) {
            (None, None) => (Settlement::Commit, LedgerOutcome::Committed),
            (None, Some(_)) => (
                Settlement::Superseded,
                LedgerOutcome::Superseded { failed: false },
            ),
            (Some(_), Some(later)) => {
                later.snapshot = entry.snapshot.clone();
                (
                    Settlement::Superseded,
                    LedgerOutcome::Superseded { failed: true },
                )
            }
            (Some(reason), None) => (
                Settlement::Rollback(entry.snapshot.clone()),
                LedgerOutcome::RolledBack { reason },
            ),
        };

        if queue.is_empty() {
            self.in_flight.remove(node);
        }
        self.record(LedgerEntry {
            seq,
            node: node.clone(),
            kind: entry.kind,
            outcome,
            resolved_at: Utc::now(),
        });
        settlement
    }

    fn record(&mut self, entry: LedgerEntry) {
        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Number of unresolved edits.
    pub fn in_flight(&self) -> usize {
        self.in_flight.values().map(VecDeque::len).sum()
    }

    pub fn is_in_flight(&self, node: &NodeKey) -> bool {
        self.in_flight.contains_key(node)
    }

    /// Kinds of the unresolved edits of `node`, oldest first.
    pub fn pending_kinds(&self, node: &NodeKey) -> Vec<MutationKind> {
        self.in_flight
            .get(node)
            .map(|queue| queue.iter().map(|entry| entry.kind).collect())
            .unwrap_or_default()
    }

    /// Resolved edits, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.history.iter()
    }

    /// How edit `seq` ended, while it is still in the history.
    pub fn outcome(&self, seq: u64) -> Option<&LedgerOutcome> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.seq == seq)
            .map(|entry| &entry.outcome)
    }

    pub fn last_failure(&self) -> Option<&LedgerEntry> {
        self.history
            .iter()
            .rev()
            .find(|entry| matches!(entry.outcome, LedgerOutcome::RolledBack { .. }))
    }

    /// Drop all in-flight bookkeeping; used when the view is torn down.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}
