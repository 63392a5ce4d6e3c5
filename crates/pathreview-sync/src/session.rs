//! The review session: one store for everything a reviewer sees.
//!
//! State changes only through the methods below, each a transition over
//! the latest state. Page responses, edit settlements and poll events are
//! fed in as they arrive; methods that need a follow-up load hand back a
//! [`PageTicket`] for the caller to run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use pathreview_api::{
    ApiError, ApiResult, DiffPage, MigrationStatus, QueueMetricsReport, ReviewApi,
};
use pathreview_core::{
    CopyBlocker, Locator, MigrationPhase, NodeKey, PageRequest, Resolution, ReviewConfig,
    ReviewStats, SearchQuery, Selection, SelectionAction, resolve,
};
use pathreview_ops::{
    BulkEdit, Mutation, MutationError, MutationEvent, MutationExecutor, MutationJob,
    MutationKind, MutationLedger, MutationWorker, NodeSnapshot, Settlement,
    start_mutation_worker,
};
use tokio::sync::mpsc;

use crate::debounce::{Debouncer, start_debounce};
use crate::logs::LogBuffer;
use crate::poller::{PollHandle, PollIntervals, PollStates, Stream, SyncEvent, start_polling};
use crate::window::{LoadOutcome, PageTicket, Stale, Window};

/// Times a page is re-requested after an edit settled under it.
const MAX_REFETCH: usize = 3;

/// Retained user-facing notices.
const MAX_NOTICES: usize = 50;

/// A user-visible error.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    pub node: Option<NodeKey>,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{node}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Review state of one migration.
pub struct ReviewSession {
    api: Arc<dyn ReviewApi>,
    migration: CompactString,
    config: ReviewConfig,
    phase: MigrationPhase,
    status: Option<MigrationStatus>,
    window: Window,
    /// Folder the current default selection was seeded for.
    seeded_for: Option<Locator>,
    selection: Selection,
    ledger: MutationLedger,
    /// Bumped whenever an edit settles.
    epoch: u64,
    stats: Option<ReviewStats>,
    metrics: Option<QueueMetricsReport>,
    logs: LogBuffer,
    polls: PollStates,
    /// Bulk edits not yet settled, with their background task once known.
    bulk: HashMap<u64, Option<CompactString>>,
    next_bulk: u64,
    notices: VecDeque<Notice>,
    worker: MutationWorker,
    events: mpsc::Receiver<MutationEvent>,
    typed: Debouncer<SearchQuery>,
    queries: mpsc::Receiver<SearchQuery>,
}

impl std::fmt::Debug for ReviewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewSession")
            .field("migration", &self.migration)
            .field("phase", &self.phase)
            .field("locator", self.window.locator())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl ReviewSession {
    /// Open a session. Must be called inside a tokio runtime; the mutation
    /// worker starts immediately.
    pub fn new(api: Arc<dyn ReviewApi>, migration: impl Into<CompactString>, config: ReviewConfig) -> Self {
        let migration = migration.into();
        let executor = MutationExecutor::new(api.clone(), migration.clone());
        let (worker, events) = start_mutation_worker(executor, config.task_interval());
        let (typed, queries) = start_debounce(config.search_debounce());

        Self {
            window: Window::new(config.page_size, config.show_dst_only),
            logs: LogBuffer::new(config.max_log_lines),
            api,
            migration,
            config,
            phase: MigrationPhase::default(),
            status: None,
            seeded_for: None,
            selection: Selection::new(),
            ledger: MutationLedger::default(),
            epoch: 0,
            stats: None,
            metrics: None,
            polls: PollStates::default(),
            bulk: HashMap::new(),
            next_bulk: 0,
            notices: VecDeque::new(),
            worker,
            events,
            typed,
            queries,
        }
    }

    pub fn migration(&self) -> &str {
        &self.migration
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn status(&self) -> Option<&MigrationStatus> {
        self.status.as_ref()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn ledger(&self) -> &MutationLedger {
        &self.ledger
    }

    pub fn stats(&self) -> Option<&ReviewStats> {
        self.stats.as_ref()
    }

    pub fn metrics(&self) -> Option<&QueueMetricsReport> {
        self.metrics.as_ref()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn logs_mut(&mut self) -> &mut LogBuffer {
        &mut self.logs
    }

    pub fn polls(&self) -> &PollStates {
        &self.polls
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Notices not yet taken, oldest first.
    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, message: impl Into<String>, node: Option<NodeKey>) {
        if self.notices.len() >= MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            message: message.into(),
            node,
            at: Utc::now(),
        });
    }

    /// Display category and click action of a loaded node.
    pub fn resolve(&self, id: &NodeKey) -> Option<Resolution> {
        self.window.node(id).map(|node| resolve(node, self.phase))
    }

    /// Adopt `phase`. Any phase change drops the selection.
    pub fn set_phase(&mut self, phase: MigrationPhase) {
        if phase == self.phase {
            return;
        }
        tracing::info!(target: "poll", from = %self.phase, to = %phase, "Phase changed");
        self.phase = phase;
        self.selection.apply(SelectionAction::PhaseAdvanced);
    }

    // Navigation. Each returns the load to run.

    pub fn open_folder(&mut self, path: &str) -> PageTicket {
        self.window.open_folder(path, self.epoch)
    }

    pub fn back(&mut self) -> Option<PageTicket> {
        self.window.back(self.epoch)
    }

    pub fn jump(&mut self, crumb: usize) -> Option<PageTicket> {
        self.window.jump(crumb, self.epoch)
    }

    pub fn root(&mut self) -> PageTicket {
        self.window.root(self.epoch)
    }

    pub fn search(&mut self, query: SearchQuery) -> PageTicket {
        self.window.search(query, self.epoch)
    }

    /// Offer a query as it is typed. Only the last one before a quiet
    /// period is searched; see [`Self::next_search`].
    pub async fn type_search(&self, query: SearchQuery) {
        self.typed.push(query).await;
    }

    /// Wait for the next settled query and switch to it. `None` once the
    /// session is closed.
    pub async fn next_search(&mut self) -> Option<PageTicket> {
        let query = self.queries.recv().await?;
        Some(self.search(query))
    }

    pub fn load_more(&mut self) -> Option<PageTicket> {
        self.window.load_more(self.epoch)
    }

    pub fn goto_page(&mut self, index: u64) -> Option<PageTicket> {
        self.window.goto_page(index, self.epoch)
    }

    pub fn next_page(&mut self) -> Option<PageTicket> {
        self.window.next_page(self.epoch)
    }

    pub fn prev_page(&mut self) -> Option<PageTicket> {
        self.window.prev_page(self.epoch)
    }

    pub fn set_page_size(&mut self, size: u64) -> PageTicket {
        self.window.set_page_size(size, self.epoch)
    }

    pub fn reload(&mut self) -> PageTicket {
        self.window.reload(self.epoch)
    }

    /// Request the page `ticket` describes.
    pub async fn fetch(&self, ticket: &PageTicket) -> ApiResult<DiffPage> {
        match &ticket.locator {
            Locator::Folder(path) => self.api.diffs(&self.migration, path, ticket.request).await,
            Locator::Search(query) => {
                self.api
                    .search(&self.migration, query, self.phase, ticket.request)
                    .await
            }
        }
    }

    /// Apply a page response.
    ///
    /// Loaded nodes with unresolved edits get those edits re-applied so a
    /// late page cannot hide them. A folder shown for the first time seeds
    /// the default selection; any other load keeps the selection.
    pub fn page_loaded(&mut self, ticket: &PageTicket, response: ApiResult<DiffPage>) -> LoadOutcome {
        let outcome = self.window.accept(ticket, response, self.epoch);
        if !matches!(outcome, LoadOutcome::Replaced(_) | LoadOutcome::Appended(_)) {
            return outcome;
        }

        for node in self.window.items_mut() {
            for kind in self.ledger.pending_kinds(&node.id) {
                kind.apply_to(node);
            }
        }

        if let Locator::Search(_) = ticket.locator
            && let Some(stats) = self.window.stats()
        {
            self.stats = Some(*stats);
        }

        let visible = self.window.items().to_vec();
        let first_view = ticket.locator.is_folder()
            && !ticket.append
            && self.seeded_for.as_ref() != Some(&ticket.locator);
        if first_view {
            self.seeded_for = Some(ticket.locator.clone());
            self.selection.apply(SelectionAction::SeedDefaults { visible });
        } else {
            self.selection.apply(SelectionAction::Refresh { visible });
        }
        outcome
    }

    /// Fetch and apply `ticket`, re-requesting it if an edit settled while
    /// it was out.
    pub async fn load(&mut self, ticket: PageTicket) -> LoadOutcome {
        let mut ticket = ticket;
        let mut attempts = 0;
        loop {
            let response = self.fetch(&ticket).await;
            let outcome = self.page_loaded(&ticket, response);
            if outcome != LoadOutcome::Discarded(Stale::PreEdit) || attempts >= MAX_REFETCH {
                return outcome;
            }
            attempts += 1;
            ticket = self.window.reissue(&ticket, self.epoch);
        }
    }

    // Selection gestures over the visible window.

    /// Toggle one visible node. `false` when its selection is inherited.
    pub fn toggle_select(&mut self, id: &NodeKey) -> bool {
        let items = self.window.items();
        let Some(index) = items.iter().position(|n| &n.id == id) else {
            return false;
        };
        let node = items[index].clone();
        self.selection.apply(SelectionAction::Toggle {
            node,
            index: Some(index),
        })
    }

    /// Select every visible node between the last toggled one and `index`.
    pub fn extend_select(&mut self, index: usize) -> bool {
        let visible = self.window.items().to_vec();
        self.selection
            .apply(SelectionAction::ExtendTo { visible, to: index })
    }

    /// Select the whole page, or deselect it when it is fully selected.
    pub fn toggle_page_select(&mut self) {
        let visible = self.window.items().to_vec();
        self.selection.apply(SelectionAction::TogglePage { visible });
    }

    pub fn clear_selection(&mut self) {
        self.selection.apply(SelectionAction::Clear);
    }

    /// Explicit plus inherited selections among visible nodes.
    pub fn selected_count(&self) -> usize {
        self.selection.selected_count(self.window.items())
    }

    // Edits.

    /// Validate and locally apply an edit, returning its sequence number
    /// and the job to send.
    ///
    /// With `kind` unset the node's click action in the current phase is
    /// used.
    pub fn begin_edit(
        &mut self,
        id: &NodeKey,
        kind: Option<MutationKind>,
    ) -> Result<(u64, MutationJob), MutationError> {
        let phase = self.phase;
        let node = self
            .window
            .node_mut(id)
            .ok_or_else(|| MutationError::UnknownNode { node: id.clone() })?;

        let kind = match kind {
            Some(kind) => kind,
            None => resolve(node, phase)
                .action
                .map(MutationKind::from)
                .ok_or_else(|| MutationError::ReadOnly { node: id.clone() })?,
        };
        let mutation = Mutation::prepare(node, kind, phase)?;
        let seq = self
            .ledger
            .begin(id.clone(), kind, NodeSnapshot::capture(node));
        mutation.apply(node);

        tracing::debug!(target: "mutation", node = %id, %kind, seq, "Edit applied locally");
        Ok((seq, MutationJob::Node { seq, mutation }))
    }

    /// Edit a node and queue the remote calls. Returns the edit's ledger
    /// sequence number.
    pub async fn edit(&mut self, id: &NodeKey, kind: Option<MutationKind>) -> Result<u64, MutationError> {
        let (seq, job) = match self.begin_edit(id, kind) {
            Ok(begun) => begun,
            Err(err) => {
                if !err.is_silent() {
                    self.notify(err.to_string(), Some(id.clone()));
                }
                return Err(err);
            }
        };
        self.worker.submit(job).await?;
        Ok(seq)
    }

    /// Click a node's status: whatever action it offers in this phase.
    pub async fn click(&mut self, id: &NodeKey) -> Result<u64, MutationError> {
        self.edit(id, None).await
    }

    /// Bulk exclude or unexclude the normalized selection.
    pub async fn bulk(&mut self, kind: MutationKind) -> Result<u64, MutationError> {
        let id = self.next_bulk;
        let edit = BulkEdit::from_selection(id, &self.selection, kind, self.phase)?;
        self.next_bulk += 1;
        self.bulk.insert(id, None);
        tracing::info!(target: "mutation", id, %kind, nodes = edit.nodes.len(), "Bulk edit queued");
        self.worker
            .submit(MutationJob::Bulk {
                edit,
                phase: self.phase,
            })
            .await?;
        Ok(id)
    }

    /// Background tasks of bulk edits still running.
    pub fn running_tasks(&self) -> impl Iterator<Item = &CompactString> {
        self.bulk.values().flatten()
    }

    /// Whether any edit or bulk job is unresolved.
    pub fn has_pending_edits(&self) -> bool {
        self.ledger.in_flight() > 0 || !self.bulk.is_empty()
    }

    pub async fn next_mutation_event(&mut self) -> Option<MutationEvent> {
        self.events.recv().await
    }

    /// Apply a worker event. Returns the reconciling load to run, if any.
    pub fn on_mutation_event(&mut self, event: MutationEvent) -> Option<PageTicket> {
        match event {
            MutationEvent::Settled {
                seq,
                node,
                kind,
                result,
            } => {
                if let Err(err) = &result
                    && !err.is_silent()
                {
                    self.notify(err.to_string(), Some(node.clone()));
                }
                let settlement =
                    self.ledger
                        .settle(&node, seq, result.err().map(|err| err.to_string()));
                self.epoch += 1;

                match settlement {
                    Settlement::Commit => {
                        if let Some(local) = self.window.node_mut(&node) {
                            kind.apply_to(local);
                        }
                        // List rows can change order or leave the filter.
                        (!self.window.locator().is_folder()).then(|| self.reload())
                    }
                    Settlement::Rollback(snapshot) => {
                        if let Some(local) = self.window.node_mut(&node) {
                            snapshot.restore(local);
                        }
                        None
                    }
                    Settlement::Superseded | Settlement::Unknown => None,
                }
            }
            MutationEvent::BulkQueued { id, task } => {
                tracing::info!(target: "mutation", id, %task, "Bulk edit running as background task");
                self.bulk.insert(id, Some(task));
                None
            }
            MutationEvent::BulkSettled { id, result } => {
                self.bulk.remove(&id);
                match result {
                    Ok(report) => {
                        tracing::info!(target: "mutation", id, nodes = report.nodes, "Bulk edit finished");
                        self.selection.apply(SelectionAction::Clear);
                        self.epoch += 1;
                        Some(self.reload())
                    }
                    Err(err) => {
                        if !err.is_silent() {
                            self.notify(err.to_string(), None);
                        }
                        None
                    }
                }
            }
        }
    }

    /// Wait until every queued edit and bulk job has settled, running the
    /// reconciling loads they ask for. Stats are re-read after a bulk edit.
    pub async fn settle(&mut self) {
        let mut bulk_done = false;
        while self.has_pending_edits() {
            let Some(event) = self.events.recv().await else {
                break;
            };
            bulk_done |= matches!(event, MutationEvent::BulkSettled { result: Ok(_), .. });
            if let Some(ticket) = self.on_mutation_event(event) {
                self.load(ticket).await;
            }
        }

        if bulk_done && let Err(err) = self.refresh_stats().await {
            tracing::warn!(target: "mutation", error = %err, "Stats refresh after bulk edit failed");
        }
    }

    // Observation.

    /// Start polling this migration with the configured cadences.
    pub fn observe(&self) -> (PollHandle, mpsc::Receiver<SyncEvent>) {
        start_polling(
            self.api.clone(),
            self.migration.clone(),
            PollIntervals::from(&self.config),
        )
    }

    /// Apply a poller event.
    pub fn on_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Status { status, phase } => {
                self.status = Some(status);
                self.set_phase(phase);
            }
            SyncEvent::StatusFailed(err) => self.notify(format!("Status unavailable: {err}"), None),
            SyncEvent::Metrics(report) => self.metrics = Some(report),
            SyncEvent::Logs(batch) => {
                self.logs.merge(batch, Utc::now());
            }
            SyncEvent::StreamChanged { stream, state } => match stream {
                Stream::Status => self.polls.status = state,
                Stream::Metrics => self.polls.metrics = state,
                Stream::Logs => self.polls.logs = state,
            },
            SyncEvent::Finished(phase) => self.set_phase(phase),
        }
    }

    /// Read the run status once and adopt its phase.
    pub async fn refresh_status(&mut self) -> ApiResult<MigrationPhase> {
        let status = self.api.status(&self.migration).await?;
        let phase = status.phase();
        self.status = Some(status);
        self.set_phase(phase);
        Ok(phase)
    }

    /// Fetch aggregate stats over the whole diff.
    pub async fn refresh_stats(&mut self) -> ApiResult<Option<ReviewStats>> {
        let page = self
            .api
            .search(&self.migration, &SearchQuery::new(), self.phase, PageRequest::first(1))
            .await?;
        if page.stats.is_some() {
            self.stats = page.stats;
        }
        Ok(self.stats)
    }

    /// First reason copying cannot start yet. Unknown totals block.
    pub fn copy_blocker(&self) -> Option<CopyBlocker> {
        let Some(stats) = self.stats else {
            return Some(CopyBlocker::StatsUnknown);
        };
        stats.copy_blocker(
            self.phase,
            self.ledger.in_flight(),
            self.bulk.len(),
        )
    }

    pub fn can_start_copy(&self) -> bool {
        self.copy_blocker().is_none()
    }

    /// Move the run to `target`. Clears the selection on success; the
    /// caller restarts observation.
    pub async fn change_phase(&mut self, target: MigrationPhase) -> Result<(), ApiError> {
        self.api.change_phase(&self.migration, target).await?;
        self.set_phase(target);
        self.selection.apply(SelectionAction::Clear);
        self.stats = None;
        Ok(())
    }

    /// Stop the mutation worker and drop any pending typed search.
    /// Unsettled edits are abandoned.
    pub fn close(&mut self) {
        self.typed.cancel();
        self.worker.shutdown();
        self.ledger.clear();
        self.bulk.clear();
    }
}

impl Drop for ReviewSession {
    fn drop(&mut self) {
        self.typed.cancel();
        self.worker.shutdown();
    }
}
