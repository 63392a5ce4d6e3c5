//! In-memory backend for tests.
//!
//! Holds a flat node table and answers every [`ReviewApi`] call from it.
//! Every call is recorded, and failures, latency, background tasks and the
//! run status can be scripted per test.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use compact_str::{CompactString, format_compact};
use indexmap::IndexMap;
use pathreview_core::{
    BackendId, CopyStatus, DiffNode, MigrationPhase, NodeKey, PageRequest, Pagination,
    ReviewStats, SearchField, SearchQuery, Side, SortDir, SortField, StatusFilter, TypeFilter,
    is_descendant, normalize_path,
};

use crate::client::{BoxFuture, ReviewApi};
use crate::error::{ApiError, ApiResult};
use crate::types::{
    BackgroundTask, BulkAccepted, DiffPage, LogBatch, LogEntry, LogLevel, LogsRequest,
    MigrationStatus, QueueMetricsReport, RetryScope, TaskStatus,
};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Diffs { path: CompactString, offset: u64 },
    Search { offset: u64 },
    Exclude(BackendId),
    Unexclude(BackendId),
    MarkRetry(BackendId, RetryScope),
    UnmarkRetry(BackendId, RetryScope),
    BulkExclude(Vec<BackendId>),
    BulkUnexclude(Vec<BackendId>),
    BackgroundTasks,
    Status,
    QueueMetrics,
    Logs,
    ChangePhase(CompactString),
}

impl Call {
    /// Single-node or bulk edit.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Exclude(_)
                | Self::Unexclude(_)
                | Self::MarkRetry(..)
                | Self::UnmarkRetry(..)
                | Self::BulkExclude(_)
                | Self::BulkUnexclude(_)
        )
    }
}

#[derive(Debug)]
struct FakeTask {
    task: BackgroundTask,
    polls_left: u32,
    nodes: Vec<BackendId>,
    exclude: bool,
}

#[derive(Debug)]
struct FakeState {
    nodes: IndexMap<NodeKey, DiffNode>,
    status: VecDeque<MigrationStatus>,
    status_error: Option<ApiError>,
    metrics: QueueMetricsReport,
    metrics_error: Option<ApiError>,
    logs: Vec<LogEntry>,
    logs_error: Option<ApiError>,
    failures: HashMap<BackendId, ApiError>,
    tasks: IndexMap<CompactString, FakeTask>,
    next_task: u64,
    bulk_task_threshold: Option<usize>,
    task_polls: u32,
    fail_tasks: bool,
    purge_finished: bool,
    folder_delays: HashMap<CompactString, Duration>,
    search_delay: Option<Duration>,
    mutation_delay: Option<Duration>,
    logs_delay: Option<Duration>,
    calls: Vec<Call>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
            status: VecDeque::from([
                MigrationStatus::new("running").with_checkpoint("Awaiting-Path-Review")
            ]),
            status_error: None,
            metrics: QueueMetricsReport::default(),
            metrics_error: None,
            logs: Vec::new(),
            logs_error: None,
            failures: HashMap::new(),
            tasks: IndexMap::new(),
            next_task: 1,
            bulk_task_threshold: None,
            task_polls: 1,
            fail_tasks: false,
            purge_finished: false,
            folder_delays: HashMap::new(),
            search_delay: None,
            mutation_delay: None,
            logs_delay: None,
            calls: Vec::new(),
        }
    }
}

/// Scriptable in-memory [`ReviewApi`].
#[derive(Debug, Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    /// Empty backend in traversal review.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: impl IntoIterator<Item = DiffNode>) -> Self {
        let api = Self::new();
        for node in nodes {
            api.insert(node);
        }
        api
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, node: DiffNode) {
        self.state().nodes.insert(node.id.clone(), node);
    }

    /// Current server-side copy of a node.
    pub fn node(&self, id: &str) -> Option<DiffNode> {
        self.state().nodes.get(&NodeKey::new(id)).cloned()
    }

    /// Replace the run status returned from now on.
    pub fn set_status(&self, status: MigrationStatus) {
        let mut state = self.state();
        state.status = VecDeque::from([status]);
        state.status_error = None;
    }

    /// Statuses returned by successive calls; the last one repeats.
    pub fn script_status(&self, statuses: impl IntoIterator<Item = MigrationStatus>) {
        let statuses: VecDeque<_> = statuses.into_iter().collect();
        if !statuses.is_empty() {
            self.state().status = statuses;
        }
    }

    pub fn fail_status(&self, error: Option<ApiError>) {
        self.state().status_error = error;
    }

    pub fn set_metrics(&self, metrics: QueueMetricsReport) {
        self.state().metrics = metrics;
    }

    pub fn fail_metrics(&self, error: Option<ApiError>) {
        self.state().metrics_error = error;
    }

    pub fn push_logs(&self, entries: impl IntoIterator<Item = LogEntry>) {
        self.state().logs.extend(entries);
    }

    pub fn fail_logs(&self, error: Option<ApiError>) {
        self.state().logs_error = error;
    }

    /// Every edit addressed at `id` fails with `error` until cleared.
    pub fn fail_node(&self, id: impl Into<CompactString>, error: ApiError) {
        self.state().failures.insert(BackendId(id.into()), error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Bulk edits of at least `threshold` ids run as background tasks.
    pub fn set_bulk_task_threshold(&self, threshold: Option<usize>) {
        self.state().bulk_task_threshold = threshold;
    }

    /// Task polls a background task stays running for.
    pub fn set_task_polls(&self, polls: u32) {
        self.state().task_polls = polls;
    }

    pub fn fail_tasks(&self, fail: bool) {
        self.state().fail_tasks = fail;
    }

    /// Drop tasks from the listing as soon as they finish.
    pub fn purge_finished_tasks(&self, purge: bool) {
        self.state().purge_finished = purge;
    }

    /// Respond to folder page requests for `path` after `delay`.
    pub fn delay_folder(&self, path: &str, delay: Duration) {
        self.state()
            .folder_delays
            .insert(normalize_path(path).as_ref().into(), delay);
    }

    pub fn delay_search(&self, delay: Option<Duration>) {
        self.state().search_delay = delay;
    }

    pub fn delay_mutations(&self, delay: Option<Duration>) {
        self.state().mutation_delay = delay;
    }

    pub fn delay_logs(&self, delay: Option<Duration>) {
        self.state().logs_delay = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn mutation_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    async fn mutate(
        &self,
        call: Call,
        node: &BackendId,
        required: MigrationPhase,
        edit: impl FnOnce(&mut FakeState, &BackendId),
    ) -> ApiResult<()> {
        let delay = {
            let mut state = self.state();
            state.calls.push(call);
            state.mutation_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(err) = state.failures.get(node) {
            return Err(err.clone());
        }
        let phase = state.current_status().phase();
        if phase != required {
            return Err(ApiError::rejected(
                "PHASE_LOCKED",
                format!("not permitted during {phase}"),
            ));
        }
        if state.find_side(node).is_none() {
            return Err(ApiError::Status {
                status: 404,
                body: format!("node {node} not found"),
            });
        }
        edit(&mut state, node);
        Ok(())
    }

    async fn bulk(&self, nodes: &[BackendId], exclude: bool) -> ApiResult<BulkAccepted> {
        let mut state = self.state();
        state.calls.push(if exclude {
            Call::BulkExclude(nodes.to_vec())
        } else {
            Call::BulkUnexclude(nodes.to_vec())
        });

        if state.current_status().phase() != MigrationPhase::TraversalReview {
            return Err(ApiError::rejected("PHASE_LOCKED", "bulk edits need traversal review"));
        }
        if let Some(err) = nodes.iter().find_map(|id| state.failures.get(id)) {
            return Err(err.clone());
        }

        let as_task = state
            .bulk_task_threshold
            .is_some_and(|threshold| nodes.len() >= threshold);
        if !as_task {
            for id in nodes {
                state.set_exclusion(id, exclude);
            }
            return Ok(BulkAccepted { task_id: None });
        }

        let id = format_compact!("task-{}", state.next_task);
        state.next_task += 1;
        let polls_left = state.task_polls;
        state.tasks.insert(
            id.clone(),
            FakeTask {
                task: BackgroundTask {
                    id: id.clone(),
                    status: TaskStatus::Running,
                    error: None,
                },
                polls_left,
                nodes: nodes.to_vec(),
                exclude,
            },
        );
        Ok(BulkAccepted { task_id: Some(id) })
    }
}

impl FakeState {
    fn current_status(&self) -> MigrationStatus {
        self.status.front().cloned().unwrap_or_default()
    }

    fn find_side(&self, id: &BackendId) -> Option<(NodeKey, Side)> {
        self.nodes.values().find_map(|node| {
            if node.src.as_ref().is_some_and(|s| &s.id == id) {
                Some((node.id.clone(), Side::Src))
            } else if node.dst.as_ref().is_some_and(|d| &d.id == id) {
                Some((node.id.clone(), Side::Dst))
            } else {
                None
            }
        })
    }

    fn set_exclusion(&mut self, id: &BackendId, exclude: bool) {
        let Some((key, side)) = self.find_side(id) else {
            return;
        };
        let (own, inherited) = if exclude {
            (CopyStatus::ExclusionExplicit, CopyStatus::ExclusionInherited)
        } else {
            (CopyStatus::Pending, CopyStatus::Pending)
        };

        let mut root_path = None;
        if let Some(node) = self.nodes.get_mut(&key) {
            set_copy(node, side, own);
            root_path = Some(node.location_path.clone());
        }

        if let Some(root) = root_path {
            for node in self.nodes.values_mut() {
                if !is_descendant(&node.location_path, &root) {
                    continue;
                }
                let current = node.effective_copy_status();
                let inherited_change = if exclude {
                    current != CopyStatus::ExclusionExplicit
                } else {
                    current == CopyStatus::ExclusionInherited
                };
                if inherited_change {
                    set_copy(node, Side::Src, inherited);
                }
            }
        }
    }

    fn set_retry(&mut self, id: &BackendId, marked: bool) {
        if let Some((key, _)) = self.find_side(id)
            && let Some(node) = self.nodes.get_mut(&key)
        {
            node.retry_marked = marked;
        }
    }
}

fn set_copy(node: &mut DiffNode, side: Side, status: CopyStatus) {
    if let Some(record) = node.side_mut(side) {
        record.copy_status = status;
    }
    if side == Side::Src || node.src.is_none() {
        node.copy_status = Some(status);
    }
}

fn parent_of(path: &str) -> String {
    let path = normalize_path(path);
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn paginate(mut items: Vec<DiffNode>, page: PageRequest) -> (Vec<DiffNode>, Pagination) {
    let total = items.len() as u64;
    let start = (page.offset as usize).min(items.len());
    let end = (start + page.limit as usize).min(items.len());
    let slice = items.drain(start..end).collect();
    let pagination = Pagination {
        offset: page.offset,
        limit: page.limit,
        total: Some(total),
        has_more: (end as u64) < total,
    };
    (slice, pagination)
}

fn matches_query(node: &DiffNode, query: &SearchQuery, phase: MigrationPhase) -> bool {
    if let Some(text) = &query.text {
        let haystack = match query.field {
            SearchField::Path => node.location_path.as_str(),
            SearchField::Name => node.name.as_str(),
        };
        if !haystack.to_lowercase().contains(text.to_lowercase().as_str()) {
            return false;
        }
    }

    match query.type_filter {
        TypeFilter::Folder if !node.is_folder() => return false,
        TypeFilter::File if !node.is_file() => return false,
        _ => {}
    }

    if let Some(depth) = query.depth
        && !depth.op.matches(u64::from(node.depth()), u64::from(depth.value))
    {
        return false;
    }

    if let Some(size) = query.effective_size()
        && !size.op.matches(node.display_size().unwrap_or(0), size.value)
    {
        return false;
    }

    match query.status {
        None => true,
        Some(StatusFilter::Excluded) => node.effective_copy_status().is_excluded(),
        Some(StatusFilter::NotOnSrc) => node.is_dst_only(),
        Some(StatusFilter::Failed) if phase.is_copy_scoped() => {
            node.effective_copy_status() == CopyStatus::Failed
        }
        Some(StatusFilter::Pending) if phase.is_copy_scoped() => {
            node.effective_copy_status() == CopyStatus::Pending
        }
        Some(StatusFilter::Failed) => node.traversal_failed(),
        Some(StatusFilter::Pending) => node.traversal_pending(),
    }
}

fn sort_nodes(items: &mut [DiffNode], field: SortField, dir: SortDir) {
    items.sort_by(|a, b| {
        let ordering = match field {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Path => a.location_path.cmp(&b.location_path),
            SortField::Depth => a.depth().cmp(&b.depth()),
            SortField::Size => a.display_size().cmp(&b.display_size()),
            SortField::Type => a.is_file().cmp(&b.is_file()),
            SortField::TraversalStatus => a
                .traversal_status
                .map(|s| s.to_string())
                .cmp(&b.traversal_status.map(|s| s.to_string())),
        };
        match dir {
            SortDir::Asc => ordering,
            SortDir::Desc => ordering.reverse(),
        }
    });
}

fn stats_of(items: &[DiffNode]) -> ReviewStats {
    let mut stats = ReviewStats::default();
    for node in items {
        if node.traversal_failed() {
            stats.failed += 1;
        } else if node.traversal_pending() {
            stats.pending += 1;
        }
        if node.effective_copy_status().is_excluded() {
            stats.excluded += 1;
        }
        if node.is_folder() {
            stats.folders += 1;
        } else {
            stats.files += 1;
            stats.total_size += node.display_size().unwrap_or(0);
        }
    }
    stats
}

impl ReviewApi for FakeApi {
    fn diffs<'a>(
        &'a self,
        _migration: &'a str,
        path: &'a str,
        page: PageRequest,
    ) -> BoxFuture<'a, ApiResult<DiffPage>> {
        Box::pin(async move {
            let parent = normalize_path(path).trim_end_matches('/').to_string();
            let parent = if parent.is_empty() { "/".to_string() } else { parent };

            // Answer from the state at request time, deliver after the delay.
            let (page, delay) = {
                let mut state = self.state();
                state.calls.push(Call::Diffs {
                    path: parent.as_str().into(),
                    offset: page.offset,
                });
                let children: Vec<DiffNode> = state
                    .nodes
                    .values()
                    .filter(|n| parent_of(&n.location_path) == parent)
                    .cloned()
                    .collect();
                let (items, pagination) = paginate(children, page);
                let delay = state.folder_delays.get(parent.as_str()).copied();
                (
                    DiffPage {
                        items,
                        pagination,
                        stats: None,
                    },
                    delay,
                )
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(page)
        })
    }

    fn search<'a>(
        &'a self,
        _migration: &'a str,
        query: &'a SearchQuery,
        phase: MigrationPhase,
        page: PageRequest,
    ) -> BoxFuture<'a, ApiResult<DiffPage>> {
        Box::pin(async move {
            let (page, delay) = {
                let mut state = self.state();
                state.calls.push(Call::Search {
                    offset: page.offset,
                });
                let mut matching: Vec<DiffNode> = state
                    .nodes
                    .values()
                    .filter(|n| matches_query(n, query, phase))
                    .cloned()
                    .collect();
                if let Some(field) = query.sort {
                    sort_nodes(&mut matching, field, query.sort_dir);
                }
                let stats = stats_of(&matching);
                let (items, pagination) = paginate(matching, page);
                (
                    DiffPage {
                        items,
                        pagination,
                        stats: Some(stats),
                    },
                    state.search_delay,
                )
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(page)
        })
    }

    fn exclude_node<'a>(
        &'a self,
        _migration: &'a str,
        node: &'a BackendId,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.mutate(
            Call::Exclude(node.clone()),
            node,
            MigrationPhase::TraversalReview,
            |state, id| state.set_exclusion(id, true),
        ))
    }

    fn unexclude_node<'a>(
        &'a self,
        _migration: &'a str,
        node: &'a BackendId,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.mutate(
            Call::Unexclude(node.clone()),
            node,
            MigrationPhase::TraversalReview,
            |state, id| state.set_exclusion(id, false),
        ))
    }

    fn mark_for_retry<'a>(
        &'a self,
        _migration: &'a str,
        node: &'a BackendId,
        scope: RetryScope,
    ) -> BoxFuture<'a, ApiResult<()>> {
        let required = match scope {
            RetryScope::Discovery => MigrationPhase::TraversalReview,
            RetryScope::Copy => MigrationPhase::CopyReview,
        };
        Box::pin(self.mutate(
            Call::MarkRetry(node.clone(), scope),
            node,
            required,
            |state, id| state.set_retry(id, true),
        ))
    }

    fn unmark_for_retry<'a>(
        &'a self,
        _migration: &'a str,
        node: &'a BackendId,
        scope: RetryScope,
    ) -> BoxFuture<'a, ApiResult<()>> {
        let required = match scope {
            RetryScope::Discovery => MigrationPhase::TraversalReview,
            RetryScope::Copy => MigrationPhase::CopyReview,
        };
        Box::pin(self.mutate(
            Call::UnmarkRetry(node.clone(), scope),
            node,
            required,
            |state, id| state.set_retry(id, false),
        ))
    }

    fn bulk_exclude<'a>(
        &'a self,
        _migration: &'a str,
        nodes: &'a [BackendId],
    ) -> BoxFuture<'a, ApiResult<BulkAccepted>> {
        Box::pin(self.bulk(nodes, true))
    }

    fn bulk_unexclude<'a>(
        &'a self,
        _migration: &'a str,
        nodes: &'a [BackendId],
    ) -> BoxFuture<'a, ApiResult<BulkAccepted>> {
        Box::pin(self.bulk(nodes, false))
    }

    fn background_tasks<'a>(
        &'a self,
        _migration: &'a str,
    ) -> BoxFuture<'a, ApiResult<Vec<BackgroundTask>>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::BackgroundTasks);
            let fail = state.fail_tasks;

            let mut finished = Vec::new();
            for (id, task) in state.tasks.iter_mut() {
                if task.task.status != TaskStatus::Running {
                    continue;
                }
                task.polls_left = task.polls_left.saturating_sub(1);
                if task.polls_left == 0 {
                    if fail {
                        task.task.status = TaskStatus::Failed;
                        task.task.error = Some("bulk operation failed".to_string());
                    } else {
                        task.task.status = TaskStatus::Completed;
                        finished.push(id.clone());
                    }
                }
            }

            for id in finished {
                let Some(task) = state.tasks.get(&id) else {
                    continue;
                };
                let (nodes, exclude) = (task.nodes.clone(), task.exclude);
                for node in &nodes {
                    state.set_exclusion(node, exclude);
                }
            }

            if state.purge_finished {
                state.tasks.retain(|_, t| t.task.status != TaskStatus::Completed);
            }
            Ok(state.tasks.values().map(|t| t.task.clone()).collect())
        })
    }

    fn status<'a>(&'a self, _migration: &'a str) -> BoxFuture<'a, ApiResult<MigrationStatus>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Status);
            if let Some(err) = &state.status_error {
                return Err(err.clone());
            }
            if state.status.len() > 1
                && let Some(status) = state.status.pop_front()
            {
                return Ok(status);
            }
            Ok(state.current_status())
        })
    }

    fn queue_metrics<'a>(
        &'a self,
        _migration: &'a str,
    ) -> BoxFuture<'a, ApiResult<QueueMetricsReport>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::QueueMetrics);
            match &state.metrics_error {
                Some(err) => Err(err.clone()),
                None => Ok(state.metrics.clone()),
            }
        })
    }

    fn logs<'a>(
        &'a self,
        _migration: &'a str,
        request: &'a LogsRequest,
    ) -> BoxFuture<'a, ApiResult<LogBatch>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.calls.push(Call::Logs);
                state.logs_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let state = self.state();
            if let Some(err) = &state.logs_error {
                return Err(err.clone());
            }

            // Entries up to and including the last seen id of their level are skipped.
            let cutoffs: HashMap<LogLevel, usize> = request
                .last_seen_ids
                .iter()
                .filter_map(|(level, last)| {
                    state
                        .logs
                        .iter()
                        .position(|e| e.level == *level && &e.id == last)
                        .map(|index| (*level, index))
                })
                .collect();

            let mut batch = LogBatch::default();
            for (index, entry) in state.logs.iter().enumerate() {
                if cutoffs.get(&entry.level).is_some_and(|&cut| index <= cut) {
                    continue;
                }
                batch.logs.entry(entry.level).or_default().push(entry.clone());
            }
            Ok(batch)
        })
    }

    fn change_phase<'a>(
        &'a self,
        _migration: &'a str,
        target: MigrationPhase,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let Some(checkpoint) = target.checkpoint() else {
                return Err(ApiError::rejected(
                    "INVALID_PHASE",
                    format!("{target} cannot be requested"),
                ));
            };
            let mut state = self.state();
            state.calls.push(Call::ChangePhase(checkpoint.into()));
            let next = MigrationStatus {
                checkpoint_status: Some(checkpoint.to_string()),
                ..state.current_status()
            };
            state.status = VecDeque::from([next]);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathreview_core::{NodeSide, NodeType};

    fn tree() -> FakeApi {
        FakeApi::with_nodes([
            DiffNode::new_src_only("docs", "/docs", NodeType::Folder, NodeSide::new("s-docs")),
            DiffNode::new_src_only("a", "/docs/a.txt", NodeType::File, NodeSide::new("s-a")),
            DiffNode::new_on_both(
                "b",
                "/docs/b.txt",
                NodeType::File,
                NodeSide::new("s-b"),
                NodeSide::new("d-b"),
            ),
            DiffNode::new_src_only("top", "/top.txt", NodeType::File, NodeSide::new("s-top")),
        ])
    }

    #[tokio::test]
    async fn test_diffs_lists_children() {
        let api = tree();
        let page = api.diffs("m", "/docs", PageRequest::first(1)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.pagination.total, Some(2));
        assert!(page.pagination.has_more);

        let root = api.diffs("m", "/", PageRequest::first(10)).await.unwrap();
        assert_eq!(root.items.len(), 2);
    }

    #[tokio::test]
    async fn test_exclude_inherits_to_children() {
        let api = tree();
        api.exclude_node("m", &BackendId::new("s-docs")).await.unwrap();
        assert_eq!(
            api.node("a").unwrap().effective_copy_status(),
            CopyStatus::ExclusionInherited
        );

        api.unexclude_node("m", &BackendId::new("s-docs")).await.unwrap();
        assert_eq!(
            api.node("a").unwrap().effective_copy_status(),
            CopyStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_phase_locked_outside_review() {
        let api = tree();
        api.set_status(MigrationStatus::new("running").with_checkpoint("Awaiting-Copy-Review"));
        let err = api
            .exclude_node("m", &BackendId::new("s-a"))
            .await
            .unwrap_err();
        assert!(err.is_phase_locked());
    }

    #[tokio::test]
    async fn test_bulk_task_completes_after_polls() {
        let api = tree();
        api.set_bulk_task_threshold(Some(1));
        api.set_task_polls(2);

        let accepted = api
            .bulk_exclude("m", &[BackendId::new("s-top")])
            .await
            .unwrap();
        let task_id = accepted.task_id.unwrap();

        let tasks = api.background_tasks("m").await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Running);
        let tasks = api.background_tasks("m").await.unwrap();
        assert_eq!(tasks[0].id, task_id);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert!(api.node("top").unwrap().effective_copy_status().is_excluded());
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/a/b"), "/a");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("a/b/"), "/a");
    }
}
