//! The backend contract consumed by the review engine.

use std::future::Future;
use std::pin::Pin;

use pathreview_core::{BackendId, MigrationPhase, PageRequest, SearchQuery};

use crate::error::ApiResult;
use crate::types::{
    BackgroundTask, BulkAccepted, DiffPage, LogBatch, LogsRequest, MigrationStatus,
    QueueMetricsReport, RetryScope,
};

/// Type alias for boxed futures returned by async API methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Migration backend endpoints.
///
/// Implemented over HTTP by [`crate::HttpReviewApi`] and in memory by the
/// `fake` feature's `FakeApi`. Every method addresses one migration run.
pub trait ReviewApi: Send + Sync {
    /// Children of one folder.
    fn diffs<'a>(
        &'a self,
        migration: &'a str,
        path: &'a str,
        page: PageRequest,
    ) -> BoxFuture<'a, ApiResult<DiffPage>>;

    /// Flat filtered and sorted listing. Status filters are scoped by `phase`.
    fn search<'a>(
        &'a self,
        migration: &'a str,
        query: &'a SearchQuery,
        phase: MigrationPhase,
        page: PageRequest,
    ) -> BoxFuture<'a, ApiResult<DiffPage>>;

    fn exclude_node<'a>(&'a self, migration: &'a str, node: &'a BackendId)
    -> BoxFuture<'a, ApiResult<()>>;

    fn unexclude_node<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
    ) -> BoxFuture<'a, ApiResult<()>>;

    fn mark_for_retry<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
        scope: RetryScope,
    ) -> BoxFuture<'a, ApiResult<()>>;

    fn unmark_for_retry<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
        scope: RetryScope,
    ) -> BoxFuture<'a, ApiResult<()>>;

    /// May hand back a background task id instead of completing inline.
    fn bulk_exclude<'a>(
        &'a self,
        migration: &'a str,
        nodes: &'a [BackendId],
    ) -> BoxFuture<'a, ApiResult<BulkAccepted>>;

    fn bulk_unexclude<'a>(
        &'a self,
        migration: &'a str,
        nodes: &'a [BackendId],
    ) -> BoxFuture<'a, ApiResult<BulkAccepted>>;

    fn background_tasks<'a>(&'a self, migration: &'a str)
    -> BoxFuture<'a, ApiResult<Vec<BackgroundTask>>>;

    fn status<'a>(&'a self, migration: &'a str) -> BoxFuture<'a, ApiResult<MigrationStatus>>;

    fn queue_metrics<'a>(&'a self, migration: &'a str)
    -> BoxFuture<'a, ApiResult<QueueMetricsReport>>;

    fn logs<'a>(
        &'a self,
        migration: &'a str,
        request: &'a LogsRequest,
    ) -> BoxFuture<'a, ApiResult<LogBatch>>;

    /// Move the run to `target`'s checkpoint.
    fn change_phase<'a>(
        &'a self,
        migration: &'a str,
        target: MigrationPhase,
    ) -> BoxFuture<'a, ApiResult<()>>;
}
