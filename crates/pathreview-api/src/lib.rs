//! Migration backend contract for pathreview.
//!
//! [`ReviewApi`] is the seam between the review engine and the backend. It is
//! implemented over HTTP by [`HttpReviewApi`]; the `fake` feature adds an
//! in-memory implementation for tests.

mod client;
mod error;
mod http;
mod types;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use client::{BoxFuture, ReviewApi};
pub use error::{ApiError, ApiResult, DATABASE_NOT_AVAILABLE, PHASE_LOCKED_CODES};
pub use http::HttpReviewApi;
pub use types::{
    BackgroundTask, BulkAccepted, BulkRequest, DiffPage, LogBatch, LogData, LogEntry, LogLevel,
    LogsRequest, MigrationStatus, PhaseChange, QueueMetrics, QueueMetricsReport, RetryScope,
    TaskStatus,
};
