//! Status, queue-metrics and log polling for one migration.
//!
//! Each stream runs on its own timer in its own task. Status is the only
//! signal that decides whether the run is finished; once it reports a
//! terminal phase the other streams are cancelled, in-flight calls
//! included, and no further calls are made. Metrics and log failures are
//! logged, never surfaced.

use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use pathreview_api::{
    ApiError, ApiResult, BoxFuture, LogBatch, LogsRequest, MigrationStatus, QueueMetricsReport,
    ReviewApi,
};
use pathreview_core::{MigrationPhase, ReviewConfig};
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::SYNC_CHANNEL_SIZE;
use crate::logs::advance_cursor;

/// One of the three poll streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stream {
    Status,
    Metrics,
    Logs,
}

/// Lifecycle of a poll stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamState {
    /// Observation has not started.
    #[default]
    Idle,
    Active,
    /// Logs only: the reader scrolled away from the live edge.
    Paused,
    /// Terminal status seen or torn down. Never restarts.
    Stopped,
}

impl StreamState {
    pub fn is_polling(self) -> bool {
        self == Self::Active
    }
}

/// State of all three streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStates {
    pub status: StreamState,
    pub metrics: StreamState,
    pub logs: StreamState,
}

impl PollStates {
    fn started() -> Self {
        Self {
            status: StreamState::Active,
            metrics: StreamState::Active,
            logs: StreamState::Active,
        }
    }

    fn stopped() -> Self {
        Self {
            status: StreamState::Stopped,
            metrics: StreamState::Stopped,
            logs: StreamState::Stopped,
        }
    }

    pub fn get(&self, stream: Stream) -> StreamState {
        match stream {
            Stream::Status => self.status,
            Stream::Metrics => self.metrics,
            Stream::Logs => self.logs,
        }
    }

    pub fn all_stopped(&self) -> bool {
        [self.status, self.metrics, self.logs]
            .iter()
            .all(|s| *s == StreamState::Stopped)
    }
}

/// Poll cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub status: Duration,
    pub metrics: Duration,
    pub logs: Duration,
}

impl From<&ReviewConfig> for PollIntervals {
    fn from(config: &ReviewConfig) -> Self {
        Self {
            status: config.status_interval(),
            metrics: config.metrics_interval(),
            logs: config.log_interval(),
        }
    }
}

/// Reader-driven changes to the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    /// Reader scrolled away from the newest lines.
    PauseLogs,
    /// Reader is back at the live edge; back-fill immediately.
    ResumeLogs,
}

/// Events emitted by the poller.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Status {
        status: MigrationStatus,
        phase: MigrationPhase,
    },
    /// A status poll failed. Status errors are always reported.
    StatusFailed(ApiError),
    Metrics(QueueMetricsReport),
    Logs(LogBatch),
    StreamChanged {
        stream: Stream,
        state: StreamState,
    },
    /// A terminal phase was reported; every stream has stopped.
    Finished(MigrationPhase),
}

/// Handle to a running poller. Dropping it stops every stream.
#[derive(Debug)]
pub struct PollHandle {
    control: mpsc::Sender<PollControl>,
    cancel: CancellationToken,
}

impl PollHandle {
    pub async fn pause_logs(&self) {
        let _ = self.control.send(PollControl::PauseLogs).await;
    }

    pub async fn resume_logs(&self) {
        let _ = self.control.send(PollControl::ResumeLogs).await;
    }

    /// Tear down all three streams.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.control.is_closed()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start observing `migration`.
///
/// Returns a handle for reader controls and a receiver of [`SyncEvent`]s.
/// The poller also stops when the receiver is dropped.
pub fn start_polling(
    api: Arc<dyn ReviewApi>,
    migration: impl Into<CompactString>,
    intervals: PollIntervals,
) -> (PollHandle, mpsc::Receiver<SyncEvent>) {
    let (control_tx, control_rx) = mpsc::channel(SYNC_CHANNEL_SIZE);
    let (tx, rx) = mpsc::channel(SYNC_CHANNEL_SIZE);
    let cancel = CancellationToken::new();

    let poller = Poller {
        api,
        migration: migration.into(),
        states: PollStates::default(),
        finished: None,
        tx,
    };
    tokio::spawn(poller.run(intervals, control_rx, cancel.clone()));

    (
        PollHandle {
            control: control_tx,
            cancel,
        },
        rx,
    )
}

/// Owns the status stream and the lifecycle of the other two.
struct Poller {
    api: Arc<dyn ReviewApi>,
    migration: CompactString,
    states: PollStates,
    /// Terminal phase reported by status, if any.
    finished: Option<MigrationPhase>,
    tx: mpsc::Sender<SyncEvent>,
}

/// Outcome of one loop step.
enum Flow {
    Continue,
    Stop,
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Poller {
    async fn run(
        mut self,
        intervals: PollIntervals,
        mut control: mpsc::Receiver<PollControl>,
        cancel: CancellationToken,
    ) {
        if self.transition(PollStates::started()).await.is_stop() {
            return;
        }
        tracing::debug!(target: "poll", migration = %self.migration, "Polling started");

        let streams = cancel.child_token();
        let (live_tx, live_rx) = watch::channel(true);
        let metrics = tokio::spawn(run_metrics(self.feed(&streams), intervals.metrics));
        let logs = tokio::spawn(run_logs(self.feed(&streams), intervals.logs, live_rx));

        let api = self.api.clone();
        let migration = self.migration.clone();
        let mut status_tick = ticker(intervals.status);

        loop {
            let flow = tokio::select! {
                biased;

                _ = cancel.cancelled() => Flow::Stop,

                ctl = control.recv() => match ctl {
                    Some(PollControl::PauseLogs) => self.set_logs_live(&live_tx, false).await,
                    Some(PollControl::ResumeLogs) => self.set_logs_live(&live_tx, true).await,
                    None => Flow::Stop,
                },

                _ = status_tick.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Flow::Stop,
                        result = api.status(&migration) => self.on_status(result).await,
                    }
                }
            };

            if flow.is_stop() {
                break;
            }
        }

        streams.cancel();
        let _ = metrics.await;
        let _ = logs.await;

        if !self.states.all_stopped() {
            let _ = self.transition(PollStates::stopped()).await;
        }
        if let Some(phase) = self.finished {
            let _ = self.emit(SyncEvent::Finished(phase)).await;
        }
        tracing::debug!(target: "poll", migration = %self.migration, "Polling stopped");
    }

    fn feed(&self, cancel: &CancellationToken) -> Feed {
        Feed {
            api: self.api.clone(),
            migration: self.migration.clone(),
            tx: self.tx.clone(),
            cancel: cancel.clone(),
        }
    }

    async fn emit(&self, event: SyncEvent) -> Flow {
        match self.tx.send(event).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Stop,
        }
    }

    /// Move to `next`, announcing every stream whose state changed.
    async fn transition(&mut self, next: PollStates) -> Flow {
        let previous = self.states;
        self.states = next;
        for stream in [Stream::Status, Stream::Metrics, Stream::Logs] {
            let state = next.get(stream);
            if previous.get(stream) != state
                && self
                    .emit(SyncEvent::StreamChanged { stream, state })
                    .await
                    .is_stop()
            {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn on_status(&mut self, result: ApiResult<MigrationStatus>) -> Flow {
        let status = match result {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(target: "poll", error = %err, "Status poll failed");
                return self.emit(SyncEvent::StatusFailed(err)).await;
            }
        };

        let phase = status.phase();
        if self.emit(SyncEvent::Status { status, phase }).await.is_stop() {
            return Flow::Stop;
        }
        if !phase.is_terminal() {
            return Flow::Continue;
        }

        tracing::info!(target: "poll", migration = %self.migration, %phase, "Migration reached a terminal phase");
        self.finished = Some(phase);
        Flow::Stop
    }

    /// Pause or resume the log stream. Resuming back-fills at once.
    async fn set_logs_live(&mut self, live: &watch::Sender<bool>, on: bool) -> Flow {
        let (from, to) = if on {
            (StreamState::Paused, StreamState::Active)
        } else {
            (StreamState::Active, StreamState::Paused)
        };
        if self.states.logs != from {
            return Flow::Continue;
        }
        live.send_replace(on);
        let next = PollStates {
            logs: to,
            ..self.states
        };
        self.transition(next).await
    }
}

/// What the metrics and log streams share. Each runs in its own task so a
/// slow call on one never delays a status tick.
struct Feed {
    api: Arc<dyn ReviewApi>,
    migration: CompactString,
    tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl Feed {
    /// Await `call` unless the stream is cancelled first.
    async fn call<T>(&self, call: BoxFuture<'_, ApiResult<T>>) -> Option<ApiResult<T>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = call => Some(result),
        }
    }

    async fn emit(&self, event: SyncEvent) -> Flow {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Stop,
            sent = self.tx.send(event) => match sent {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Stop,
            },
        }
    }
}

async fn run_metrics(feed: Feed, period: Duration) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            biased;
            _ = feed.cancel.cancelled() => return,
            _ = tick.tick() => {}
        }

        let Some(result) = feed.call(feed.api.queue_metrics(&feed.migration)).await else {
            return;
        };
        let flow = match result {
            Ok(report) => feed.emit(SyncEvent::Metrics(report)).await,
            Err(err) => {
                log_quiet_failure(Stream::Metrics, &err);
                Flow::Continue
            }
        };
        if flow.is_stop() {
            return;
        }
    }
}

/// Poll logs while `live` is set. The request cursor lives here only.
async fn run_logs(feed: Feed, period: Duration, mut live: watch::Receiver<bool>) {
    let mut cursor = LogsRequest::default();
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            biased;
            _ = feed.cancel.cancelled() => return,
            changed = live.changed() => {
                if changed.is_err() {
                    return;
                }
                if !*live.borrow_and_update() {
                    continue;
                }
                tick.reset();
            }
            _ = tick.tick(), if *live.borrow() => {}
        }

        let Some(result) = feed.call(feed.api.logs(&feed.migration, &cursor)).await else {
            return;
        };
        match result {
            Ok(batch) if batch.is_empty() => {}
            Ok(batch) => {
                advance_cursor(&mut cursor.last_seen_ids, &batch);
                if feed.emit(SyncEvent::Logs(batch)).await.is_stop() {
                    return;
                }
            }
            Err(err) => log_quiet_failure(Stream::Logs, &err),
        }
    }
}

impl Flow {
    fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

fn log_quiet_failure(stream: Stream, err: &ApiError) {
    if err.is_database_unavailable() {
        tracing::debug!(target: "poll", %stream, "Backend store unavailable");
    } else {
        tracing::warn!(target: "poll", %stream, error = %err, "Poll failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_lifecycle() {
        let idle = PollStates::default();
        assert_eq!(idle.get(Stream::Logs), StreamState::Idle);
        assert!(!idle.all_stopped());

        let started = PollStates::started();
        assert!(started.get(Stream::Metrics).is_polling());
        assert!(PollStates::stopped().all_stopped());
    }

    #[test]
    fn test_intervals_from_config() {
        let config = ReviewConfig::default();
        let intervals = PollIntervals::from(&config);
        assert_eq!(intervals.status, Duration::from_millis(200));
        assert_eq!(intervals.logs, Duration::from_millis(500));
    }
}
