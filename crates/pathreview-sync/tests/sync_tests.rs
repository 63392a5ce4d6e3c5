//! Session and poller tests against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use pathreview_api::fake::{Call, FakeApi};
use pathreview_api::{ApiError, LogData, LogEntry, LogLevel, MigrationStatus};
use pathreview_core::{
    CopyBlocker, CopyStatus, DiffNode, MigrationPhase, NodeKey, NodeSide, NodeType,
    ReviewConfig, SearchQuery, TraversalStatus,
};
use pathreview_ops::{LedgerOutcome, MutationKind};
use pathreview_sync::{
    LoadOutcome, PollIntervals, ReviewSession, Stale, Stream, StreamState, SyncEvent,
    start_polling,
};

fn side(id: &str) -> NodeSide {
    NodeSide::new(id).with_traversal(TraversalStatus::Successful)
}

fn fixture() -> Arc<FakeApi> {
    Arc::new(FakeApi::with_nodes([
        DiffNode::new_src_only("docs", "/docs", NodeType::Folder, side("s-docs")),
        DiffNode::new_src_only("a", "/docs/a.txt", NodeType::File, side("s-a")),
        DiffNode::new_src_only("top", "/top.txt", NodeType::File, side("s-top")),
    ]))
}

fn running() -> MigrationStatus {
    MigrationStatus::new("running").with_checkpoint("Traversal-In-Progress")
}

fn intervals(status: u64, metrics: u64, logs: u64) -> PollIntervals {
    PollIntervals {
        status: Duration::from_millis(status),
        metrics: Duration::from_millis(metrics),
        logs: Duration::from_millis(logs),
    }
}

fn log_entry(id: &str) -> LogEntry {
    LogEntry {
        id: id.into(),
        level: LogLevel::Info,
        data: LogData {
            message: Some(format!("entry {id}")),
            ..LogData::default()
        },
    }
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn session_on_root(api: &Arc<FakeApi>) -> ReviewSession {
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());
    let ticket = session.root();
    assert_eq!(session.load(ticket).await, LoadOutcome::Replaced(2));
    session
}

fn key(id: &str) -> NodeKey {
    NodeKey::new(id)
}

#[tokio::test(start_paused = true)]
async fn test_terminal_status_stops_every_stream() {
    let api = fixture();
    api.script_status([
        running(),
        running(),
        MigrationStatus::new("Complete"),
    ]);
    let (_handle, mut rx) = start_polling(api.clone(), "m1", intervals(100, 100, 100));

    let mut finished = None;
    while let Some(event) = rx.recv().await {
        if let SyncEvent::Finished(phase) = event {
            finished = Some(phase);
        }
    }
    assert_eq!(finished, Some(MigrationPhase::Complete));

    let calls = api.calls().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.calls().len(), calls);
    assert_eq!(api.count_calls(|c| *c == Call::Status), 3);
}

#[tokio::test(start_paused = true)]
async fn test_review_checkpoint_keeps_polling() {
    let api = fixture();
    let (handle, mut rx) = start_polling(api.clone(), "m1", intervals(100, 100, 100));

    tokio::time::sleep(Duration::from_millis(550)).await;
    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, SyncEvent::Finished(_))));
    assert!(!events.iter().any(|e| matches!(
        e,
        SyncEvent::StreamChanged {
            state: StreamState::Stopped,
            ..
        }
    )));
    assert!(api.count_calls(|c| *c == Call::Status) >= 5);
    assert!(!handle.is_stopped());
    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_slow_logs_do_not_delay_status() {
    let api = fixture();
    api.set_status(running());
    api.delay_logs(Some(Duration::from_secs(10)));
    let (handle, mut rx) = start_polling(api.clone(), "m1", intervals(200, 200, 500));

    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        drain(&mut rx);
    }
    assert!(api.count_calls(|c| *c == Call::Status) >= 90);
    assert!(api.count_calls(|c| *c == Call::QueueMetrics) >= 90);

    let stopped_at = tokio::time::Instant::now();
    handle.stop();
    while rx.recv().await.is_some() {}
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_database_unavailable_is_silent() {
    let api = fixture();
    api.set_status(running());
    api.fail_metrics(Some(ApiError::rejected("DATABASE_NOT_AVAILABLE", "store closed")));
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());
    let (handle, mut rx) = start_polling(api.clone(), "m1", intervals(1000, 100, 1000));

    tokio::time::sleep(Duration::from_millis(550)).await;
    handle.stop();
    for event in drain(&mut rx) {
        assert!(!matches!(event, SyncEvent::Metrics(_) | SyncEvent::StatusFailed(_)));
        session.on_sync_event(event);
    }

    assert!(session.metrics().is_none());
    assert!(session.take_notices().is_empty());
    assert!(api.count_calls(|c| *c == Call::QueueMetrics) >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_paused_logs_backfill_on_resume() {
    let api = fixture();
    api.set_status(running());
    api.push_logs([log_entry("1")]);
    let (handle, mut rx) = start_polling(api.clone(), "m1", intervals(1000, 1000, 100));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let first: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::Logs(batch) => Some(batch.len()),
            _ => None,
        })
        .collect();
    assert_eq!(first, vec![1]);

    handle.pause_logs().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    api.push_logs([log_entry("2"), log_entry("3")]);
    let polls = api.count_calls(|c| *c == Call::Logs);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(api.count_calls(|c| *c == Call::Logs), polls);
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::StreamChanged { stream: Stream::Logs, state: StreamState::Paused }))
    );

    handle.resume_logs().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let backfill: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::Logs(batch) => Some(batch.into_entries().map(|e| e.id).collect::<Vec<_>>()),
            _ => None,
        })
        .collect();
    assert_eq!(backfill, vec![vec!["2", "3"]]);
    handle.stop();
}

#[tokio::test]
async fn test_root_load_seeds_source_only_selection() {
    let api = fixture();
    let session = session_on_root(&api).await;

    assert_eq!(session.selection().len(), 2);
    assert!(session.selection().contains(&key("docs")));
    assert_eq!(session.window().breadcrumbs(), vec!["/"]);
}

#[tokio::test]
async fn test_copy_blocked_until_stats_known() {
    let api = fixture();
    let mut session = session_on_root(&api).await;

    assert_eq!(session.copy_blocker(), Some(CopyBlocker::StatsUnknown));
    session.refresh_stats().await.unwrap();
    assert_eq!(session.copy_blocker(), None);
}

#[tokio::test]
async fn test_click_applies_then_commits() {
    let api = fixture();
    let mut session = session_on_root(&api).await;
    session.refresh_stats().await.unwrap();

    session.click(&key("top")).await.unwrap();
    let local = session.window().node(&key("top")).unwrap();
    assert_eq!(local.effective_copy_status(), CopyStatus::ExclusionExplicit);
    assert_eq!(session.ledger().in_flight(), 1);
    assert!(matches!(
        session.copy_blocker(),
        Some(CopyBlocker::InFlight(1))
    ));

    session.settle().await;

    assert_eq!(session.ledger().in_flight(), 0);
    assert_eq!(session.epoch(), 1);
    assert!(
        api.node("top")
            .unwrap()
            .effective_copy_status()
            .is_excluded()
    );
    assert!(session.can_start_copy());
}

#[tokio::test]
async fn test_failed_click_rolls_back_with_notice() {
    let api = fixture();
    api.fail_node("s-top", ApiError::rejected("NODE_NOT_FOUND", "gone"));
    let mut session = session_on_root(&api).await;

    session.click(&key("top")).await.unwrap();
    session.settle().await;

    let local = session.window().node(&key("top")).unwrap();
    assert_eq!(local.effective_copy_status(), CopyStatus::Pending);
    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].node, Some(key("top")));
}

#[tokio::test]
async fn test_dst_failure_restores_both_sides() {
    let api = Arc::new(FakeApi::with_nodes([DiffNode::new_on_both(
        "b",
        "/b.txt",
        NodeType::File,
        side("s-b"),
        side("d-b"),
    )]));
    api.fail_node(
        "d-b",
        ApiError::Status {
            status: 500,
            body: "boom".into(),
        },
    );
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());
    let ticket = session.root();
    assert_eq!(session.load(ticket).await, LoadOutcome::Replaced(1));
    let before = session.window().node(&key("b")).unwrap().clone();

    session.click(&key("b")).await.unwrap();
    session.settle().await;

    let local = session.window().node(&key("b")).unwrap();
    let src_copy = |n: &DiffNode| n.src.as_ref().map(|s| s.copy_status);
    let dst_copy = |n: &DiffNode| n.dst.as_ref().map(|d| d.copy_status);
    assert_eq!(src_copy(local), src_copy(&before));
    assert_eq!(dst_copy(local), dst_copy(&before));

    let remote = api.node("b").unwrap();
    assert_eq!(src_copy(&remote), src_copy(&before));
    assert_eq!(dst_copy(&remote), dst_copy(&before));
    assert_eq!(session.take_notices().len(), 1);
}

#[tokio::test]
async fn test_phase_locked_edit_rolls_back_quietly() {
    let api = fixture();
    api.fail_node("s-top", ApiError::rejected("PHASE_LOCKED", "review closed"));
    let mut session = session_on_root(&api).await;

    let seq = session.edit(&key("top"), Some(MutationKind::Exclude)).await.unwrap();
    session.settle().await;

    assert!(session.take_notices().is_empty());
    assert!(matches!(
        session.ledger().outcome(seq),
        Some(LedgerOutcome::RolledBack { .. })
    ));
    assert_eq!(
        session.window().node(&key("top")).unwrap().effective_copy_status(),
        CopyStatus::Pending
    );
}

#[tokio::test]
async fn test_page_issued_before_edit_is_refetched() {
    let api = fixture();
    let mut session = session_on_root(&api).await;

    let ticket = session.reload();
    session.click(&key("top")).await.unwrap();
    session.settle().await;

    let stale = session.fetch(&ticket).await;
    assert_eq!(
        session.page_loaded(&ticket, stale),
        LoadOutcome::Discarded(Stale::PreEdit)
    );

    let ticket = session.reload();
    assert_eq!(session.load(ticket).await, LoadOutcome::Replaced(2));
    assert!(
        session
            .window()
            .node(&key("top"))
            .unwrap()
            .effective_copy_status()
            .is_excluded()
    );
}

#[tokio::test]
async fn test_stale_append_after_navigation_is_discarded() {
    let api = fixture();
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());
    let ticket = session.set_page_size(1);
    session.load(ticket).await;
    let more = session.load_more().unwrap();

    let open = session.open_folder("/docs");
    let late = session.fetch(&more).await;
    assert_eq!(
        session.page_loaded(&more, late),
        LoadOutcome::Discarded(Stale::Locator)
    );
    assert_eq!(session.load(open).await, LoadOutcome::Replaced(1));
    assert_eq!(session.window().items()[0].id, key("a"));
}

#[tokio::test]
async fn test_bulk_exclude_clears_selection() {
    let api = fixture();
    let mut session = session_on_root(&api).await;

    session.bulk(MutationKind::Exclude).await.unwrap();
    session.settle().await;

    assert!(session.selection().is_empty());
    assert_eq!(
        api.mutation_calls(),
        vec![Call::BulkExclude(vec![
            pathreview_core::BackendId::new("s-docs"),
            pathreview_core::BackendId::new("s-top"),
        ])]
    );
    assert_eq!(
        api.node("a").unwrap().effective_copy_status(),
        CopyStatus::ExclusionInherited
    );
    assert!(
        session
            .window()
            .items()
            .iter()
            .all(|n| n.effective_copy_status().is_excluded())
    );
}

#[tokio::test]
async fn test_phase_change_clears_selection() {
    let api = fixture();
    let mut session = session_on_root(&api).await;
    assert!(!session.selection().is_empty());

    session.change_phase(MigrationPhase::CopyInProgress).await.unwrap();

    assert!(session.selection().is_empty());
    assert_eq!(session.phase(), MigrationPhase::CopyInProgress);
    assert!(api.calls().contains(&Call::ChangePhase("Preparing-For-Copy".into())));
    assert_eq!(
        session.refresh_status().await.unwrap(),
        MigrationPhase::CopyInProgress
    );
}

#[tokio::test(start_paused = true)]
async fn test_typed_search_runs_last_query() {
    let api = fixture();
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());

    session.type_search(SearchQuery::new().with_text("d")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.type_search(SearchQuery::new().with_text("docs")).await;

    let ticket = session.next_search().await.unwrap();
    assert_eq!(session.load(ticket).await, LoadOutcome::Replaced(2));
    assert_eq!(api.count_calls(|c| matches!(c, Call::Search { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_drops_pending_search() {
    let api = fixture();
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());

    session.type_search(SearchQuery::new().with_text("docs")).await;
    session.close();

    assert!(session.next_search().await.is_none());
}

#[tokio::test]
async fn test_search_records_stats() {
    let api = fixture();
    let mut session = ReviewSession::new(api.clone(), "m1", ReviewConfig::default());

    let ticket = session.search(SearchQuery::new().with_text("txt"));
    assert_eq!(session.load(ticket).await, LoadOutcome::Replaced(2));

    let stats = session.stats().copied().unwrap();
    assert_eq!(stats.files, 2);
    assert!(session.selection().is_empty());
}
