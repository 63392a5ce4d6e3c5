//! End-to-end edit tests against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use pathreview_api::fake::{Call, FakeApi};
use pathreview_api::{ApiError, MigrationStatus, RetryScope};
use pathreview_core::{
    BackendId, CopyStatus, DiffNode, MigrationPhase, NodeSide, NodeType, Selection,
    SelectionAction,
};
use pathreview_ops::{
    BulkEdit, Mutation, MutationError, MutationEvent, MutationExecutor, MutationJob,
    MutationKind, MutationLedger, NodeSnapshot, Settlement, start_mutation_worker,
    wait_for_task,
};
use tokio_util::sync::CancellationToken;

const REVIEW: MigrationPhase = MigrationPhase::TraversalReview;

fn dual_file() -> DiffNode {
    DiffNode::new_on_both(
        "b",
        "/docs/b.txt",
        NodeType::File,
        NodeSide::new("s-b"),
        NodeSide::new("d-b"),
    )
}

fn fixture() -> Arc<FakeApi> {
    Arc::new(FakeApi::with_nodes([
        DiffNode::new_src_only("docs", "/docs", NodeType::Folder, NodeSide::new("s-docs")),
        DiffNode::new_src_only("a", "/docs/a.txt", NodeType::File, NodeSide::new("s-a")),
        dual_file(),
        DiffNode::new_src_only("top", "/top.txt", NodeType::File, NodeSide::new("s-top")),
    ]))
}

fn executor(api: &Arc<FakeApi>) -> MutationExecutor {
    MutationExecutor::new(api.clone(), "m1")
}

#[tokio::test]
async fn test_dual_sided_exclude_calls_both_ids() {
    let api = fixture();
    let mutation = Mutation::prepare(&dual_file(), MutationKind::Exclude, REVIEW).unwrap();

    executor(&api).execute(&mutation).await.unwrap();

    assert_eq!(
        api.mutation_calls(),
        vec![
            Call::Exclude(BackendId::new("s-b")),
            Call::Exclude(BackendId::new("d-b")),
        ]
    );
    let remote = api.node("b").unwrap();
    assert!(remote.sides().all(|s| s.copy_status == CopyStatus::ExclusionExplicit));
}

#[tokio::test]
async fn test_partial_failure_compensates_primary() {
    let api = fixture();
    api.fail_node(
        "d-b",
        ApiError::Status {
            status: 500,
            body: "boom".into(),
        },
    );
    let mutation = Mutation::prepare(&dual_file(), MutationKind::Exclude, REVIEW).unwrap();

    let err = executor(&api).execute(&mutation).await.unwrap_err();

    assert!(matches!(
        err,
        MutationError::PartialFailure {
            compensated: true,
            ..
        }
    ));
    assert!(err.is_transient());
    assert_eq!(
        api.mutation_calls(),
        vec![
            Call::Exclude(BackendId::new("s-b")),
            Call::Exclude(BackendId::new("d-b")),
            Call::Unexclude(BackendId::new("s-b")),
        ]
    );
    let remote = api.node("b").unwrap();
    assert_eq!(remote.effective_copy_status(), CopyStatus::Pending);
}

#[tokio::test]
async fn test_missing_backend_id_sends_nothing() {
    let api = fixture();
    let mut node = dual_file();
    node.src = None;
    node.dst = None;

    let err = Mutation::prepare(&node, MutationKind::Exclude, REVIEW).unwrap_err();

    assert!(matches!(err, MutationError::NoBackendId { .. }));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_phase_locked_is_not_retried() {
    let api = fixture();
    api.set_status(MigrationStatus::new("running").with_checkpoint("Awaiting-Copy-Review"));
    let node = api.node("top").unwrap();
    let mutation = Mutation::prepare(&node, MutationKind::Exclude, REVIEW).unwrap();

    let err = executor(&api).execute(&mutation).await.unwrap_err();

    assert!(err.is_silent());
    assert_eq!(api.mutation_calls().len(), 1);
}

#[tokio::test]
async fn test_copy_scope_retry_uses_copy_endpoint() {
    let api = fixture();
    api.set_status(MigrationStatus::new("running").with_checkpoint("Awaiting-Copy-Review"));
    let node = api.node("top").unwrap();
    let mutation =
        Mutation::prepare(&node, MutationKind::MarkRetry, MigrationPhase::CopyReview).unwrap();

    executor(&api).execute(&mutation).await.unwrap();

    assert_eq!(
        api.mutation_calls(),
        vec![Call::MarkRetry(BackendId::new("s-top"), RetryScope::Copy)]
    );
    assert!(api.node("top").unwrap().retry_marked);
}

#[tokio::test]
async fn test_worker_round_trip_returns_to_original() {
    let api = fixture();
    let (worker, mut events) = start_mutation_worker(executor(&api), Duration::from_millis(10));
    let mut ledger = MutationLedger::default();
    let mut local = api.node("top").unwrap();
    let original = NodeSnapshot::capture(&local);

    for kind in [MutationKind::Exclude, MutationKind::Unexclude] {
        let mutation = Mutation::prepare(&local, kind, REVIEW).unwrap();
        let seq = ledger.begin(local.id.clone(), kind, NodeSnapshot::capture(&local));
        mutation.apply(&mut local);
        worker
            .submit(MutationJob::Node { seq, mutation })
            .await
            .unwrap();
    }
    assert!(ledger.is_in_flight(&local.id));

    let mut settled = Vec::new();
    for _ in 0..2 {
        let Some(MutationEvent::Settled { seq, node, result, .. }) = events.recv().await else {
            panic!("expected settlement");
        };
        let settlement = ledger.settle(&node, seq, result.err().map(|e| e.to_string()));
        settled.push((seq, settlement));
    }

    assert_eq!(settled[0], (0, Settlement::Superseded));
    assert_eq!(settled[1], (1, Settlement::Commit));
    assert!(original.matches(&local));
    assert_eq!(
        api.node("top").unwrap().effective_copy_status(),
        CopyStatus::Pending
    );
    worker.shutdown();
}

fn selection_of(nodes: &[DiffNode]) -> Selection {
    let mut selection = Selection::new();
    for (index, node) in nodes.iter().enumerate() {
        selection.apply(SelectionAction::Toggle {
            node: node.clone(),
            index: Some(index),
        });
    }
    selection
}

#[tokio::test(start_paused = true)]
async fn test_bulk_task_polls_until_complete() {
    let api = fixture();
    api.set_bulk_task_threshold(Some(1));
    api.set_task_polls(3);
    let (worker, mut events) = start_mutation_worker(executor(&api), Duration::from_secs(1));

    let selection = selection_of(&[api.node("docs").unwrap(), api.node("a").unwrap()]);
    let edit = BulkEdit::from_selection(7, &selection, MutationKind::Exclude, REVIEW).unwrap();
    assert_eq!(edit.nodes, vec![BackendId::new("s-docs")]);
    worker
        .submit(MutationJob::Bulk {
            edit,
            phase: REVIEW,
        })
        .await
        .unwrap();

    let Some(MutationEvent::BulkQueued { id, task }) = events.recv().await else {
        panic!("expected queued task");
    };
    assert_eq!(id, 7);

    let Some(MutationEvent::BulkSettled { id, result }) = events.recv().await else {
        panic!("expected settlement");
    };
    assert_eq!(id, 7);
    let report = result.unwrap();
    assert_eq!(report.task, Some(task));
    assert_eq!(api.count_calls(|c| *c == Call::BackgroundTasks), 3);
    assert!(api.node("a").unwrap().effective_copy_status().is_excluded());
    worker.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_bulk_task_failure_is_reported() {
    let api = fixture();
    api.set_bulk_task_threshold(Some(1));
    api.set_task_polls(2);
    api.fail_tasks(true);
    let (worker, mut events) = start_mutation_worker(executor(&api), Duration::from_secs(1));

    let selection = selection_of(&[api.node("top").unwrap()]);
    let edit = BulkEdit::from_selection(1, &selection, MutationKind::Exclude, REVIEW).unwrap();
    worker
        .submit(MutationJob::Bulk {
            edit,
            phase: REVIEW,
        })
        .await
        .unwrap();

    assert!(matches!(
        events.recv().await,
        Some(MutationEvent::BulkQueued { .. })
    ));
    let Some(MutationEvent::BulkSettled { result, .. }) = events.recv().await else {
        panic!("expected settlement");
    };
    assert!(matches!(result, Err(MutationError::TaskFailed { .. })));
    worker.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unlisted_task_counts_as_finished() {
    let api = fixture();
    let cancel = CancellationToken::new();

    let waited = tokio::time::timeout(
        Duration::from_secs(3600),
        wait_for_task(api.as_ref(), "m1", "task-gone", Duration::from_secs(1), &cancel),
    )
    .await;

    assert!(matches!(waited, Ok(Ok(()))));
    assert_eq!(api.count_calls(|c| *c == Call::BackgroundTasks), 1);
}

#[tokio::test(start_paused = true)]
async fn test_purged_task_still_settles_bulk() {
    let api = fixture();
    api.set_bulk_task_threshold(Some(1));
    api.set_task_polls(2);
    api.purge_finished_tasks(true);
    let (worker, mut events) = start_mutation_worker(executor(&api), Duration::from_secs(1));

    let selection = selection_of(&[api.node("top").unwrap()]);
    let edit = BulkEdit::from_selection(3, &selection, MutationKind::Exclude, REVIEW).unwrap();
    worker
        .submit(MutationJob::Bulk {
            edit,
            phase: REVIEW,
        })
        .await
        .unwrap();

    assert!(matches!(
        events.recv().await,
        Some(MutationEvent::BulkQueued { id: 3, .. })
    ));
    let Some(MutationEvent::BulkSettled { id, result }) = events.recv().await else {
        panic!("expected settlement");
    };
    assert_eq!(id, 3);
    assert!(result.is_ok());
    assert!(api.node("top").unwrap().effective_copy_status().is_excluded());
    worker.shutdown();
}

#[tokio::test]
async fn test_inline_bulk_settles_without_polling() {
    let api = fixture();
    let (worker, mut events) = start_mutation_worker(executor(&api), Duration::from_secs(1));

    let selection = selection_of(&[api.node("top").unwrap(), dual_file()]);
    let edit = BulkEdit::from_selection(2, &selection, MutationKind::Exclude, REVIEW).unwrap();
    assert_eq!(
        edit.nodes,
        vec![
            BackendId::new("s-top"),
            BackendId::new("s-b"),
            BackendId::new("d-b")
        ]
    );
    worker
        .submit(MutationJob::Bulk {
            edit,
            phase: REVIEW,
        })
        .await
        .unwrap();

    let Some(MutationEvent::BulkSettled { result, .. }) = events.recv().await else {
        panic!("expected settlement");
    };
    assert_eq!(result.unwrap().task, None);
    assert_eq!(api.count_calls(|c| *c == Call::BackgroundTasks), 0);
    worker.shutdown();
}
