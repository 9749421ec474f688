use scd::coordinator::BatchCoordinator;
use scd::error::ErrorKind;
use scd::failpoints::{
    APPLY_AFTER_COMMIT, APPLY_BEFORE_COMMIT, InjectedError, KEY_WORKER_BEFORE_READ,
};
use scd::store::memory::MemoryStateStore;
use scd::table::HistorizedTable;
use scd::table::memory::MemoryTable;
use scd::test_utils::failpoints::FailpointGuard;
use scd::test_utils::record::{test_config, upsert};
use scd::types::RecordKey;
use telemetry::tracing::init_test_tracing;

fn coordinator() -> BatchCoordinator<MemoryTable, MemoryStateStore> {
    BatchCoordinator::new(
        test_config(),
        MemoryTable::new("dim_user"),
        MemoryStateStore::new(),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_commit_leaves_no_partial_history() {
    init_test_tracing();
    let _failpoints = FailpointGuard::setup().always(APPLY_BEFORE_COMMIT, InjectedError::NoRetry);
    let coordinator = coordinator();

    let summary = coordinator
        .process_batch(
            "b1",
            vec![upsert("U1", 1, &[("name", "A")]), upsert("U1", 2, &[("name", "B")])],
        )
        .await
        .unwrap();

    assert_eq!(summary.keys_failed(), 1);
    assert_eq!(summary.failures[0].kind(), ErrorKind::WithNoRetry);
    assert!(
        coordinator
            .table()
            .read_history(&RecordKey::from("U1"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_after_commit_is_recognized_on_retry() {
    init_test_tracing();
    let _failpoints =
        FailpointGuard::setup().times(APPLY_AFTER_COMMIT, 1, InjectedError::TimedRetry);
    let coordinator = coordinator();

    let summary = coordinator
        .process_batch(
            "b1",
            vec![upsert("U1", 1, &[("name", "A")]), upsert("U1", 2, &[("name", "B")])],
        )
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.keys_already_applied, 1);
    assert_eq!(coordinator.table().commits().await, 1);
    assert_eq!(
        coordinator
            .table()
            .read_history(&RecordKey::from("U1"))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn read_failure_is_retried() {
    init_test_tracing();
    let _failpoints =
        FailpointGuard::setup().times(KEY_WORKER_BEFORE_READ, 1, InjectedError::ReadFailed);
    let coordinator = coordinator();

    let summary = coordinator
        .process_batch("b1", vec![upsert("U1", 1, &[("name", "A")])])
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.rows_opened, 1);
}
