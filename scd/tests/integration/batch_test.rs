use scd::coordinator::BatchCoordinator;
use scd::error::ErrorKind;
use scd::store::StateStore;
use scd::store::memory::MemoryStateStore;
use scd::table::HistorizedTable;
use scd::table::memory::MemoryTable;
use scd::test_utils::faulty_table::{FaultConfig, FaultyTable};
use scd::test_utils::history::{assert_history_invariants, current_row};
use scd::test_utils::record::{test_config, upsert};
use scd::types::{Cell, HistorizedRow, Payload, RecordKey, Sequence};
use std::time::Duration;
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_batches_keep_one_current_row() {
    init_test_tracing();
    let table = FaultyTable::wrap(
        MemoryTable::new("dim_user"),
        FaultConfig {
            commit_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        },
    );
    let mut config = test_config();
    config.retry.max_attempts = 5;
    let store = MemoryStateStore::new();

    let first = BatchCoordinator::new(config.clone(), table.clone(), store.clone()).unwrap();
    let second = BatchCoordinator::new(config, table.clone(), store).unwrap();

    let named = |prefix: &str, sequence: i64| {
        let name = format!("{prefix}-{sequence}");
        upsert("U1", sequence, &[("name", name.as_str())])
    };
    let first_batch: Vec<_> = (1..=5).map(|sequence| named("first", sequence)).collect();
    let second_batch: Vec<_> = (3..=8).map(|sequence| named("second", sequence)).collect();

    let (first_summary, second_summary) = tokio::join!(
        first.process_batch("first", first_batch),
        second.process_batch("second", second_batch),
    );
    let first_summary = first_summary.unwrap();
    let second_summary = second_summary.unwrap();

    assert!(first_summary.is_complete());
    assert!(second_summary.is_complete());

    let rows = table.get_inner().rows().await;
    assert_history_invariants(&rows);

    let history = &rows[&RecordKey::from("U1")];
    let current = current_row(history).unwrap();
    assert_eq!(current.effective_start, Sequence::Integer(8));
    assert_eq!(current.payload["name"], Cell::from("second-8"));
}

#[tokio::test(flavor = "multi_thread")]
async fn once_only_batches_are_recorded_when_complete() {
    init_test_tracing();
    let mut config = test_config();
    config.once_only = true;
    let store = MemoryStateStore::new();
    let coordinator =
        BatchCoordinator::new(config, MemoryTable::new("dim_user"), store.clone()).unwrap();

    coordinator
        .process_batch("b1", vec![upsert("U1", 1, &[("name", "A")])])
        .await
        .unwrap();
    assert!(store.is_batch_committed("b1").await.unwrap());

    let err = coordinator
        .process_batch("b1", vec![upsert("U1", 2, &[("name", "B")])])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BatchAlreadyCommitted);

    // Another batch identifier is processed normally.
    let summary = coordinator
        .process_batch("b2", vec![upsert("U1", 2, &[("name", "B")])])
        .await
        .unwrap();
    assert_eq!(summary.rows_opened, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn once_only_batch_with_failures_can_be_reprocessed() {
    init_test_tracing();
    let mut config = test_config();
    config.once_only = true;
    config.retry.max_attempts = 1;
    let store = MemoryStateStore::new();
    let table = FaultyTable::wrap(
        MemoryTable::new("dim_user"),
        FaultConfig {
            failed_commits: 1,
            ..Default::default()
        },
    );
    let coordinator = BatchCoordinator::new(config, table.clone(), store.clone()).unwrap();
    let batch = vec![upsert("U1", 1, &[("name", "A")])];

    let summary = coordinator.process_batch("b1", batch.clone()).await.unwrap();
    assert_eq!(summary.keys_failed(), 1);
    assert!(!store.is_batch_committed("b1").await.unwrap());

    let summary = coordinator.process_batch("b1", batch).await.unwrap();
    assert!(summary.is_complete());
    assert!(store.is_batch_committed("b1").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn once_only_batch_submitted_twice_concurrently_is_applied_once() {
    init_test_tracing();
    let mut config = test_config();
    config.once_only = true;
    let store = MemoryStateStore::new();
    let table = FaultyTable::wrap(
        MemoryTable::new("dim_user"),
        FaultConfig {
            commit_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );
    let first = BatchCoordinator::new(config.clone(), table.clone(), store.clone()).unwrap();
    let second = BatchCoordinator::new(config, table.clone(), store.clone()).unwrap();
    let batch = vec![
        upsert("U1", 1, &[("name", "A")]),
        upsert("U2", 1, &[("name", "B")]),
    ];

    let (first_result, second_result) = tokio::join!(
        first.process_batch("b1", batch.clone()),
        second.process_batch("b1", batch),
    );

    let (summary, err) = match (first_result, second_result) {
        (Ok(summary), Err(err)) | (Err(err), Ok(summary)) => (summary, err),
        (first, second) => panic!("expected exactly one run, got {first:?} and {second:?}"),
    };
    assert!(summary.is_complete());
    assert_eq!(summary.rows_opened, 2);
    assert!(matches!(
        err.kind(),
        ErrorKind::BatchInProgress | ErrorKind::BatchAlreadyCommitted
    ));
    assert!(store.is_batch_committed("b1").await.unwrap());

    let rows = table.get_inner().rows().await;
    assert_history_invariants(&rows);
    assert_eq!(rows[&RecordKey::from("U1")].len(), 1);
    assert_eq!(rows[&RecordKey::from("U2")].len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_abandons_keys_that_did_not_start() {
    init_test_tracing();
    let mut config = test_config();
    config.batch.max_concurrent_keys = 1;
    config.batch.timeout_ms = Some(50);
    let table = FaultyTable::wrap(
        MemoryTable::new("dim_user"),
        FaultConfig {
            commit_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        },
    );
    let coordinator =
        BatchCoordinator::new(config, table.clone(), MemoryStateStore::new()).unwrap();

    let summary = coordinator
        .process_batch(
            "b1",
            vec![
                upsert("U1", 1, &[("name", "A")]),
                upsert("U2", 1, &[("name", "A")]),
                upsert("U3", 1, &[("name", "A")]),
            ],
        )
        .await
        .unwrap();

    assert!(!summary.is_complete());
    assert_eq!(summary.keys_succeeded, 1);
    assert_eq!(summary.abandoned_keys.len(), 2);
    for key in &summary.abandoned_keys {
        assert!(table.read_history(key).await.unwrap().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn quarantined_key_is_processed_again_after_release() {
    init_test_tracing();
    let table = MemoryTable::new("dim_user");
    let store = MemoryStateStore::new();
    let coordinator = BatchCoordinator::new(test_config(), table.clone(), store.clone()).unwrap();
    let key = RecordKey::from("U1");
    let corrupt = vec![
        HistorizedRow::open(key.clone(), Payload::new(), Sequence::Integer(1)),
        HistorizedRow::open(key.clone(), Payload::new(), Sequence::Integer(2)),
    ];
    table.insert_rows(corrupt).await;

    let summary = coordinator
        .process_batch("b1", vec![upsert("U1", 3, &[("name", "A")])])
        .await
        .unwrap();
    assert_eq!(summary.quarantined_keys, vec![key.clone()]);

    // The key stays excluded while quarantined, even once its history is fine.
    table.clear().await;
    let summary = coordinator
        .process_batch("b2", vec![upsert("U1", 4, &[("name", "B")])])
        .await
        .unwrap();
    assert_eq!(summary.failures[0].kind(), ErrorKind::KeyQuarantined);
    assert!(table.read_history(&key).await.unwrap().is_empty());

    assert!(store.release_key(&key).await.unwrap());
    let summary = coordinator
        .process_batch("b3", vec![upsert("U1", 4, &[("name", "B")])])
        .await
        .unwrap();
    assert!(summary.is_complete());
    assert_eq!(table.read_history(&key).await.unwrap().len(), 1);
}
