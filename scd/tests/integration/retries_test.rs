use scd::coordinator::BatchCoordinator;
use scd::error::ErrorKind;
use scd::store::memory::MemoryStateStore;
use scd::table::HistorizedTable;
use scd::table::memory::MemoryTable;
use scd::test_utils::faulty_table::{FaultConfig, FaultyTable};
use scd::test_utils::record::{test_config, upsert};
use scd::types::RecordKey;
use telemetry::tracing::init_test_tracing;

fn coordinator(
    faults: FaultConfig,
) -> (
    BatchCoordinator<FaultyTable<MemoryTable>, MemoryStateStore>,
    FaultyTable<MemoryTable>,
) {
    let table = FaultyTable::wrap(MemoryTable::new("dim_user"), faults);
    let coordinator =
        BatchCoordinator::new(test_config(), table.clone(), MemoryStateStore::new()).unwrap();

    (coordinator, table)
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_write_failures_are_retried() {
    init_test_tracing();
    let (coordinator, table) = coordinator(FaultConfig {
        failed_commits: 2,
        ..Default::default()
    });

    let summary = coordinator
        .process_batch(
            "b1",
            vec![upsert("U1", 1, &[("name", "A")]), upsert("U1", 2, &[("name", "B")])],
        )
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.rows_opened, 2);
    assert_eq!(table.commit_calls().await, 3);
    assert_eq!(
        table.read_history(&RecordKey::from("U1")).await.unwrap().len(),
        2
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_write_failures_fail_only_that_key() {
    init_test_tracing();
    let (coordinator, table) = coordinator(FaultConfig {
        failed_commits: 3,
        ..Default::default()
    });

    // Three failures exhaust the default retry budget.
    let summary = coordinator
        .process_batch("b1", vec![upsert("U1", 1, &[("name", "A")])])
        .await
        .unwrap();

    assert_eq!(summary.keys_failed(), 1);
    assert_eq!(summary.failures[0].kind(), ErrorKind::StorageWriteFailed);
    assert!(
        table
            .read_history(&RecordKey::from("U1"))
            .await
            .unwrap()
            .is_empty()
    );

    let summary = coordinator
        .process_batch("b2", vec![upsert("U1", 1, &[("name", "A")])])
        .await
        .unwrap();
    assert!(summary.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_acknowledgement_does_not_duplicate_rows() {
    init_test_tracing();
    let (coordinator, table) = coordinator(FaultConfig {
        lost_acknowledgements: 1,
        ..Default::default()
    });

    let summary = coordinator
        .process_batch(
            "b1",
            vec![upsert("U1", 1, &[("name", "A")]), upsert("U1", 2, &[("name", "B")])],
        )
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.keys_already_applied, 1);
    assert_eq!(summary.rows_opened, 2);

    let history = table.read_history(&RecordKey::from("U1")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|row| row.is_current).count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_failures_are_retried() {
    init_test_tracing();
    let (coordinator, table) = coordinator(FaultConfig {
        failed_reads: 1,
        ..Default::default()
    });

    let summary = coordinator
        .process_batch("b1", vec![upsert("U1", 1, &[("name", "A")])])
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(table.read_calls().await, 2);
}
