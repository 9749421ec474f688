use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use scd::coordinator::BatchCoordinator;
use scd::store::memory::MemoryStateStore;
use scd::table::HistorizedTable;
use scd::table::memory::MemoryTable;
use scd::test_utils::history::{assert_history_invariants, current_row, timeline};
use scd::test_utils::record::{delete, test_config, upsert};
use scd::types::{Cell, EffectiveEnd, RawChangeRecord, RecordKey, Sequence};
use telemetry::tracing::init_test_tracing;

fn new_coordinator() -> BatchCoordinator<MemoryTable, MemoryStateStore> {
    BatchCoordinator::new(
        test_config(),
        MemoryTable::new("dim_user"),
        MemoryStateStore::new(),
    )
    .unwrap()
}

/// Builds a changelog of several keys with distinct sequences per key.
fn changelog() -> Vec<RawChangeRecord> {
    let mut records = Vec::new();
    for key in ["U1", "U2", "U3", "U4"] {
        for sequence in 1..=12i64 {
            let login = format!("t{sequence}");
            let record = match sequence % 5 {
                0 => delete(key, sequence),
                1 => upsert(key, sequence, &[("name", "A")]),
                2 => upsert(key, sequence, &[("last_login", login.as_str())]),
                3 => upsert(key, sequence, &[("name", "B"), ("city", "Rome")]),
                _ => upsert(key, sequence, &[("city", "Oslo")]),
            };
            records.push(record);
        }
    }
    records
}

#[tokio::test(flavor = "multi_thread")]
async fn scd2_history_for_out_of_order_records() {
    init_test_tracing();
    let coordinator = new_coordinator();

    coordinator
        .process_batch(
            "b1",
            vec![
                upsert("U1", 1, &[("name", "A")]),
                upsert("U1", 3, &[("name", "B")]),
                upsert("U1", 2, &[("name", "C")]),
            ],
        )
        .await
        .unwrap();

    let rows = coordinator
        .table()
        .read_history(&RecordKey::from("U1"))
        .await
        .unwrap();
    let timeline = timeline(&rows);
    let intervals: Vec<(Sequence, EffectiveEnd, Cell)> = timeline
        .into_iter()
        .map(|(start, end, payload)| (start, end, payload["name"].clone()))
        .collect();

    assert_eq!(
        intervals,
        vec![
            (
                Sequence::Integer(1),
                EffectiveEnd::At(Sequence::Integer(2)),
                Cell::from("A")
            ),
            (
                Sequence::Integer(2),
                EffectiveEnd::At(Sequence::Integer(3)),
                Cell::from("C")
            ),
            (Sequence::Integer(3), EffectiveEnd::Open, Cell::from("B")),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn arrival_order_does_not_change_history() {
    init_test_tracing();
    let ordered = new_coordinator();
    ordered.process_batch("b1", changelog()).await.unwrap();
    let expected = ordered.table().rows().await;
    assert_history_invariants(&expected);

    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..5 {
        let mut shuffled = changelog();
        shuffled.shuffle(&mut rng);

        let coordinator = new_coordinator();
        let summary = coordinator
            .process_batch(format!("b{round}"), shuffled)
            .await
            .unwrap();

        assert!(summary.is_complete());
        assert_eq!(coordinator.table().rows().await, expected);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivery_is_idempotent() {
    init_test_tracing();
    let coordinator = new_coordinator();

    coordinator.process_batch("b1", changelog()).await.unwrap();
    let once = coordinator.table().rows().await;

    let summary = coordinator.process_batch("b1", changelog()).await.unwrap();
    let twice = coordinator.table().rows().await;

    assert_eq!(once, twice);
    assert_eq!(summary.rows_opened, 0);
    assert_eq!(summary.rows_closed, 0);
    assert_eq!(summary.rows_updated_in_place, 0);
    assert_history_invariants(&twice);
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivered_in_place_change_does_not_roll_back_a_newer_one() {
    init_test_tracing();
    let coordinator = new_coordinator();

    coordinator
        .process_batch(
            "b1",
            vec![
                upsert("U1", 5, &[("name", "A"), ("last_login", "t0")]),
                upsert("U1", 6, &[("last_login", "t1")]),
                upsert("U1", 8, &[("last_login", "t2")]),
            ],
        )
        .await
        .unwrap();

    let summary = coordinator
        .process_batch("b2", vec![upsert("U1", 6, &[("last_login", "t1")])])
        .await
        .unwrap();

    assert_eq!(summary.rows_updated_in_place, 0);
    assert_eq!(summary.stale_records, 1);

    let rows = coordinator.table().rows().await;
    assert_history_invariants(&rows);
    let history = &rows[&RecordKey::from("U1")];
    assert_eq!(history.len(), 1);
    let current = current_row(history).unwrap();
    assert_eq!(current.payload["last_login"], Cell::from("t2"));
    assert_eq!(current.applied_through(), Sequence::Integer(8));
}

#[tokio::test(flavor = "multi_thread")]
async fn history_split_over_batches_matches_a_single_batch() {
    init_test_tracing();
    let single = new_coordinator();
    single.process_batch("all", changelog()).await.unwrap();

    let split = new_coordinator();
    // The changelog lists each key's twelve records in ascending sequence, so the first six of
    // every key go to the first batch.
    let (first, second): (Vec<_>, Vec<_>) = changelog()
        .into_iter()
        .enumerate()
        .partition(|(index, _)| index % 12 < 6);
    split
        .process_batch("first", first.into_iter().map(|(_, record)| record))
        .await
        .unwrap();
    split
        .process_batch("second", second.into_iter().map(|(_, record)| record))
        .await
        .unwrap();

    assert_eq!(split.table().rows().await, single.table().rows().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_leaves_no_current_row_until_reinsert() {
    init_test_tracing();
    let coordinator = new_coordinator();
    let key = RecordKey::from("U1");

    coordinator
        .process_batch(
            "b1",
            vec![upsert("U1", 7, &[("name", "A")]), delete("U1", 10)],
        )
        .await
        .unwrap();

    let rows = coordinator.table().read_history(&key).await.unwrap();
    assert!(current_row(&rows).is_none());
    assert_eq!(rows[0].effective_end, EffectiveEnd::At(Sequence::Integer(10)));

    // A late update older than the tombstone is stale.
    let summary = coordinator
        .process_batch("b2", vec![upsert("U1", 9, &[("name", "X")])])
        .await
        .unwrap();
    assert_eq!(summary.stale_records, 1);

    coordinator
        .process_batch("b3", vec![upsert("U1", 12, &[("name", "B")])])
        .await
        .unwrap();

    let rows = coordinator.table().read_history(&key).await.unwrap();
    let current = current_row(&rows).unwrap();
    assert_eq!(current.effective_start, Sequence::Integer(12));
    assert_eq!(current.payload["name"], Cell::from("B"));
    assert_eq!(rows.len(), 2);
}
