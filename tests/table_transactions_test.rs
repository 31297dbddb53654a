// End-to-end transactional scenarios against the public table API:
// appends, deletes, updates, snapshot scans and point fetches under
// concurrent transactions.

use std::sync::Arc;

use laminar_db::catalog::{Column, Constraint, TableCatalogEntry};
use laminar_db::common::{RowId, STORAGE_CHUNK_SIZE};
use laminar_db::execution::{BinaryOperator, Expression};
use laminar_db::index::{Index, UniqueIndex};
use laminar_db::storage::DataTable;
use laminar_db::transaction::{Transaction, TransactionManager};
use laminar_db::types::{DataType, Value};
use laminar_db::vector::{DataChunk, Vector};
use laminar_db::DbError;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn two_int_table() -> DataTable {
    init_test_logging();
    DataTable::new(TableCatalogEntry::new(
        "main",
        "integers",
        vec![
            Column::new("a", DataType::Integer, true),
            Column::new("b", DataType::Integer, true),
        ],
    ))
}

fn two_int_chunk(rows: &[(i32, i32)]) -> DataChunk {
    DataChunk::from_columns(vec![
        Vector::with_values(
            DataType::Integer,
            rows.iter().map(|r| Value::Integer(r.0)).collect(),
        )
        .unwrap(),
        Vector::with_values(
            DataType::Integer,
            rows.iter().map(|r| Value::Integer(r.1)).collect(),
        )
        .unwrap(),
    ])
    .unwrap()
}

fn int_chunk(values: impl IntoIterator<Item = i32>) -> DataChunk {
    DataChunk::from_columns(vec![Vector::with_values(
        DataType::Integer,
        values.into_iter().map(Value::Integer).collect(),
    )
    .unwrap()])
    .unwrap()
}

/// Drains a full snapshot scan into materialized rows.
fn scan_all(table: &DataTable, txn: &Transaction, column_ids: &[usize]) -> Vec<Vec<Value>> {
    let mut state = table.init_scan();
    let mut rows = Vec::new();
    loop {
        let chunk = table.scan(txn, column_ids, &mut state).unwrap();
        if chunk.is_empty() {
            break;
        }
        for row in 0..chunk.len() {
            rows.push(
                (0..column_ids.len())
                    .map(|col| chunk.value(col, row).clone())
                    .collect(),
            );
        }
    }
    rows
}

// ----------------------------------------------------------------------
// Scenario: basic append and scan
// ----------------------------------------------------------------------

#[test]
fn test_basic_append_and_scan() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut t1 = manager.begin();
    table
        .append(&mut t1, &two_int_chunk(&[(1, 10), (2, 20), (3, 30)]))
        .unwrap();
    manager.commit(t1);

    let t2 = manager.begin();
    let rows = scan_all(&table, &t2, &[0, 1]);
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::Integer(10)],
            vec![Value::Integer(2), Value::Integer(20)],
            vec![Value::Integer(3), Value::Integer(30)],
        ]
    );
    assert_eq!(table.cardinality(), 3);
}

#[test]
fn test_scan_projection() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut t1 = manager.begin();
    table
        .append(&mut t1, &two_int_chunk(&[(1, 10), (2, 20)]))
        .unwrap();
    manager.commit(t1);

    let t2 = manager.begin();
    let rows = scan_all(&table, &t2, &[1]);
    assert_eq!(rows, vec![vec![Value::Integer(10)], vec![Value::Integer(20)]]);
}

// ----------------------------------------------------------------------
// Scenario: NOT NULL rejection
// ----------------------------------------------------------------------

#[test]
fn test_not_null_rejection() {
    let table = DataTable::new(
        TableCatalogEntry::new(
            "main",
            "t",
            vec![Column::new("a", DataType::Integer, false)],
        )
        .with_constraints(vec![Constraint::NotNull(0)]),
    );
    let manager = TransactionManager::new();

    let chunk = DataChunk::from_columns(vec![Vector::with_values(
        DataType::Integer,
        vec![Value::Integer(5), Value::Null, Value::Integer(7)],
    )
    .unwrap()])
    .unwrap();

    let mut txn = manager.begin();
    let err = table.append(&mut txn, &chunk).unwrap_err();
    assert!(err.to_string().contains("NOT NULL"));
    assert!(matches!(err, DbError::Constraint(_)));
    assert_eq!(table.cardinality(), 0);
    assert_eq!(txn.undo_entry_count(), 0);
}

#[test]
fn test_check_constraint_on_append() {
    let check = Constraint::check(Expression::binary(
        Expression::ColumnRef(0),
        BinaryOperator::GreaterThan,
        Expression::Literal(Value::Integer(0)),
    ));
    let table = DataTable::new(
        TableCatalogEntry::new(
            "main",
            "t",
            vec![Column::new("a", DataType::Integer, true)],
        )
        .with_constraints(vec![check]),
    );
    let manager = TransactionManager::new();

    let mut txn = manager.begin();
    table.append(&mut txn, &int_chunk([3, 4])).unwrap();
    // NULL passes a CHECK.
    let with_null = DataChunk::from_columns(vec![Vector::with_values(
        DataType::Integer,
        vec![Value::Null],
    )
    .unwrap()])
    .unwrap();
    table.append(&mut txn, &with_null).unwrap();

    let err = table.append(&mut txn, &int_chunk([-1])).unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));
    manager.commit(txn);
    assert_eq!(table.cardinality(), 3);
}

// ----------------------------------------------------------------------
// Scenario: UNIQUE via index rollback
// ----------------------------------------------------------------------

#[test]
fn test_unique_index_rollback_on_partial_failure() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(1, 100)])).unwrap();
    manager.commit(seed);

    // First index keys on column 1, second on column 0; the second refuses
    // the duplicate, after the first already accepted the row.
    let idx_b = Arc::new(UniqueIndex::new(1));
    let idx_a = Arc::new(UniqueIndex::new(0));
    table.add_index(idx_b.clone()).unwrap();
    table.add_index(idx_a.clone()).unwrap();
    assert_eq!(idx_a.cardinality(), 1);
    assert_eq!(idx_b.cardinality(), 1);

    let mut txn = manager.begin();
    let err = table
        .append(&mut txn, &two_int_chunk(&[(1, 999)]))
        .unwrap_err();
    assert!(err.to_string().contains("PRIMARY KEY or UNIQUE"));

    // The attempted row id (1) must not linger in the index that accepted
    // it before the failure.
    assert!(!idx_b.contains_row(1));
    assert_eq!(idx_a.cardinality(), 1);
    assert_eq!(idx_b.cardinality(), 1);
    assert_eq!(table.cardinality(), 1);
    assert_eq!(txn.undo_entry_count(), 0);
}

#[test]
fn test_add_index_rejects_existing_duplicates() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table
        .append(&mut seed, &two_int_chunk(&[(1, 1), (1, 2)]))
        .unwrap();
    manager.commit(seed);

    let err = table.add_index(Arc::new(UniqueIndex::new(0))).unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));
    assert_eq!(table.index_count(), 0);
}

// ----------------------------------------------------------------------
// Scenario: update/update conflict (first-writer-wins)
// ----------------------------------------------------------------------

#[test]
fn test_update_update_conflict() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(7, 70)])).unwrap();
    manager.commit(seed);

    let mut t1 = manager.begin();
    table
        .update(&mut t1, &[0], &[1], &int_chunk([71]))
        .unwrap();

    let mut t2 = manager.begin();
    let err = table
        .update(&mut t2, &[0], &[1], &int_chunk([72]))
        .unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict(_)));
    // The losing transaction produced no undo entries and no mutations.
    assert_eq!(t2.undo_entry_count(), 0);

    manager.commit(t1);
    manager.rollback(t2);

    let reader = manager.begin();
    let rows = scan_all(&table, &reader, &[0, 1]);
    assert_eq!(rows, vec![vec![Value::Integer(7), Value::Integer(71)]]);
}

#[test]
fn test_update_conflicts_with_committed_writer() {
    // T2 snapshots before T1 commits; once T1 has committed, T2's write
    // must lose even though no transaction is in progress anymore.
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(7, 70)])).unwrap();
    manager.commit(seed);

    let mut t2 = manager.begin();
    let mut t1 = manager.begin();
    table.update(&mut t1, &[0], &[1], &int_chunk([71])).unwrap();
    manager.commit(t1);

    let err = table
        .update(&mut t2, &[0], &[1], &int_chunk([72]))
        .unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict(_)));
    assert_eq!(t2.undo_entry_count(), 0);
}

#[test]
fn test_delete_conflicts_with_uncommitted_update() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(1, 10), (2, 20)])).unwrap();
    manager.commit(seed);

    let mut t1 = manager.begin();
    table.update(&mut t1, &[1], &[1], &int_chunk([21])).unwrap();

    let mut t2 = manager.begin();
    let err = table.delete(&mut t2, &[0, 1]).unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict(_)));
    // Batch pre-check: not even the unconflicted row 0 got an undo record.
    assert_eq!(t2.undo_entry_count(), 0);
    manager.rollback(t1);
}

// ----------------------------------------------------------------------
// Scenario: chunk spill on append
// ----------------------------------------------------------------------

#[test]
fn test_chunk_spill_on_large_append() {
    assert_eq!(STORAGE_CHUNK_SIZE, 1024);

    let table = two_int_table();
    let manager = TransactionManager::new();

    let rows: Vec<(i32, i32)> = (0..1500).map(|i| (i, i * 2)).collect();
    let mut txn = manager.begin();
    table.append(&mut txn, &two_int_chunk(&rows)).unwrap();
    manager.commit(txn);

    assert_eq!(table.cardinality(), 1500);

    let reader = manager.begin();
    let scanned = scan_all(&table, &reader, &[0, 1]);
    assert_eq!(scanned.len(), 1500);
    for (i, row) in scanned.iter().enumerate() {
        assert_eq!(row[0], Value::Integer(i as i32));
        assert_eq!(row[1], Value::Integer(i as i32 * 2));
    }
}

// ----------------------------------------------------------------------
// Scenario: delete then scan
// ----------------------------------------------------------------------

#[test]
fn test_delete_then_scan_and_fetch() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let rows: Vec<(i32, i32)> = (0..100).map(|i| (i, i)).collect();
    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&rows)).unwrap();
    manager.commit(seed);

    let mut deleter = manager.begin();
    table.delete(&mut deleter, &[10, 20, 30]).unwrap();
    manager.commit(deleter);

    let reader = manager.begin();
    let scanned = scan_all(&table, &reader, &[0]);
    assert_eq!(scanned.len(), 97);
    let values: Vec<i32> = scanned
        .iter()
        .map(|r| match r[0] {
            Value::Integer(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert!(!values.contains(&10));
    assert!(!values.contains(&20));
    assert!(!values.contains(&30));

    let fetched = table.fetch(&reader, &[0, 1], &[10, 20, 30]).unwrap();
    assert!(fetched.is_empty());

    let fetched = table.fetch(&reader, &[0], &[11]).unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched.value(0, 0), &Value::Integer(11));
}

#[test]
fn test_delete_partitions_across_chunks() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let rows: Vec<(i32, i32)> = (0..1500).map(|i| (i, i)).collect();
    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&rows)).unwrap();
    manager.commit(seed);

    let mut deleter = manager.begin();
    table.delete(&mut deleter, &[1300, 5]).unwrap();
    manager.commit(deleter);

    let reader = manager.begin();
    let scanned = scan_all(&table, &reader, &[0]);
    assert_eq!(scanned.len(), 1498);
    assert!(!scanned.contains(&vec![Value::Integer(5)]));
    assert!(!scanned.contains(&vec![Value::Integer(1300)]));
}

// ----------------------------------------------------------------------
// Snapshot isolation and rollback
// ----------------------------------------------------------------------

#[test]
fn test_snapshot_does_not_see_later_commits() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut t1 = manager.begin();
    table
        .append(&mut t1, &two_int_chunk(&[(1, 1), (2, 2), (3, 3)]))
        .unwrap();
    manager.commit(t1);

    let reader = manager.begin();

    let mut t2 = manager.begin();
    table.append(&mut t2, &two_int_chunk(&[(4, 4), (5, 5)])).unwrap();
    manager.commit(t2);

    // The reader's snapshot predates t2's commit.
    assert_eq!(scan_all(&table, &reader, &[0]).len(), 3);

    let late_reader = manager.begin();
    assert_eq!(scan_all(&table, &late_reader, &[0]).len(), 5);
}

#[test]
fn test_transaction_sees_own_uncommitted_writes() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut txn = manager.begin();
    table.append(&mut txn, &two_int_chunk(&[(1, 1), (2, 2)])).unwrap();

    let rows = scan_all(&table, &txn, &[0]);
    assert_eq!(rows.len(), 2);

    // Nobody else does.
    let other = manager.begin();
    assert!(scan_all(&table, &other, &[0]).is_empty());
    manager.rollback(txn);
}

#[test]
fn test_rolled_back_append_is_invisible() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut txn = manager.begin();
    table
        .append(&mut txn, &two_int_chunk(&[(1, 1), (2, 2), (3, 3)]))
        .unwrap();
    manager.rollback(txn);

    // Row-id space is not reclaimed, but no future snapshot sees the rows.
    assert_eq!(table.cardinality(), 3);
    let reader = manager.begin();
    assert!(scan_all(&table, &reader, &[0]).is_empty());
}

#[test]
fn test_rolled_back_update_restores_base_data() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(1, 10)])).unwrap();
    manager.commit(seed);

    let mut txn = manager.begin();
    table.update(&mut txn, &[0], &[1], &int_chunk([99])).unwrap();
    manager.rollback(txn);

    let reader = manager.begin();
    let rows = scan_all(&table, &reader, &[0, 1]);
    assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(10)]]);

    // The slot is writable again after the rollback unlinked the head.
    let mut retry = manager.begin();
    table.update(&mut retry, &[0], &[1], &int_chunk([11])).unwrap();
    manager.commit(retry);
    let reader = manager.begin();
    let rows = scan_all(&table, &reader, &[0, 1]);
    assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(11)]]);
}

#[test]
fn test_rolled_back_delete_revives_row() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(1, 10), (2, 20)])).unwrap();
    manager.commit(seed);

    let mut txn = manager.begin();
    table.delete(&mut txn, &[0]).unwrap();
    // The deleter no longer sees the row...
    assert_eq!(scan_all(&table, &txn, &[0]).len(), 1);
    manager.rollback(txn);

    // ...but after rollback everyone does again.
    let reader = manager.begin();
    assert_eq!(scan_all(&table, &reader, &[0]).len(), 2);
}

#[test]
fn test_uncommitted_update_invisible_to_others() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(1, 10)])).unwrap();
    manager.commit(seed);

    let mut writer = manager.begin();
    table.update(&mut writer, &[0], &[1], &int_chunk([99])).unwrap();

    // Writer reads its own write; a concurrent reader reads the pre-image
    // reconstructed from the version chain.
    assert_eq!(
        scan_all(&table, &writer, &[1]),
        vec![vec![Value::Integer(99)]]
    );
    let reader = manager.begin();
    assert_eq!(
        scan_all(&table, &reader, &[1]),
        vec![vec![Value::Integer(10)]]
    );

    manager.commit(writer);
    let reader = manager.begin();
    assert_eq!(
        scan_all(&table, &reader, &[1]),
        vec![vec![Value::Integer(99)]]
    );
}

// ----------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------

#[test]
fn test_statistics_track_appends_and_updates() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    let mut txn = manager.begin();
    table.append(&mut txn, &two_int_chunk(&[(4, 40), (9, 90)])).unwrap();
    manager.commit(txn);

    let stats = table.statistics(0);
    assert_eq!(stats.min, Some(Value::Integer(4)));
    assert_eq!(stats.max, Some(Value::Integer(9)));
    assert!(!stats.has_null);

    let mut txn = manager.begin();
    table.update(&mut txn, &[0], &[0], &int_chunk([100])).unwrap();
    manager.commit(txn);

    // Bounds only widen.
    let stats = table.statistics(0);
    assert_eq!(stats.min, Some(Value::Integer(4)));
    assert_eq!(stats.max, Some(Value::Integer(100)));
}

// ----------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------

#[test]
fn test_concurrent_appends_stay_dense() {
    let table = Arc::new(two_int_table());
    let manager = Arc::new(TransactionManager::new());

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let table = Arc::clone(&table);
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                for batch in 0..10 {
                    let base = (t * 1000 + batch * 10) as i32;
                    let rows: Vec<(i32, i32)> = (0..10).map(|i| (base + i, t as i32)).collect();
                    let mut txn = manager.begin();
                    table.append(&mut txn, &two_int_chunk(&rows)).unwrap();
                    manager.commit(txn);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(table.cardinality(), 400);
    let reader = manager.begin();
    assert_eq!(scan_all(&table, &reader, &[0]).len(), 400);
}

#[test]
fn test_concurrent_update_single_winner() {
    let table = Arc::new(two_int_table());
    let manager = Arc::new(TransactionManager::new());

    let mut seed = manager.begin();
    table.append(&mut seed, &two_int_chunk(&[(1, 0)])).unwrap();
    manager.commit(seed);

    let winners: Vec<_> = (0..4)
        .map(|t| {
            let table = Arc::clone(&table);
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let mut txn = manager.begin();
                match table.update(&mut txn, &[0], &[1], &int_chunk([t + 1])) {
                    Ok(()) => {
                        manager.commit(txn);
                        true
                    }
                    Err(DbError::TransactionConflict(_)) => {
                        manager.rollback(txn);
                        false
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            })
        })
        .collect();
    let won: Vec<bool> = winners.into_iter().map(|t| t.join().unwrap()).collect();

    // At least one writer commits; concurrent ones conflict.
    assert!(won.iter().any(|&w| w));
    let reader = manager.begin();
    let rows = scan_all(&table, &reader, &[1]);
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0][0], Value::Integer(0));
}

// ----------------------------------------------------------------------
// Row ids and fetch ordering
// ----------------------------------------------------------------------

#[test]
fn test_row_ids_are_dense_across_batches() {
    let table = two_int_table();
    let manager = TransactionManager::new();

    for batch in 0..3 {
        let mut txn = manager.begin();
        let rows: Vec<(i32, i32)> = (0..5).map(|i| (batch * 5 + i, 0)).collect();
        table.append(&mut txn, &two_int_chunk(&rows)).unwrap();
        manager.commit(txn);
        assert_eq!(table.cardinality(), ((batch + 1) * 5) as u64);
    }

    let reader = manager.begin();
    let fetched = table
        .fetch(&reader, &[0], &[14, 0, 7])
        .unwrap();
    // Sorted by row id, so values come back in id order.
    assert_eq!(fetched.len(), 3);
    assert_eq!(fetched.value(0, 0), &Value::Integer(0));
    assert_eq!(fetched.value(0, 1), &Value::Integer(7));
    assert_eq!(fetched.value(0, 2), &Value::Integer(14));
}

#[test]
fn test_fetch_out_of_range_is_internal_error() {
    let table = two_int_table();
    let manager = TransactionManager::new();
    let reader = manager.begin();
    let err = table.fetch(&reader, &[0], &[42 as RowId]).unwrap_err();
    assert!(matches!(err, DbError::Internal(_)));
}
