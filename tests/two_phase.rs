//! # Two-Phase Locking Integration Tests
//!
//! Lock conflicts, staging semantics, and the snapshot-table commit path
//! under the 2PL discipline.

use std::sync::Arc;

use snapdb::{
    ColumnDef, Conflict, DataType, MultiKey, Order, Row, RowHandle, Schema, Table, TableRef, Txn, TxnMgr,
    Value,
};

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            ColumnDef::new("id", DataType::Int).with_key(),
            ColumnDef::new("name", DataType::Text),
            ColumnDef::new("balance", DataType::Int),
        ])
        .unwrap(),
    )
}

fn coarse_row(schema: &Arc<Schema>, id: i64, name: &str, balance: i64) -> RowHandle {
    Row::coarse(
        Arc::clone(schema),
        vec![Value::Int(id), Value::Text(name.into()), Value::Int(balance)],
    )
    .unwrap()
}

fn ids(rows: Vec<RowHandle>) -> Vec<i64> {
    rows.iter()
        .map(|r| match r.get(0) {
            Value::Int(i) => i,
            other => panic!("unexpected key {other:?}"),
        })
        .collect()
}

#[test]
fn test_write_conflict_then_retry_after_commit() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let row = coarse_row(&schema, 1, "alice", 100);
    tbl.insert(row.clone());

    let mut t1 = mgr.start_2pl(1);
    let mut t2 = mgr.start_2pl(2);

    assert!(t1.write_column(&row, 2, Value::Int(90)).is_ok());
    assert_eq!(t2.write_column(&row, 2, Value::Int(80)), Err(Conflict::Lock));
    t2.abort();

    t1.commit().unwrap();
    assert_eq!(row.get(2), Value::Int(90));

    // The lock was released at commit; a retry wins it.
    let mut t3 = mgr.start_2pl(3);
    assert!(t3.write_column(&row, 2, Value::Int(80)).is_ok());
    t3.commit().unwrap();
    assert_eq!(row.get(2), Value::Int(80));
}

#[test]
fn test_readers_share_a_coarse_row() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let row = coarse_row(&schema, 1, "alice", 100);
    tbl.insert(row.clone());

    let mut t1 = mgr.start_2pl(1);
    let mut t2 = mgr.start_2pl(2);
    assert_eq!(t1.read_column(&row, 2), Ok(Value::Int(100)));
    assert_eq!(t2.read_column(&row, 2), Ok(Value::Int(100)));
    // Neither reader can be upgraded past the other.
    assert_eq!(t1.write_column(&row, 2, Value::Int(0)), Err(Conflict::Lock));
    t1.abort();
    t2.commit().unwrap();
}

#[test]
fn test_read_sees_own_staged_write() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let row = coarse_row(&schema, 1, "alice", 100);
    tbl.insert(row.clone());

    let mut t = mgr.start_2pl(1);
    t.write_column(&row, 2, Value::Int(55)).unwrap();
    assert_eq!(t.read_column(&row, 2), Ok(Value::Int(55)));
    // Not applied until commit.
    assert_eq!(row.get(2), Value::Int(100));
    t.commit().unwrap();
    assert_eq!(row.get(2), Value::Int(55));
}

#[test]
fn test_insert_then_remove_cancels_cleanly() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl: TableRef = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let row = coarse_row(&schema, 7, "ghost", 0);

    let mut t = mgr.start_2pl(1);
    t.insert_row(&tbl, row.clone()).unwrap();
    t.write_column(&row, 2, Value::Int(1)).unwrap();
    t.remove_row(&tbl, &row).unwrap();
    t.commit().unwrap();

    assert_eq!(tbl.all(Order::Asc).count(), 0);
    assert_eq!(row.table_id(), None);
}

#[test]
fn test_staged_rows_appear_in_scans_before_commit() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl: TableRef = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    for (id, name) in [(1, "a"), (3, "c")] {
        tbl.insert(coarse_row(&schema, id, name, 0));
    }
    let committed: Vec<RowHandle> = tbl.all(Order::Asc).collect();

    let mut t = mgr.start_2pl(1);
    t.insert_row(&tbl, coarse_row(&schema, 2, "b", 0)).unwrap();
    t.remove_row(&tbl, &committed[1]).unwrap();

    assert_eq!(ids(t.all(&tbl, Order::Asc).collect()), vec![1, 2]);
    // The table itself is untouched until commit.
    assert_eq!(ids(tbl.all(Order::Asc).collect()), vec![1, 3]);

    t.commit().unwrap();
    assert_eq!(ids(tbl.all(Order::Asc).collect()), vec![1, 2]);
}

#[test]
fn test_snapshot_table_update_replaces_row() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl = mgr.create_snapshot_table("accounts", Arc::clone(&schema)).unwrap();
    let row = Row::fine(
        Arc::clone(&schema),
        vec![Value::Int(1), Value::Text("alice".into()), Value::Int(100)],
    )
    .unwrap();
    tbl.insert(row.clone());
    let before = tbl.snapshot();

    let generic: TableRef = Arc::clone(&tbl) as TableRef;
    let mut t = mgr.start_2pl(1);
    t.write_column(&row, 2, Value::Int(42)).unwrap();
    t.commit().unwrap();

    // Old row replaced by an updated copy; the old object is unbound and its
    // payload untouched.
    let live: Vec<RowHandle> = generic.all(Order::Asc).collect();
    assert_eq!(live.len(), 1);
    assert_ne!(live[0], row);
    assert_eq!(live[0].get(2), Value::Int(42));
    assert_eq!(row.get(2), Value::Int(100));
    assert_eq!(row.table_id(), None);

    // The replacement is free for the next transaction.
    let mut t2 = mgr.start_2pl(2);
    assert!(t2.write_column(&live[0], 2, Value::Int(43)).is_ok());
    t2.abort();

    // A snapshot taken before the update still reads the old payload.
    let frozen: Vec<RowHandle> = before.all(Order::Asc).collect();
    assert_eq!(frozen[0].get(2), Value::Int(100));
}

#[test]
fn test_remove_drops_locks_with_the_row() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl: TableRef = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let row = coarse_row(&schema, 1, "alice", 100);
    tbl.insert(row.clone());

    let mut t = mgr.start_2pl(1);
    t.remove_row(&tbl, &row).unwrap();
    t.commit().unwrap();
    assert_eq!(tbl.all(Order::Asc).count(), 0);
    assert_eq!(row.table_id(), None);
}

#[test]
fn test_drop_without_commit_releases_locks() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let row = coarse_row(&schema, 1, "alice", 100);
    tbl.insert(row.clone());

    {
        let mut t = mgr.start_2pl(1);
        t.write_column(&row, 2, Value::Int(0)).unwrap();
        // Dropped mid-flight.
    }
    let mut t2 = mgr.start_2pl(2);
    assert!(t2.write_column(&row, 2, Value::Int(5)).is_ok());
    t2.commit().unwrap();
    assert_eq!(row.get(2), Value::Int(5));
}

#[test]
fn test_point_query_merges_staged_duplicates() {
    let mgr = Arc::new(TxnMgr::new());
    let schema = schema();
    let tbl: TableRef = mgr.create_sorted_table("accounts", Arc::clone(&schema)).unwrap();
    let stored = coarse_row(&schema, 5, "stored", 0);
    tbl.insert(stored.clone());

    let mut t = mgr.start_2pl(1);
    let staged = coarse_row(&schema, 5, "staged", 1);
    t.insert_row(&tbl, staged.clone()).unwrap();

    let hits: Vec<RowHandle> = t.query(&tbl, &MultiKey::new(vec![Value::Int(5)])).collect();
    // Committed row first on the key tie, staged duplicate after.
    assert_eq!(hits, vec![stored, staged]);
    t.abort();
}
