//! Snapshot-capable table over the versioned ordered map.
//!
//! Every cursor is stamped on its own snapshot, so scans are stable against
//! concurrent mutation of the table. An *update* of a row in this table is
//! modeled as remove-then-insert of a copied row: the old row's version
//! interval closes, the copy opens a new one, and historical snapshots keep
//! seeing the old payload. The transaction commit paths rely on this.
//!
//! `snapshot()` produces a [`TableSnapshot`] sharing the map's group. It is a
//! separate type without the `Table` trait: there is no way to write through
//! it, which is the point.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::row::RowHandle;
use crate::schema::Schema;
use crate::table::{Order, ResultSet, Table, TableKind};
use crate::types::{MultiKey, TableId};
use crate::vmap::{MapSnapshot, SnapshotRange, VersionedMap};

pub struct SnapshotTable {
    id: TableId,
    name: String,
    schema: Arc<Schema>,
    map: Mutex<VersionedMap<MultiKey, RowHandle>>,
}

fn into_result_set(range: SnapshotRange<MultiKey, RowHandle>, order: Order) -> ResultSet {
    let range = match order {
        Order::Desc => range.descending(),
        Order::Asc | Order::Any => range,
    };
    ResultSet::new(Box::new(range.map(|(_, row)| row)))
}

impl SnapshotTable {
    pub fn new(id: TableId, name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            map: Mutex::new(VersionedMap::new()),
        }
    }

    /// Cheap read-only copy sharing the underlying snapshot group.
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            id: self.id,
            name: self.name.clone(),
            schema: Arc::clone(&self.schema),
            snap: self.map.lock().snapshot(),
        }
    }

    /// Physical entry count, including removed intervals awaiting GC.
    pub fn storage_len(&self) -> usize {
        self.map.lock().storage_len()
    }
}

impl Table for SnapshotTable {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TableKind {
        TableKind::Snapshot
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn insert(&self, row: RowHandle) {
        assert!(
            row.schema().as_ref() == self.schema.as_ref(),
            "row schema does not match table '{}'",
            self.name
        );
        row.bind(self.id);
        let key = row.key();
        self.map.lock().insert(key, row);
    }

    fn remove(&self, row: &RowHandle) {
        self.map.lock().erase(&row.key());
        row.unbind();
    }

    fn query(&self, key: &MultiKey) -> ResultSet {
        into_result_set(self.map.lock().query(key), Order::Any)
    }

    fn query_lt(&self, key: &MultiKey, order: Order) -> ResultSet {
        into_result_set(self.map.lock().query_lt(key), order)
    }

    fn query_gt(&self, key: &MultiKey, order: Order) -> ResultSet {
        into_result_set(self.map.lock().query_gt(key), order)
    }

    fn query_in(&self, lo: &MultiKey, hi: &MultiKey, order: Order) -> ResultSet {
        if lo >= hi {
            return ResultSet::empty();
        }
        into_result_set(self.map.lock().query_in(lo, hi), order)
    }

    fn all(&self, order: Order) -> ResultSet {
        into_result_set(self.map.lock().all(), order)
    }

    fn as_snapshot(&self) -> Option<&SnapshotTable> {
        Some(self)
    }
}

/// Read-only view of a snapshot table, frozen at snapshot time.
pub struct TableSnapshot {
    id: TableId,
    name: String,
    schema: Arc<Schema>,
    snap: MapSnapshot<MultiKey, RowHandle>,
}

impl TableSnapshot {
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn query(&self, key: &MultiKey) -> ResultSet {
        into_result_set(self.snap.query(key), Order::Any)
    }

    pub fn query_lt(&self, key: &MultiKey, order: Order) -> ResultSet {
        into_result_set(self.snap.query_lt(key), order)
    }

    pub fn query_gt(&self, key: &MultiKey, order: Order) -> ResultSet {
        into_result_set(self.snap.query_gt(key), order)
    }

    pub fn query_in(&self, lo: &MultiKey, hi: &MultiKey, order: Order) -> ResultSet {
        if lo >= hi {
            return ResultSet::empty();
        }
        into_result_set(self.snap.query_in(lo, hi), order)
    }

    pub fn all(&self, order: Order) -> ResultSet {
        into_result_set(self.snap.all(), order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::schema::ColumnDef;
    use crate::types::{DataType, Value};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ColumnDef::new("id", DataType::Int).with_key(),
                ColumnDef::new("v", DataType::Int),
            ])
            .unwrap(),
        )
    }

    fn row(schema: &Arc<Schema>, id: i64, v: i64) -> RowHandle {
        Row::versioned(Arc::clone(schema), vec![Value::Int(id), Value::Int(v)]).unwrap()
    }

    fn ids(rs: ResultSet) -> Vec<i64> {
        rs.map(|r| match r.get(0) {
            Value::Int(i) => i,
            other => panic!("unexpected key {other:?}"),
        })
        .collect()
    }

    #[test]
    fn scans_are_stable_against_later_mutation() {
        let schema = schema();
        let tbl = SnapshotTable::new(1, "t", Arc::clone(&schema));
        tbl.insert(row(&schema, 1, 10));
        tbl.insert(row(&schema, 2, 20));
        let scan = tbl.all(Order::Asc);
        tbl.insert(row(&schema, 3, 30));
        assert_eq!(ids(scan), vec![1, 2]);
        assert_eq!(ids(tbl.all(Order::Asc)), vec![1, 2, 3]);
    }

    #[test]
    fn snapshot_view_is_frozen() {
        let schema = schema();
        let tbl = SnapshotTable::new(1, "t", Arc::clone(&schema));
        let r1 = row(&schema, 1, 10);
        tbl.insert(r1.clone());
        let view = tbl.snapshot();
        tbl.remove(&r1);
        tbl.insert(row(&schema, 2, 20));
        assert_eq!(ids(view.all(Order::Asc)), vec![1]);
        assert_eq!(ids(tbl.all(Order::Asc)), vec![2]);
    }

    #[test]
    fn update_by_replacement_preserves_history() {
        let schema = schema();
        let tbl = SnapshotTable::new(1, "t", Arc::clone(&schema));
        let old = row(&schema, 1, 10);
        tbl.insert(old.clone());
        let view = tbl.snapshot();

        let new = old.copy();
        new.update(1, Value::Int(99));
        tbl.remove(&old);
        tbl.insert(new);

        let live: Vec<_> = tbl.all(Order::Asc).collect();
        assert_eq!(live[0].get(1), Value::Int(99));
        let frozen: Vec<_> = view.all(Order::Asc).collect();
        assert_eq!(frozen[0].get(1), Value::Int(10));
    }
}
