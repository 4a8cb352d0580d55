//! B-tree-backed table with full range query support.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::row::RowHandle;
use crate::schema::Schema;
use crate::table::{Order, ResultSet, Table, TableKind};
use crate::types::{MultiKey, TableId};

pub struct SortedTable {
    id: TableId,
    name: String,
    schema: Arc<Schema>,
    rows: RwLock<BTreeMap<MultiKey, Vec<RowHandle>>>,
}

impl SortedTable {
    pub fn new(id: TableId, name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect_range(
        &self,
        lo: Bound<&MultiKey>,
        hi: Bound<&MultiKey>,
        order: Order,
    ) -> ResultSet {
        let rows = self.rows.read();
        let range = rows.range((lo, hi));
        let collected: Vec<RowHandle> = match order {
            Order::Desc => range
                .rev()
                .flat_map(|(_, bucket)| bucket.iter().cloned())
                .collect(),
            Order::Asc | Order::Any => range
                .flat_map(|(_, bucket)| bucket.iter().cloned())
                .collect(),
        };
        ResultSet::from_vec(collected)
    }
}

impl Table for SortedTable {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TableKind {
        TableKind::Sorted
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
        self.rows.write().entry(row.key()).or_default().push(row);
    }

    fn remove(&self, row: &RowHandle) {
        let key = row.key();
        let mut rows = self.rows.write();
        let bucket = rows
            .get_mut(&key)
            .unwrap_or_else(|| panic!("row not present in table '{}'", self.name));
        let pos = bucket
            .iter()
            .position(|r| r == row)
            .unwrap_or_else(|| panic!("row not present in table '{}'", self.name));
        bucket.remove(pos);
        if bucket.is_empty() {
            rows.remove(&key);
        }
        row.unbind();
    }

    fn query(&self, key: &MultiKey) -> ResultSet {
        match self.rows.read().get(key) {
            Some(bucket) => ResultSet::from_vec(bucket.clone()),
            None => ResultSet::empty(),
        }
    }

    fn query_lt(&self, key: &MultiKey, order: Order) -> ResultSet {
        self.collect_range(Bound::Unbounded, Bound::Excluded(key), order)
    }

    fn query_gt(&self, key: &MultiKey, order: Order) -> ResultSet {
        self.collect_range(Bound::Excluded(key), Bound::Unbounded, order)
    }

    fn query_in(&self, lo: &MultiKey, hi: &MultiKey, order: Order) -> ResultSet {
        if lo >= hi {
            return ResultSet::empty();
        }
        self.collect_range(Bound::Included(lo), Bound::Excluded(hi), order)
    }

    fn all(&self, order: Order) -> ResultSet {
        self.collect_range(Bound::Unbounded, Bound::Unbounded, order)
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

    fn key(id: i64) -> MultiKey {
        MultiKey::new(vec![Value::Int(id)])
    }

    fn ids(rs: ResultSet) -> Vec<i64> {
        rs.map(|r| match r.get(0) {
            Value::Int(i) => i,
            other => panic!("unexpected key {other:?}"),
        })
        .collect()
    }

    fn populate(tbl: &SortedTable, schema: &Arc<Schema>, ids: &[i64]) {
        for &i in ids {
            tbl.insert(
                Row::coarse(Arc::clone(schema), vec![Value::Int(i), Value::Int(i * 10)]).unwrap(),
            );
        }
    }

    #[test]
    fn range_bounds_are_strict_and_half_open() {
        let schema = schema();
        let tbl = SortedTable::new(1, "t", Arc::clone(&schema));
        populate(&tbl, &schema, &[1, 2, 3, 4, 5]);
        assert_eq!(ids(tbl.query_lt(&key(3), Order::Asc)), vec![1, 2]);
        assert_eq!(ids(tbl.query_gt(&key(3), Order::Asc)), vec![4, 5]);
        assert_eq!(ids(tbl.query_in(&key(2), &key(4), Order::Asc)), vec![2, 3]);
        assert_eq!(ids(tbl.query_in(&key(4), &key(2), Order::Asc)), Vec::<i64>::new());
    }

    #[test]
    fn descending_order_reverses() {
        let schema = schema();
        let tbl = SortedTable::new(1, "t", Arc::clone(&schema));
        populate(&tbl, &schema, &[2, 1, 3]);
        assert_eq!(ids(tbl.all(Order::Desc)), vec![3, 2, 1]);
        assert_eq!(ids(tbl.all(Order::Asc)), vec![1, 2, 3]);
    }
}
