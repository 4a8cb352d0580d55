//! Hash-backed table. Point queries and unordered scans only.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::row::RowHandle;
use crate::schema::Schema;
use crate::table::{Order, ResultSet, Table, TableKind};
use crate::types::{MultiKey, TableId};

pub struct UnsortedTable {
    id: TableId,
    name: String,
    schema: Arc<Schema>,
    rows: RwLock<HashMap<MultiKey, Vec<RowHandle>>>,
}

impl UnsortedTable {
    pub fn new(id: TableId, name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Table for UnsortedTable {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TableKind {
        TableKind::Unsorted
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
        bucket.swap_remove(pos);
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

    fn query_lt(&self, _key: &MultiKey, _order: Order) -> ResultSet {
        panic!("range query on unsorted table '{}'", self.name)
    }

    fn query_gt(&self, _key: &MultiKey, _order: Order) -> ResultSet {
        panic!("range query on unsorted table '{}'", self.name)
    }

    fn query_in(&self, _lo: &MultiKey, _hi: &MultiKey, _order: Order) -> ResultSet {
        panic!("range query on unsorted table '{}'", self.name)
    }

    fn all(&self, order: Order) -> ResultSet {
        assert!(
            matches!(order, Order::Any),
            "unsorted table '{}' cannot produce an ordered scan",
            self.name
        );
        let rows: Vec<RowHandle> = self
            .rows
            .read()
            .values()
            .flat_map(|bucket| bucket.iter().cloned())
            .collect();
        ResultSet::from_vec(rows)
    }
}
