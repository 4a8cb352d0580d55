//! Per-transaction staging buffers.
//!
//! Three containers hold a transaction's uncommitted effects:
//!
//! - `inserts` — rows destined for a table, indexed by
//!   `(table, key-tag)` so scans can slice them by key range. The tag wraps
//!   the row key between `Min` and `Max` markers, giving total, sentinel-safe
//!   bounds for "everything in this table".
//! - `updates` — pending column writes grouped by row, replayed a whole row
//!   at a time at commit.
//! - `removes` — rows to delete, keyed by object identity.
//!
//! Invariant: `inserts` and `removes` are disjoint. Removing a staged insert
//! cancels it instead of populating `removes`; inserting a row that is bound
//! to a table (the only way it could be staged for removal) is rejected
//! upstream as misuse.

use std::collections::BTreeMap;
use std::ops::Bound;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::config::UPDATE_BATCH_INLINE;
use crate::row::RowHandle;
use crate::table::{Table, TableRef};
use crate::types::{ColumnId, MultiKey, TableId, Value};

/// Row-key tag ordering `Min < Key(_) < Max`, used only for range bounds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum KeyTag {
    Min,
    Key(MultiKey),
    Max,
}

type StageKey = (TableId, KeyTag);

pub(crate) type UpdateBatch = SmallVec<[(ColumnId, Value); UPDATE_BATCH_INLINE]>;

#[derive(Default)]
pub(crate) struct Staging {
    inserts: BTreeMap<StageKey, Vec<RowHandle>>,
    updates: HashMap<RowHandle, UpdateBatch>,
    removes: HashSet<(TableId, RowHandle)>,
    /// Tables touched by staged inserts/removes, for replay resolution.
    tables: HashMap<TableId, TableRef>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.removes.is_empty()
    }

    // -- inserts ------------------------------------------------------------

    pub fn stage_insert(&mut self, tbl: &TableRef, row: RowHandle) {
        debug_assert!(
            !self.removes.contains(&(tbl.id(), row.clone())),
            "staged inserts and removes must stay disjoint"
        );
        self.tables.entry(tbl.id()).or_insert_with(|| tbl.clone());
        self.inserts
            .entry((tbl.id(), KeyTag::Key(row.key())))
            .or_default()
            .push(row);
    }

    /// Drops a staged insert of exactly `row`, if present.
    pub fn cancel_insert(&mut self, tbl_id: TableId, row: &RowHandle) -> bool {
        let stage_key = (tbl_id, KeyTag::Key(row.key()));
        let Some(bucket) = self.inserts.get_mut(&stage_key) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|r| r == row) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            self.inserts.remove(&stage_key);
        }
        true
    }

    /// Staged inserts for `tbl_id` whose keys fall in `[lo, hi]` bounds, in
    /// key order (reversed when `descending`).
    pub fn staged_range(
        &self,
        tbl_id: TableId,
        lo: Bound<&MultiKey>,
        hi: Bound<&MultiKey>,
        descending: bool,
    ) -> Vec<RowHandle> {
        let lo: Bound<StageKey> = match lo {
            Bound::Included(k) => Bound::Included((tbl_id, KeyTag::Key(k.clone()))),
            Bound::Excluded(k) => Bound::Excluded((tbl_id, KeyTag::Key(k.clone()))),
            Bound::Unbounded => Bound::Excluded((tbl_id, KeyTag::Min)),
        };
        let hi: Bound<StageKey> = match hi {
            Bound::Included(k) => Bound::Included((tbl_id, KeyTag::Key(k.clone()))),
            Bound::Excluded(k) => Bound::Excluded((tbl_id, KeyTag::Key(k.clone()))),
            Bound::Unbounded => Bound::Excluded((tbl_id, KeyTag::Max)),
        };
        let range = self.inserts.range((lo, hi));
        if descending {
            range
                .rev()
                .flat_map(|(_, bucket)| bucket.iter().cloned())
                .collect()
        } else {
            range
                .flat_map(|(_, bucket)| bucket.iter().cloned())
                .collect()
        }
    }

    // -- updates ------------------------------------------------------------

    pub fn pending_update(&self, row: &RowHandle, col: ColumnId) -> Option<Value> {
        self.updates.get(row).and_then(|batch| {
            batch
                .iter()
                .find(|(c, _)| *c == col)
                .map(|(_, v)| v.clone())
        })
    }

    /// Overwrites an already-staged write of `(row, col)`. Returns false if
    /// no write for that cell is pending.
    pub fn overwrite_pending(&mut self, row: &RowHandle, col: ColumnId, value: &Value) -> bool {
        if let Some(batch) = self.updates.get_mut(row) {
            if let Some(slot) = batch.iter_mut().find(|(c, _)| *c == col) {
                slot.1 = value.clone();
                return true;
            }
        }
        false
    }

    pub fn stage_update(&mut self, row: RowHandle, col: ColumnId, value: Value) {
        self.updates.entry(row).or_default().push((col, value));
    }

    pub fn clear_updates(&mut self, row: &RowHandle) {
        self.updates.remove(row);
    }

    // -- removes ------------------------------------------------------------

    pub fn stage_remove(&mut self, tbl: &TableRef, row: RowHandle) {
        self.tables.entry(tbl.id()).or_insert_with(|| tbl.clone());
        self.removes.insert((tbl.id(), row));
    }

    pub fn removes_for(&self, tbl_id: TableId) -> HashSet<RowHandle> {
        self.removes
            .iter()
            .filter(|(t, _)| *t == tbl_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    // -- replay -------------------------------------------------------------

    /// Staged inserts in `(table, key)` order, resolved to their tables.
    pub fn inserts_for_replay(&self) -> Vec<(TableRef, RowHandle)> {
        self.inserts
            .iter()
            .flat_map(|((tbl_id, _), bucket)| {
                let tbl = self
                    .tables
                    .get(tbl_id)
                    .expect("staged insert targets an unregistered table");
                bucket.iter().map(move |row| (tbl.clone(), row.clone()))
            })
            .collect()
    }

    /// Pending updates grouped by row; group order is unspecified.
    pub fn updates_for_replay(&self) -> Vec<(RowHandle, UpdateBatch)> {
        self.updates
            .iter()
            .map(|(row, batch)| (row.clone(), batch.clone()))
            .collect()
    }

    pub fn removes_for_replay(&self) -> Vec<(TableRef, RowHandle)> {
        self.removes
            .iter()
            .map(|(tbl_id, row)| {
                let tbl = self
                    .tables
                    .get(tbl_id)
                    .expect("staged remove targets an unregistered table");
                (tbl.clone(), row.clone())
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
        self.removes.clear();
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::schema::{ColumnDef, Schema};
    use crate::table::{SortedTable, Table};
    use crate::types::{DataType, Value};
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ColumnDef::new("id", DataType::Int).with_key(),
                ColumnDef::new("v", DataType::Int),
            ])
            .unwrap(),
        )
    }

    fn table(id: TableId) -> TableRef {
        Arc::new(SortedTable::new(id, format!("t{id}"), schema()))
    }

    fn row(id: i64) -> RowHandle {
        Row::coarse(schema(), vec![Value::Int(id), Value::Int(0)]).unwrap()
    }

    #[test]
    fn key_tags_bound_the_table_slice() {
        assert!(KeyTag::Min < KeyTag::Key(MultiKey::new(vec![Value::Null])));
        assert!(KeyTag::Key(MultiKey::new(vec![Value::Blob(vec![0xff])])) < KeyTag::Max);
    }

    #[test]
    fn staged_range_respects_table_and_bounds() {
        let mut staging = Staging::new();
        let t1 = table(1);
        let t2 = table(2);
        for i in [1i64, 3, 5] {
            staging.stage_insert(&t1, row(i));
        }
        staging.stage_insert(&t2, row(2));

        let all = staging.staged_range(1, Bound::Unbounded, Bound::Unbounded, false);
        assert_eq!(all.len(), 3);
        let keys: Vec<MultiKey> = all.iter().map(|r| r.key()).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let k3 = MultiKey::new(vec![Value::Int(3)]);
        let lt = staging.staged_range(1, Bound::Unbounded, Bound::Excluded(&k3), false);
        assert_eq!(lt.len(), 1);
        let ge = staging.staged_range(1, Bound::Included(&k3), Bound::Unbounded, true);
        assert_eq!(ge.len(), 2);
        assert_eq!(ge[0].key(), MultiKey::new(vec![Value::Int(5)]));
    }

    #[test]
    fn insert_then_cancel_leaves_empty_staging() {
        let mut staging = Staging::new();
        let t = table(1);
        let r = row(1);
        staging.stage_insert(&t, r.clone());
        assert!(staging.cancel_insert(1, &r));
        assert!(staging.is_empty());
        assert!(!staging.cancel_insert(1, &r));
    }

    #[test]
    fn cancel_matches_identity_not_key() {
        let mut staging = Staging::new();
        let t = table(1);
        let a = row(1);
        let b = row(1);
        staging.stage_insert(&t, a.clone());
        assert!(!staging.cancel_insert(1, &b));
        assert!(staging.cancel_insert(1, &a));
    }

    #[test]
    fn update_overlay_reads_latest_staged_write() {
        let mut staging = Staging::new();
        let r = row(1);
        assert!(!staging.overwrite_pending(&r, 1, &Value::Int(5)));
        staging.stage_update(r.clone(), 1, Value::Int(5));
        assert!(staging.overwrite_pending(&r, 1, &Value::Int(6)));
        assert_eq!(staging.pending_update(&r, 1), Some(Value::Int(6)));
        assert_eq!(staging.pending_update(&r, 0), None);
    }
}
