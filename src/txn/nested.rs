//! # Nested Sub-Transactions
//!
//! A nested transaction stages privately on top of a base transaction and
//! replays through it on commit, so the base's discipline — whatever it is —
//! arbitrates conflicts. Until then the base never sees the nested effects,
//! and a nested abort leaves the base untouched.
//!
//! The base is held by exclusive borrow for the nested transaction's
//! lifetime: one thread, one active frame, statically. Bases compose — a
//! nested transaction can itself be the base of another.
//!
//! A top-level transaction can treat "row is unbound" as "row is mine in
//! staging", but a nested one cannot: a row it inserted is still unbound
//! *and* must not leak reads to the base. The `row_inserts` set answers
//! "is this row locally inserted" in O(1).

use hashbrown::HashSet;
use tracing::debug;

use crate::row::RowHandle;
use crate::table::{Order, ResultSet, Table, TableRef};
use crate::types::{ColumnId, MultiKey, TxnId, Value};

use super::staging::Staging;
use super::{overlay_scan, Conflict, ScanKind, Txn, TxnState};

pub struct NestedTxn<'a> {
    base: &'a mut dyn Txn,
    state: TxnState,
    staging: Staging,
    row_inserts: HashSet<RowHandle>,
}

impl<'a> NestedTxn<'a> {
    pub(crate) fn new(base: &'a mut dyn Txn) -> Self {
        assert_eq!(
            base.state(),
            TxnState::Active,
            "nested transaction over a finished base"
        );
        Self {
            base,
            state: TxnState::Active,
            staging: Staging::new(),
            row_inserts: HashSet::new(),
        }
    }

    fn assert_active(&self) {
        assert_eq!(
            self.state,
            TxnState::Active,
            "operation on a finished transaction {}",
            self.id()
        );
    }

    fn scan(&mut self, tbl: &TableRef, kind: ScanKind<'_>, order: Order) -> ResultSet {
        self.assert_active();
        let committed = match &kind {
            ScanKind::Point(k) => self.base.query(tbl, k),
            ScanKind::Lt(k) => self.base.query_lt(tbl, k, order),
            ScanKind::Gt(k) => self.base.query_gt(tbl, k, order),
            ScanKind::In(lo, hi) => self.base.query_in(tbl, lo, hi, order),
            ScanKind::All => self.base.all(tbl, order),
        };
        overlay_scan(committed, tbl.id(), &self.staging, &kind, order)
    }
}

impl Txn for NestedTxn<'_> {
    fn id(&self) -> TxnId {
        self.base.id()
    }

    fn state(&self) -> TxnState {
        self.state
    }

    fn read_column(&mut self, row: &RowHandle, col: ColumnId) -> Result<Value, Conflict> {
        self.assert_active();
        if self.row_inserts.contains(row) {
            return Ok(row.get(col));
        }
        if let Some(value) = self.staging.pending_update(row, col) {
            return Ok(value);
        }
        self.base.read_column(row, col)
    }

    fn write_column(
        &mut self,
        row: &RowHandle,
        col: ColumnId,
        value: Value,
    ) -> Result<(), Conflict> {
        self.assert_active();
        if self.row_inserts.contains(row) {
            row.update(col, value);
            return Ok(());
        }
        if self.staging.overwrite_pending(row, col, &value) {
            return Ok(());
        }
        // Staged locally; the base sees nothing until commit.
        self.staging.stage_update(row.clone(), col, value);
        Ok(())
    }

    fn insert_row(&mut self, tbl: &TableRef, row: RowHandle) -> Result<(), Conflict> {
        self.assert_active();
        assert!(
            row.table_id().is_none(),
            "cannot insert a row already owned by a table"
        );
        self.row_inserts.insert(row.clone());
        self.staging.stage_insert(tbl, row);
        Ok(())
    }

    fn remove_row(&mut self, tbl: &TableRef, row: &RowHandle) -> Result<(), Conflict> {
        self.assert_active();
        if self.staging.cancel_insert(tbl.id(), row) {
            self.row_inserts.remove(row);
            self.staging.clear_updates(row);
            return Ok(());
        }
        self.staging.stage_remove(tbl, row.clone());
        self.staging.clear_updates(row);
        Ok(())
    }

    fn query(&mut self, tbl: &TableRef, key: &MultiKey) -> ResultSet {
        self.scan(tbl, ScanKind::Point(key), Order::Any)
    }

    fn query_lt(&mut self, tbl: &TableRef, key: &MultiKey, order: Order) -> ResultSet {
        self.scan(tbl, ScanKind::Lt(key), order)
    }

    fn query_gt(&mut self, tbl: &TableRef, key: &MultiKey, order: Order) -> ResultSet {
        self.scan(tbl, ScanKind::Gt(key), order)
    }

    fn query_in(
        &mut self,
        tbl: &TableRef,
        lo: &MultiKey,
        hi: &MultiKey,
        order: Order,
    ) -> ResultSet {
        self.scan(tbl, ScanKind::In(lo, hi), order)
    }

    fn all(&mut self, tbl: &TableRef, order: Order) -> ResultSet {
        self.scan(tbl, ScanKind::All, order)
    }

    /// Replays inserts, then updates, then removes through the base. A
    /// conflict reported by the base's discipline surfaces here with the
    /// nested transaction left active, so the caller can abort it (the base
    /// may hold partially replayed staging and is expected to abort too).
    fn commit(&mut self) -> Result<(), Conflict> {
        self.assert_active();
        for (tbl, row) in self.staging.inserts_for_replay() {
            self.base.insert_row(&tbl, row)?;
        }
        for (row, batch) in self.staging.updates_for_replay() {
            for (col, value) in batch {
                self.base.write_column(&row, col, value)?;
            }
        }
        for (tbl, row) in self.staging.removes_for_replay() {
            self.base.remove_row(&tbl, &row)?;
        }
        self.state = TxnState::Committed;
        debug!(txn = self.id(), "nested commit replayed into base");
        self.staging.clear();
        self.row_inserts.clear();
        Ok(())
    }

    fn abort(&mut self) {
        self.assert_active();
        self.state = TxnState::Aborted;
        debug!(txn = self.id(), "nested abort");
        self.staging.clear();
        self.row_inserts.clear();
    }
}
