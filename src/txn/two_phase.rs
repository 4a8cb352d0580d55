//! # Two-Phase Locking
//!
//! Strict 2PL: every access acquires a non-blocking row or column lock,
//! every lock is held until commit or abort. A failed acquisition reports
//! [`Conflict::Lock`] and the caller is expected to abort and retry.
//!
//! Granularity follows the row kind: `Coarse` rows lock whole-row, `Fine`
//! rows lock per column (a remove must win every column). `Versioned` rows
//! belong to the OCC discipline and are misuse here.
//!
//! ## Commit replay
//!
//! ```text
//! inserts ──► table.insert
//! updates ──► grouped by row:
//!               snapshot table: copy row, apply batch,
//!                               remove(old) + insert(copy),
//!                               redirect lock records old ─► copy
//!               other tables:   update in place
//! removes ──► drop lock records, table.remove
//! ```
//!
//! The snapshot-table path replaces the row object so existing table
//! snapshots keep the old payload; lock records are redirected so release
//! unwinds against the surviving object.

use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::config::LOCK_SPANS_INLINE;
use crate::row::{RowHandle, RowKind};
use crate::table::{Order, ResultSet, Table, TableKind, TableRef};
use crate::types::{ColumnId, MultiKey, TxnId, Value};

use super::staging::Staging;
use super::{overlay_scan, table_scan, Conflict, ScanKind, Txn, TxnMgr, TxnState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockSpan {
    WholeRow,
    Column(ColumnId),
}

pub(crate) type LockTable = HashMap<RowHandle, SmallVec<[LockSpan; LOCK_SPANS_INLINE]>>;

pub(crate) fn redirect_locks(locks: &mut LockTable, old_row: &RowHandle, new_row: &RowHandle) {
    if let Some(spans) = locks.remove(old_row) {
        locks.entry(new_row.clone()).or_default().extend(spans);
    }
}

pub(crate) fn release_locks(locks: &mut LockTable, owner: TxnId) {
    for (row, spans) in locks.drain() {
        for span in spans {
            match span {
                LockSpan::WholeRow => row.unlock_row(owner),
                LockSpan::Column(col) => row.unlock_column(col, owner),
            }
        }
    }
}

pub struct Txn2Pl {
    mgr: Arc<TxnMgr>,
    id: TxnId,
    state: TxnState,
    staging: Staging,
    locks: LockTable,
}

impl Txn2Pl {
    pub(crate) fn new(mgr: Arc<TxnMgr>, id: TxnId) -> Self {
        Self {
            mgr,
            id,
            state: TxnState::Active,
            staging: Staging::new(),
            locks: HashMap::new(),
        }
    }

    fn assert_active(&self) {
        assert_eq!(
            self.state,
            TxnState::Active,
            "operation on a finished transaction {}",
            self.id
        );
    }

    fn record(&mut self, row: &RowHandle, span: LockSpan) {
        self.locks.entry(row.clone()).or_default().push(span);
    }

    fn lock_for_read(&mut self, row: &RowHandle, col: ColumnId) -> Result<(), Conflict> {
        match row.kind() {
            RowKind::Coarse => {
                if !row.try_rlock_row(self.id) {
                    return Err(Conflict::Lock);
                }
                self.record(row, LockSpan::WholeRow);
            }
            RowKind::Fine => {
                if !row.try_rlock_column(col, self.id) {
                    return Err(Conflict::Lock);
                }
                self.record(row, LockSpan::Column(col));
            }
            RowKind::Versioned => panic!("versioned row under a locking transaction"),
        }
        Ok(())
    }

    fn lock_for_write(&mut self, row: &RowHandle, col: ColumnId) -> Result<(), Conflict> {
        match row.kind() {
            RowKind::Coarse => {
                if !row.try_wlock_row(self.id) {
                    return Err(Conflict::Lock);
                }
                self.record(row, LockSpan::WholeRow);
            }
            RowKind::Fine => {
                if !row.try_wlock_column(col, self.id) {
                    return Err(Conflict::Lock);
                }
                self.record(row, LockSpan::Column(col));
            }
            RowKind::Versioned => panic!("versioned row under a locking transaction"),
        }
        Ok(())
    }

    fn scan(&mut self, tbl: &TableRef, kind: ScanKind<'_>, order: Order) -> ResultSet {
        self.assert_active();
        let committed = table_scan(tbl, &kind, order);
        overlay_scan(committed, tbl.id(), &self.staging, &kind, order)
    }

    fn release(&mut self) {
        release_locks(&mut self.locks, self.id);
        self.staging.clear();
    }
}

impl Txn for Txn2Pl {
    fn id(&self) -> TxnId {
        self.id
    }

    fn state(&self) -> TxnState {
        self.state
    }

    fn read_column(&mut self, row: &RowHandle, col: ColumnId) -> Result<Value, Conflict> {
        self.assert_active();
        if row.table_id().is_none() {
            // Staged row: no concurrency control needed.
            return Ok(row.get(col));
        }
        if let Some(value) = self.staging.pending_update(row, col) {
            return Ok(value);
        }
        self.lock_for_read(row, col)?;
        Ok(row.get(col))
    }

    fn write_column(
        &mut self,
        row: &RowHandle,
        col: ColumnId,
        value: Value,
    ) -> Result<(), Conflict> {
        self.assert_active();
        if row.table_id().is_none() {
            row.update(col, value);
            return Ok(());
        }
        if self.staging.overwrite_pending(row, col, &value) {
            return Ok(());
        }
        self.lock_for_write(row, col)?;
        self.staging.stage_update(row.clone(), col, value);
        Ok(())
    }

    fn insert_row(&mut self, tbl: &TableRef, row: RowHandle) -> Result<(), Conflict> {
        self.assert_active();
        assert!(
            row.table_id().is_none(),
            "cannot insert a row already owned by a table"
        );
        self.staging.stage_insert(tbl, row);
        Ok(())
    }

    fn remove_row(&mut self, tbl: &TableRef, row: &RowHandle) -> Result<(), Conflict> {
        self.assert_active();
        if self.staging.cancel_insert(tbl.id(), row) {
            self.staging.clear_updates(row);
            return Ok(());
        }
        assert_eq!(
            row.table_id(),
            Some(tbl.id()),
            "remove of a row that is neither staged nor stored"
        );
        match row.kind() {
            RowKind::Coarse => {
                if !row.try_wlock_row(self.id) {
                    return Err(Conflict::Lock);
                }
                self.record(row, LockSpan::WholeRow);
            }
            RowKind::Fine => {
                // All columns must be won; locks acquired before a failure
                // stay recorded and unwind at abort.
                for col in 0..row.schema().columns_count() {
                    if !row.try_wlock_column(col, self.id) {
                        return Err(Conflict::Lock);
                    }
                    self.record(row, LockSpan::Column(col));
                }
            }
            RowKind::Versioned => panic!("versioned row under a locking transaction"),
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

    fn commit(&mut self) -> Result<(), Conflict> {
        self.assert_active();
        for (tbl, row) in self.staging.inserts_for_replay() {
            tbl.insert(row);
        }
        for (row, batch) in self.staging.updates_for_replay() {
            let tbl_id = row.table_id().expect("updated row lost its table");
            let tbl = self
                .mgr
                .table_by_id(tbl_id)
                .expect("updated row's table is not registered");
            if tbl.kind() == TableKind::Snapshot {
                let new_row = row.copy();
                for (col, value) in &batch {
                    new_row.update(*col, value.clone());
                }
                tbl.remove(&row);
                tbl.insert(new_row.clone());
                redirect_locks(&mut self.locks, &row, &new_row);
            } else {
                for (col, value) in batch {
                    row.update(col, value);
                }
            }
        }
        for (tbl, row) in self.staging.removes_for_replay() {
            // The row is gone; its lock records go with it.
            self.locks.remove(&row);
            tbl.remove(&row);
        }
        self.state = TxnState::Committed;
        debug!(txn = self.id, "2pl commit");
        self.release();
        Ok(())
    }

    fn abort(&mut self) {
        self.assert_active();
        self.state = TxnState::Aborted;
        debug!(txn = self.id, "2pl abort");
        self.release();
    }
}

impl Drop for Txn2Pl {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            debug!(txn = self.id, "2pl transaction dropped without commit");
            self.release();
        }
    }
}
