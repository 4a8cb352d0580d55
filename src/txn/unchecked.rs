//! Unguarded passthrough transaction.
//!
//! Every operation goes straight to the tables: no staging, no locks, no
//! version witnesses, commit is a state change. For single-threaded setup
//! and bulk loading, where the discipline overhead buys nothing.

use std::sync::Arc;

use crate::row::RowHandle;
use crate::table::{Order, ResultSet, Table, TableRef};
use crate::types::{ColumnId, MultiKey, TxnId, Value};

use super::{Conflict, Txn, TxnMgr, TxnState};

pub struct UncheckedTxn {
    #[allow(dead_code)]
    mgr: Arc<TxnMgr>,
    id: TxnId,
    state: TxnState,
}

impl UncheckedTxn {
    pub(crate) fn new(mgr: Arc<TxnMgr>, id: TxnId) -> Self {
        Self {
            mgr,
            id,
            state: TxnState::Active,
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
}

impl Txn for UncheckedTxn {
    fn id(&self) -> TxnId {
        self.id
    }

    fn state(&self) -> TxnState {
        self.state
    }

    fn read_column(&mut self, row: &RowHandle, col: ColumnId) -> Result<Value, Conflict> {
        self.assert_active();
        Ok(row.get(col))
    }

    fn write_column(
        &mut self,
        row: &RowHandle,
        col: ColumnId,
        value: Value,
    ) -> Result<(), Conflict> {
        self.assert_active();
        row.update(col, value);
        Ok(())
    }

    fn insert_row(&mut self, tbl: &TableRef, row: RowHandle) -> Result<(), Conflict> {
        self.assert_active();
        tbl.insert(row);
        Ok(())
    }

    fn remove_row(&mut self, tbl: &TableRef, row: &RowHandle) -> Result<(), Conflict> {
        self.assert_active();
        tbl.remove(row);
        Ok(())
    }

    fn query(&mut self, tbl: &TableRef, key: &MultiKey) -> ResultSet {
        self.assert_active();
        tbl.query(key)
    }

    fn query_lt(&mut self, tbl: &TableRef, key: &MultiKey, order: Order) -> ResultSet {
        self.assert_active();
        tbl.query_lt(key, order)
    }

    fn query_gt(&mut self, tbl: &TableRef, key: &MultiKey, order: Order) -> ResultSet {
        self.assert_active();
        tbl.query_gt(key, order)
    }

    fn query_in(
        &mut self,
        tbl: &TableRef,
        lo: &MultiKey,
        hi: &MultiKey,
        order: Order,
    ) -> ResultSet {
        self.assert_active();
        tbl.query_in(lo, hi, order)
    }

    fn all(&mut self, tbl: &TableRef, order: Order) -> ResultSet {
        self.assert_active();
        tbl.all(order)
    }

    fn commit(&mut self) -> Result<(), Conflict> {
        self.assert_active();
        self.state = TxnState::Committed;
        Ok(())
    }

    fn abort(&mut self) {
        self.assert_active();
        self.state = TxnState::Aborted;
    }
}
