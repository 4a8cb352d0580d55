//! # Optimistic Concurrency Control
//!
//! Reads and writes record *version witnesses* — `(row, column, version)`
//! triples — instead of taking locks. Commit validates every witness against
//! the row's live column version and replays staged writes only if all still
//! match.
//!
//! ## Policies
//!
//! - `Eager` — a write bumps the column version at write time, so concurrent
//!   transactions touching the same cell fail validation as early as
//!   possible.
//! - `Lazy` — versions bump during `commit_confirm`; in-flight writes stay
//!   invisible until the transaction actually commits.
//!
//! ## Committing
//!
//! Two protocols with the same replay:
//!
//! - `commit()` — validate then replay in one step. Atomicity relative to
//!   other committers is the caller's concern (serialize committers
//!   externally if strict isolation is required).
//! - `commit_prepare()` / `commit_confirm()` — validation plus whole-row
//!   locks on every witnessed row, held across the boundary; replay then
//!   runs isolated from other prepared committers.
//!
//! Validation first subtracts cells under a write witness from the read set:
//! the write witness subsumes the read and, under `Eager`, already accounts
//! for this transaction's own bump.
//!
//! ## Read-only transactions
//!
//! Constructed over a set of snapshot tables; all reads and scans come from
//! the snapshots taken at start, are wait-free, and need no validation —
//! commit always succeeds.
//!
//! ## Pinning
//!
//! Every witnessed row is held in an accessed set, keeping the row object
//! alive for validation even if the table drops it meanwhile. When a commit
//! replaces a row in a snapshot table, lock records and pins are redirected
//! to the replacement.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::row::{RowHandle, RowKind};
use crate::table::{Order, ResultSet, Table, TableKind, TableRef, TableSnapshot};
use crate::types::{ColumnId, MultiKey, TxnId, Value};
use crate::vmap::Version;

use super::staging::Staging;
use super::two_phase::{redirect_locks, release_locks, LockSpan, LockTable};
use super::{overlay_scan, table_scan, Conflict, ScanKind, Txn, TxnMgr, TxnState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccPolicy {
    Eager,
    Lazy,
}

type WitnessMap = HashMap<(RowHandle, ColumnId), Version>;

pub struct TxnOcc {
    mgr: Arc<TxnMgr>,
    id: TxnId,
    state: TxnState,
    policy: OccPolicy,
    staging: Staging,
    ver_check_read: WitnessMap,
    ver_check_write: WitnessMap,
    accessed: HashSet<RowHandle>,
    locks: LockTable,
    snapshots: HashMap<String, TableSnapshot>,
    verified: bool,
}

impl TxnOcc {
    pub(crate) fn new(mgr: Arc<TxnMgr>, id: TxnId, policy: OccPolicy) -> Self {
        Self {
            mgr,
            id,
            state: TxnState::Active,
            policy,
            staging: Staging::new(),
            ver_check_read: HashMap::new(),
            ver_check_write: HashMap::new(),
            accessed: HashSet::new(),
            locks: HashMap::new(),
            snapshots: HashMap::new(),
            verified: false,
        }
    }

    pub(crate) fn new_readonly(
        mgr: Arc<TxnMgr>,
        id: TxnId,
        policy: OccPolicy,
        table_names: &[&str],
    ) -> Self {
        let mut txn = Self::new(mgr, id, policy);
        for name in table_names {
            let tbl = txn
                .mgr
                .get_snapshot_table(name)
                .unwrap_or_else(|| panic!("unknown snapshot table '{name}'"));
            let snap = tbl
                .as_snapshot()
                .expect("kind-checked table answers the snapshot capability")
                .snapshot();
            txn.snapshots.insert((*name).to_owned(), snap);
        }
        txn
    }

    pub fn policy(&self) -> OccPolicy {
        self.policy
    }

    /// True when this transaction was constructed over table snapshots; its
    /// reads need no validation.
    pub fn is_readonly(&self) -> bool {
        !self.snapshots.is_empty()
    }

    /// The snapshot taken for `table` at construction, if any.
    pub fn snapshot(&self, table: &str) -> Option<&TableSnapshot> {
        self.snapshots.get(table)
    }

    fn assert_active(&self) {
        assert_eq!(
            self.state,
            TxnState::Active,
            "operation on a finished transaction {}",
            self.id
        );
    }

    fn pin(&mut self, row: &RowHandle) {
        if !self.accessed.contains(row) {
            self.accessed.insert(row.clone());
        }
    }

    /// Validates all witnesses. A cell under both a read and a write witness
    /// is checked via the write witness alone.
    fn version_check(&mut self) -> bool {
        if self.is_readonly() {
            return true;
        }
        self.ver_check_read.retain(|cell, read_ver| {
            match self.ver_check_write.get(cell) {
                Some(write_ver) => {
                    debug_assert!(*read_ver <= *write_ver);
                    false
                }
                None => true,
            }
        });
        let matches = |map: &WitnessMap| {
            map.iter()
                .all(|((row, col), ver)| row.column_ver(*col) == *ver)
        };
        matches(&self.ver_check_read) && matches(&self.ver_check_write)
    }

    fn release(&mut self) {
        release_locks(&mut self.locks, self.id);
        self.ver_check_read.clear();
        self.ver_check_write.clear();
        self.accessed.clear();
        self.snapshots.clear();
        self.staging.clear();
    }

    fn scan(&mut self, tbl: &TableRef, kind: ScanKind<'_>, order: Order) -> ResultSet {
        self.assert_active();
        if let Some(snap) = self.snapshots.get(tbl.name()) {
            // Wait-free reads from the start-of-transaction snapshot; a
            // read-only transaction has no staging to overlay.
            return match kind {
                ScanKind::Point(k) => snap.query(k),
                ScanKind::Lt(k) => snap.query_lt(k, order),
                ScanKind::Gt(k) => snap.query_gt(k, order),
                ScanKind::In(lo, hi) => snap.query_in(lo, hi, order),
                ScanKind::All => snap.all(order),
            };
        }
        let committed = table_scan(tbl, &kind, order);
        overlay_scan(committed, tbl.id(), &self.staging, &kind, order)
    }

    /// Validates witnesses, then locks every witnessed row (read witnesses
    /// shared, write witnesses exclusive). On success the transaction is
    /// verified and must proceed to [`TxnOcc::commit_confirm`]; on failure it
    /// must abort, which releases any locks already acquired.
    pub fn commit_prepare(&mut self) -> Result<(), Conflict> {
        self.assert_active();
        assert!(!self.verified, "commit_prepare called twice");
        if !self.version_check() {
            return Err(Conflict::Version);
        }
        for (row, _) in self.ver_check_read.keys() {
            if !row.try_rlock_row(self.id) {
                return Err(Conflict::Lock);
            }
            self.locks
                .entry(row.clone())
                .or_default()
                .push(LockSpan::WholeRow);
        }
        for (row, _) in self.ver_check_write.keys() {
            if !row.try_wlock_row(self.id) {
                return Err(Conflict::Lock);
            }
            self.locks
                .entry(row.clone())
                .or_default()
                .push(LockSpan::WholeRow);
        }
        self.verified = true;
        Ok(())
    }

    /// Replays staged mutations into the tables. Requires a prior successful
    /// validation (`commit_prepare`, or `commit` which performs both steps).
    pub fn commit_confirm(&mut self) {
        self.assert_active();
        assert!(self.verified, "commit_confirm without validation");
        for (tbl, row) in self.staging.inserts_for_replay() {
            tbl.insert(row);
        }
        for (row, batch) in self.staging.updates_for_replay() {
            assert_eq!(row.kind(), RowKind::Versioned);
            let tbl_id = row.table_id().expect("updated row lost its table");
            let tbl = self
                .mgr
                .table_by_id(tbl_id)
                .expect("updated row's table is not registered");
            if tbl.kind() == TableKind::Snapshot {
                let new_row = row.copy();
                for (col, value) in &batch {
                    new_row.update(*col, value.clone());
                    if self.policy == OccPolicy::Lazy {
                        // Stale concurrent witnesses must fail on the old row;
                        // the bump also rides the version carried by the copy.
                        row.incr_column_ver(*col);
                        new_row.incr_column_ver(*col);
                    }
                }
                tbl.remove(&row);
                tbl.insert(new_row.clone());
                redirect_locks(&mut self.locks, &row, &new_row);
                if self.accessed.remove(&row) {
                    self.accessed.insert(new_row);
                }
            } else {
                for (col, value) in batch {
                    row.update(col, value.clone());
                    if self.policy == OccPolicy::Lazy {
                        row.incr_column_ver(col);
                    }
                }
            }
        }
        for (tbl, row) in self.staging.removes_for_replay() {
            if self.policy == OccPolicy::Lazy {
                for col in 0..row.schema().columns_count() {
                    row.incr_column_ver(col);
                }
            }
            self.locks.remove(&row);
            tbl.remove(&row);
        }
        self.state = TxnState::Committed;
        debug!(txn = self.id, policy = ?self.policy, "occ commit");
        self.release();
    }
}

impl Txn for TxnOcc {
    fn id(&self) -> TxnId {
        self.id
    }

    fn state(&self) -> TxnState {
        self.state
    }

    fn read_column(&mut self, row: &RowHandle, col: ColumnId) -> Result<Value, Conflict> {
        if self.is_readonly() {
            return Ok(row.get(col));
        }
        self.assert_active();
        if row.table_id().is_none() {
            return Ok(row.get(col));
        }
        if let Some(value) = self.staging.pending_update(row, col) {
            return Ok(value);
        }
        assert_eq!(
            row.kind(),
            RowKind::Versioned,
            "unversioned row under an optimistic transaction"
        );
        self.ver_check_read
            .entry((row.clone(), col))
            .or_insert_with(|| row.column_ver(col));
        self.pin(row);
        Ok(row.get(col))
    }

    fn write_column(
        &mut self,
        row: &RowHandle,
        col: ColumnId,
        value: Value,
    ) -> Result<(), Conflict> {
        assert!(!self.is_readonly(), "write in a read-only transaction");
        self.assert_active();
        if row.table_id().is_none() {
            row.update(col, value);
            return Ok(());
        }
        if self.staging.overwrite_pending(row, col, &value) {
            return Ok(());
        }
        assert_eq!(
            row.kind(),
            RowKind::Versioned,
            "unversioned row under an optimistic transaction"
        );
        if self.policy == OccPolicy::Eager {
            row.incr_column_ver(col);
        }
        self.ver_check_write
            .entry((row.clone(), col))
            .or_insert_with(|| row.column_ver(col));
        self.pin(row);
        self.staging.stage_update(row.clone(), col, value);
        Ok(())
    }

    fn insert_row(&mut self, tbl: &TableRef, row: RowHandle) -> Result<(), Conflict> {
        assert!(!self.is_readonly(), "insert in a read-only transaction");
        self.assert_active();
        assert_eq!(row.kind(), RowKind::Versioned);
        assert!(
            row.table_id().is_none(),
            "cannot insert a row already owned by a table"
        );
        self.staging.stage_insert(tbl, row);
        Ok(())
    }

    fn remove_row(&mut self, tbl: &TableRef, row: &RowHandle) -> Result<(), Conflict> {
        assert!(!self.is_readonly(), "remove in a read-only transaction");
        self.assert_active();
        if self.staging.cancel_insert(tbl.id(), row) {
            self.staging.clear_updates(row);
            return Ok(());
        }
        assert_eq!(
            row.kind(),
            RowKind::Versioned,
            "unversioned row under an optimistic transaction"
        );
        assert_eq!(
            row.table_id(),
            Some(tbl.id()),
            "remove of a row that is neither staged nor stored"
        );
        for col in 0..row.schema().columns_count() {
            if self.policy == OccPolicy::Eager {
                row.incr_column_ver(col);
            }
            // Refresh, not or_insert: an earlier write witness for this cell
            // would otherwise trail the remove's own bump.
            self.ver_check_write
                .insert((row.clone(), col), row.column_ver(col));
            self.pin(row);
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

    /// One-shot commit: validate, then replay. Fails with
    /// [`Conflict::Version`] leaving the transaction active so the caller
    /// decides to abort.
    fn commit(&mut self) -> Result<(), Conflict> {
        self.assert_active();
        if !self.version_check() {
            debug!(txn = self.id, "occ validation failed");
            return Err(Conflict::Version);
        }
        self.verified = true;
        self.commit_confirm();
        Ok(())
    }

    fn abort(&mut self) {
        self.assert_active();
        self.state = TxnState::Aborted;
        debug!(txn = self.id, "occ abort");
        self.release();
    }
}

impl Drop for TxnOcc {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            debug!(txn = self.id, "occ transaction dropped without commit");
            self.release();
        }
    }
}
