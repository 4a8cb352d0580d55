//! # Transaction Runtime
//!
//! Pluggable concurrency disciplines over the shared tables:
//!
//! - [`Txn2Pl`] — strict two-phase locking, coarse (whole-row) or fine
//!   (per-column) granularity, selected by the row's kind;
//! - [`TxnOcc`] — optimistic concurrency control with eager or lazy version
//!   bumping, one-shot commit or two-phase prepare/confirm;
//! - [`NestedTxn`] — sub-transaction that stages locally and replays into its
//!   parent on commit;
//! - [`UncheckedTxn`] — unguarded passthrough for single-threaded setup.
//!
//! All disciplines share the same shape: mutations are *staged* (inserts,
//! per-row update batches, removes) and replayed atomically at commit under
//! the discipline's completion rule; reads resolve against the staging
//! overlay first, then engage the discipline against the table row; scans
//! interleave a committed-side cursor with the staged inserts through the
//! merge cursor, hiding staged removes.
//!
//! ## Conflicts vs misuse
//!
//! A failed try-lock or a failed validation is a [`Conflict`] — an expected
//! runtime outcome returned as `Err`; the transaction must then be aborted.
//! Using a finished transaction, mixing row kinds across disciplines, or
//! range-scanning an unsorted table is *misuse* and panics: those are
//! programming errors, not recoverable conditions.
//!
//! ## Ownership
//!
//! A transaction is owned by one thread (`&mut self` everywhere). Locks,
//! pins and snapshots are released on every exit path: commit, abort, or
//! drop of an unfinished transaction.

mod merge;
mod nested;
mod occ;
mod staging;
mod two_phase;
mod unchecked;

pub use nested::NestedTxn;
pub use occ::{OccPolicy, TxnOcc};
pub use two_phase::Txn2Pl;
pub use unchecked::UncheckedTxn;

use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::row::RowHandle;
use crate::schema::Schema;
use crate::table::{
    Order, ResultSet, SnapshotTable, SortedTable, Table, TableKind, TableRef, UnsortedTable,
};
use crate::types::{ColumnId, MultiKey, TableId, TxnId, Value};

use self::merge::merge;
use self::staging::Staging;

/// Why an operation or commit could not proceed. The transaction must be
/// aborted; retrying is the caller's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// A row or column try-lock failed.
    Lock,
    /// An OCC version witness no longer matches the row.
    Version,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Lock => f.write_str("lock conflict"),
            Conflict::Version => f.write_str("version validation failed"),
        }
    }
}

impl std::error::Error for Conflict {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

/// Common transaction contract. All operations are fatal misuse once the
/// state has left `Active`.
pub trait Txn {
    fn id(&self) -> TxnId;
    fn state(&self) -> TxnState;

    fn read_column(&mut self, row: &RowHandle, col: ColumnId) -> Result<Value, Conflict>;
    fn write_column(&mut self, row: &RowHandle, col: ColumnId, value: Value)
        -> Result<(), Conflict>;
    fn insert_row(&mut self, tbl: &TableRef, row: RowHandle) -> Result<(), Conflict>;
    fn remove_row(&mut self, tbl: &TableRef, row: &RowHandle) -> Result<(), Conflict>;

    fn query(&mut self, tbl: &TableRef, key: &MultiKey) -> ResultSet;
    fn query_lt(&mut self, tbl: &TableRef, key: &MultiKey, order: Order) -> ResultSet;
    fn query_gt(&mut self, tbl: &TableRef, key: &MultiKey, order: Order) -> ResultSet;
    fn query_in(&mut self, tbl: &TableRef, lo: &MultiKey, hi: &MultiKey, order: Order)
        -> ResultSet;
    fn all(&mut self, tbl: &TableRef, order: Order) -> ResultSet;

    fn commit(&mut self) -> Result<(), Conflict>;
    fn abort(&mut self);
}

/// Shared table registry and transaction factory.
pub struct TxnMgr {
    tables: RwLock<HashMap<String, TableRef>>,
    by_id: RwLock<HashMap<TableId, TableRef>>,
    next_table_id: AtomicU32,
}

impl TxnMgr {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(1),
        }
    }

    pub fn next_table_id(&self) -> TableId {
        self.next_table_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn reg_table(&self, tbl: TableRef) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(tbl.name()) {
            bail!("table '{}' is already registered", tbl.name());
        }
        self.by_id.write().insert(tbl.id(), Arc::clone(&tbl));
        tables.insert(tbl.name().to_owned(), tbl);
        Ok(())
    }

    pub fn create_unsorted_table(
        &self,
        name: impl Into<String>,
        schema: Arc<Schema>,
    ) -> Result<Arc<UnsortedTable>> {
        let tbl = Arc::new(UnsortedTable::new(self.next_table_id(), name, schema));
        self.reg_table(Arc::clone(&tbl) as TableRef)?;
        Ok(tbl)
    }

    pub fn create_sorted_table(
        &self,
        name: impl Into<String>,
        schema: Arc<Schema>,
    ) -> Result<Arc<SortedTable>> {
        let tbl = Arc::new(SortedTable::new(self.next_table_id(), name, schema));
        self.reg_table(Arc::clone(&tbl) as TableRef)?;
        Ok(tbl)
    }

    pub fn create_snapshot_table(
        &self,
        name: impl Into<String>,
        schema: Arc<Schema>,
    ) -> Result<Arc<SnapshotTable>> {
        let tbl = Arc::new(SnapshotTable::new(self.next_table_id(), name, schema));
        self.reg_table(Arc::clone(&tbl) as TableRef)?;
        Ok(tbl)
    }

    pub fn get_table(&self, name: &str) -> Option<TableRef> {
        self.tables.read().get(name).cloned()
    }

    fn get_kind_checked(&self, name: &str, kind: TableKind) -> Option<TableRef> {
        let tbl = self.get_table(name)?;
        assert_eq!(tbl.kind(), kind, "table '{name}' has kind {:?}", tbl.kind());
        Some(tbl)
    }

    pub fn get_unsorted_table(&self, name: &str) -> Option<TableRef> {
        self.get_kind_checked(name, TableKind::Unsorted)
    }

    pub fn get_sorted_table(&self, name: &str) -> Option<TableRef> {
        self.get_kind_checked(name, TableKind::Sorted)
    }

    pub fn get_snapshot_table(&self, name: &str) -> Option<TableRef> {
        self.get_kind_checked(name, TableKind::Snapshot)
    }

    pub(crate) fn table_by_id(&self, id: TableId) -> Option<TableRef> {
        self.by_id.read().get(&id).cloned()
    }

    pub fn start_2pl(self: &Arc<Self>, id: TxnId) -> Txn2Pl {
        Txn2Pl::new(Arc::clone(self), id)
    }

    pub fn start_occ(self: &Arc<Self>, id: TxnId, policy: OccPolicy) -> TxnOcc {
        TxnOcc::new(Arc::clone(self), id, policy)
    }

    /// A read-only OCC transaction over snapshots of the named snapshot
    /// tables, taken atomically at start. Its commit always succeeds.
    pub fn start_occ_readonly(
        self: &Arc<Self>,
        id: TxnId,
        policy: OccPolicy,
        table_names: &[&str],
    ) -> TxnOcc {
        TxnOcc::new_readonly(Arc::clone(self), id, policy, table_names)
    }

    pub fn start_unchecked(self: &Arc<Self>, id: TxnId) -> UncheckedTxn {
        UncheckedTxn::new(Arc::clone(self), id)
    }

    pub fn start_nested<'a>(&self, base: &'a mut dyn Txn) -> NestedTxn<'a> {
        NestedTxn::new(base)
    }
}

impl Default for TxnMgr {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the five scan shapes shared by every discipline.
pub(crate) enum ScanKind<'a> {
    Point(&'a MultiKey),
    Lt(&'a MultiKey),
    Gt(&'a MultiKey),
    In(&'a MultiKey, &'a MultiKey),
    All,
}

impl<'a> ScanKind<'a> {
    /// Bounds of the staged-inserts slice this scan overlays.
    fn staged_bounds(&self) -> (Bound<&'a MultiKey>, Bound<&'a MultiKey>) {
        match self {
            ScanKind::Point(k) => (Bound::Included(*k), Bound::Included(*k)),
            ScanKind::Lt(k) => (Bound::Unbounded, Bound::Excluded(*k)),
            ScanKind::Gt(k) => (Bound::Excluded(*k), Bound::Unbounded),
            ScanKind::In(lo, hi) => (Bound::Included(*lo), Bound::Excluded(*hi)),
            ScanKind::All => (Bound::Unbounded, Bound::Unbounded),
        }
    }
}

/// Committed-side cursor straight from the table.
pub(crate) fn table_scan(tbl: &TableRef, kind: &ScanKind<'_>, order: Order) -> ResultSet {
    match kind {
        ScanKind::Point(k) => tbl.query(k),
        ScanKind::Lt(k) => tbl.query_lt(k, order),
        ScanKind::Gt(k) => tbl.query_gt(k, order),
        ScanKind::In(lo, hi) => tbl.query_in(lo, hi, order),
        ScanKind::All => tbl.all(order),
    }
}

/// Lays this transaction's staging over an already-built committed cursor.
pub(crate) fn overlay_scan(
    committed: ResultSet,
    tbl_id: TableId,
    staging: &Staging,
    kind: &ScanKind<'_>,
    order: Order,
) -> ResultSet {
    if let ScanKind::In(lo, hi) = kind {
        if lo >= hi {
            return committed;
        }
    }
    let descending = matches!(order, Order::Desc);
    let (lo, hi) = kind.staged_bounds();
    let staged = staging.staged_range(tbl_id, lo, hi, descending);
    let removed = staging.removes_for(tbl_id);
    merge(committed, staged, removed, descending)
}
