//! # Table Containers
//!
//! Three row containers behind one capability trait:
//!
//! | Kind       | Backing                         | Point | Range | Snapshots |
//! |------------|---------------------------------|-------|-------|-----------|
//! | `Unsorted` | hash buckets                    | yes   | no    | no        |
//! | `Sorted`   | B-tree                          | yes   | yes   | no        |
//! | `Snapshot` | versioned ordered map           | yes   | yes   | yes       |
//!
//! Tables are shared (`Send + Sync`) and internally synchronized; atomicity
//! across calls is the transaction discipline's job, not the table's.
//!
//! Every query yields a [`ResultSet`], an owning cursor over row handles.
//! Inserting binds a row to the table, removing unbinds it; a row belongs to
//! at most one table at a time.
//!
//! Range semantics: `query_lt` is strictly-less, `query_gt` strictly-greater,
//! `query_in` the half-open `[lo, hi)`. Unsorted tables reject range queries
//! and ordered scans outright (fatal misuse, not an error value).

mod snapshot;
mod sorted;
mod unsorted;

pub use snapshot::{SnapshotTable, TableSnapshot};
pub use sorted::SortedTable;
pub use unsorted::UnsortedTable;

use std::sync::Arc;

use crate::row::RowHandle;
use crate::schema::Schema;
use crate::types::{MultiKey, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Unsorted,
    Sorted,
    Snapshot,
}

/// Requested iteration order for scans. `Any` lets the table pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
    Any,
}

pub type TableRef = Arc<dyn Table>;

pub trait Table: Send + Sync {
    fn id(&self) -> TableId;
    fn name(&self) -> &str;
    fn kind(&self) -> TableKind;
    fn schema(&self) -> &Arc<Schema>;

    /// Binds `row` to this table and stores it. Duplicate keys coexist.
    fn insert(&self, row: RowHandle);

    /// Removes exactly `row` (object identity) and unbinds it.
    fn remove(&self, row: &RowHandle);

    fn query(&self, key: &MultiKey) -> ResultSet;
    fn query_lt(&self, key: &MultiKey, order: Order) -> ResultSet;
    fn query_gt(&self, key: &MultiKey, order: Order) -> ResultSet;
    fn query_in(&self, lo: &MultiKey, hi: &MultiKey, order: Order) -> ResultSet;
    fn all(&self, order: Order) -> ResultSet;

    /// Snapshot capability; only snapshot tables answer.
    fn as_snapshot(&self) -> Option<&SnapshotTable> {
        None
    }
}

/// Owning cursor over row handles. Dropping it releases whatever the inner
/// cursor held (snapshot registrations included).
pub struct ResultSet {
    inner: Box<dyn Iterator<Item = RowHandle> + Send>,
}

impl ResultSet {
    pub(crate) fn new(inner: Box<dyn Iterator<Item = RowHandle> + Send>) -> Self {
        Self { inner }
    }

    pub(crate) fn from_vec(rows: Vec<RowHandle>) -> Self {
        Self {
            inner: Box::new(rows.into_iter()),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl Iterator for ResultSet {
    type Item = RowHandle;

    fn next(&mut self) -> Option<RowHandle> {
        self.inner.next()
    }
}
