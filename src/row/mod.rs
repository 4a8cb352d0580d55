//! # Rows
//!
//! A row is a schema-shaped vector of values owned by at most one table. The
//! concurrency discipline a row participates in is fixed at construction via
//! its guard:
//!
//! - **Coarse** — one whole-row read/write try-lock (2PL, row granularity);
//! - **Fine** — one try-lock per column (2PL, column granularity);
//! - **Versioned** — a version counter per column plus a whole-row lock used
//!   only during OCC's two-phase commit.
//!
//! The guard is a tagged variant, so a discipline can match on exactly the
//! kinds it accepts and treat everything else as misuse.
//!
//! ## Identity and sharing
//!
//! Rows are shared through [`RowHandle`], an `Arc` newtype with *pointer*
//! identity: two handles are equal iff they name the same row object. Lock
//! tables, version witnesses and staged sets all key on this identity, which
//! is what lets duplicate-keyed rows coexist in one table. Holding a handle
//! pins the row — a transaction's accessed set is just a set of handles.
//!
//! ## Table binding
//!
//! `insert` into a table binds the row; `remove` unbinds it. A row that is
//! not bound lives only in some transaction's staging area and is accessed
//! without any concurrency control.

mod locks;

pub use locks::OwnerLock;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use crate::schema::Schema;
use crate::types::{ColumnId, MultiKey, TableId, TxnId, Value};
use crate::vmap::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Coarse,
    Fine,
    Versioned,
}

#[derive(Debug)]
enum RowGuard {
    Coarse(OwnerLock),
    Fine(Box<[OwnerLock]>),
    Versioned {
        versions: Box<[AtomicI64]>,
        lock: OwnerLock,
    },
}

#[derive(Debug)]
pub struct Row {
    schema: Arc<Schema>,
    values: Mutex<Vec<Value>>,
    table: Mutex<Option<TableId>>,
    guard: RowGuard,
}

impl Row {
    pub fn coarse(schema: Arc<Schema>, values: Vec<Value>) -> Result<RowHandle> {
        schema.check_row(&values)?;
        Ok(RowHandle(Arc::new(Self {
            schema,
            values: Mutex::new(values),
            table: Mutex::new(None),
            guard: RowGuard::Coarse(OwnerLock::new()),
        })))
    }

    pub fn fine(schema: Arc<Schema>, values: Vec<Value>) -> Result<RowHandle> {
        schema.check_row(&values)?;
        let locks: Box<[OwnerLock]> = (0..schema.columns_count())
            .map(|_| OwnerLock::new())
            .collect();
        Ok(RowHandle(Arc::new(Self {
            schema,
            values: Mutex::new(values),
            table: Mutex::new(None),
            guard: RowGuard::Fine(locks),
        })))
    }

    pub fn versioned(schema: Arc<Schema>, values: Vec<Value>) -> Result<RowHandle> {
        schema.check_row(&values)?;
        let versions: Box<[AtomicI64]> = (0..schema.columns_count())
            .map(|_| AtomicI64::new(0))
            .collect();
        Ok(RowHandle(Arc::new(Self {
            schema,
            values: Mutex::new(values),
            table: Mutex::new(None),
            guard: RowGuard::Versioned {
                versions,
                lock: OwnerLock::new(),
            },
        })))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn kind(&self) -> RowKind {
        match &self.guard {
            RowGuard::Coarse(_) => RowKind::Coarse,
            RowGuard::Fine(_) => RowKind::Fine,
            RowGuard::Versioned { .. } => RowKind::Versioned,
        }
    }

    /// The table currently owning this row, if any.
    pub fn table_id(&self) -> Option<TableId> {
        *self.table.lock()
    }

    pub(crate) fn bind(&self, table: TableId) {
        let mut slot = self.table.lock();
        assert!(slot.is_none(), "row is already owned by a table");
        *slot = Some(table);
    }

    pub(crate) fn unbind(&self) {
        *self.table.lock() = None;
    }

    pub fn key(&self) -> MultiKey {
        self.schema.key_of(&self.values.lock())
    }

    pub fn get(&self, col: ColumnId) -> Value {
        self.values.lock()[col].clone()
    }

    pub fn update(&self, col: ColumnId, value: Value) {
        self.values.lock()[col] = value;
    }

    /// Snapshot of the full payload, in schema order.
    pub fn values(&self) -> Vec<Value> {
        self.values.lock().clone()
    }

    // -- coarse / fine / versioned lock surface -----------------------------
    //
    // Callers must already have matched the row kind; a mismatched call is a
    // programming error.

    pub fn try_rlock_row(&self, owner: TxnId) -> bool {
        match &self.guard {
            RowGuard::Coarse(lock) => lock.try_rlock(owner),
            RowGuard::Versioned { lock, .. } => lock.try_rlock(owner),
            RowGuard::Fine(_) => panic!("whole-row lock on a column-locked row"),
        }
    }

    pub fn try_wlock_row(&self, owner: TxnId) -> bool {
        match &self.guard {
            RowGuard::Coarse(lock) => lock.try_wlock(owner),
            RowGuard::Versioned { lock, .. } => lock.try_wlock(owner),
            RowGuard::Fine(_) => panic!("whole-row lock on a column-locked row"),
        }
    }

    pub fn unlock_row(&self, owner: TxnId) {
        match &self.guard {
            RowGuard::Coarse(lock) => lock.unlock(owner),
            RowGuard::Versioned { lock, .. } => lock.unlock(owner),
            RowGuard::Fine(_) => panic!("whole-row unlock on a column-locked row"),
        }
    }

    pub fn try_rlock_column(&self, col: ColumnId, owner: TxnId) -> bool {
        match &self.guard {
            RowGuard::Fine(locks) => locks[col].try_rlock(owner),
            _ => panic!("column lock on a row without column locks"),
        }
    }

    pub fn try_wlock_column(&self, col: ColumnId, owner: TxnId) -> bool {
        match &self.guard {
            RowGuard::Fine(locks) => locks[col].try_wlock(owner),
            _ => panic!("column lock on a row without column locks"),
        }
    }

    pub fn unlock_column(&self, col: ColumnId, owner: TxnId) {
        match &self.guard {
            RowGuard::Fine(locks) => locks[col].unlock(owner),
            _ => panic!("column unlock on a row without column locks"),
        }
    }

    pub fn column_ver(&self, col: ColumnId) -> Version {
        match &self.guard {
            RowGuard::Versioned { versions, .. } => versions[col].load(Ordering::SeqCst),
            _ => panic!("column version on an unversioned row"),
        }
    }

    pub fn incr_column_ver(&self, col: ColumnId) {
        match &self.guard {
            RowGuard::Versioned { versions, .. } => {
                versions[col].fetch_add(1, Ordering::SeqCst);
            }
            _ => panic!("column version on an unversioned row"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RowHandle(Arc<Row>);

impl RowHandle {
    /// A fresh, unbound, unlocked row with the same kind, schema and payload.
    /// Versioned rows carry their column version counters over, so a replaced
    /// row keeps validating (and failing) concurrent witnesses correctly.
    pub fn copy(&self) -> RowHandle {
        let values = self.values();
        let schema = Arc::clone(self.schema());
        let copied = match self.kind() {
            RowKind::Coarse => Row::coarse(schema, values),
            RowKind::Fine => Row::fine(schema, values),
            RowKind::Versioned => Row::versioned(schema, values),
        }
        .expect("copy of a checked row is schema-valid");
        if let (
            RowGuard::Versioned { versions: src, .. },
            RowGuard::Versioned { versions: dst, .. },
        ) = (&self.0.guard, &copied.0.guard)
        {
            for (s, d) in src.iter().zip(dst.iter()) {
                d.store(s.load(Ordering::SeqCst), Ordering::SeqCst);
            }
        }
        copied
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl std::ops::Deref for RowHandle {
    type Target = Row;

    fn deref(&self) -> &Row {
        &self.0
    }
}

impl PartialEq for RowHandle {
    fn eq(&self, other: &RowHandle) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for RowHandle {}

impl std::hash::Hash for RowHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}
