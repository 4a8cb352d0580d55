//! # SnapDB - In-Process Multi-Version Relational Store
//!
//! SnapDB is an embedded, in-memory relational store built around a
//! transactional execution layer: pluggable concurrency disciplines composed
//! over a multi-version snapshot map that backs snapshot-capable tables.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use snapdb::{ColumnDef, DataType, Row, Schema, Txn, TxnMgr, Value};
//!
//! let mgr = Arc::new(TxnMgr::new());
//! let schema = Arc::new(Schema::new(vec![
//!     ColumnDef::new("id", DataType::Int).with_key(),
//!     ColumnDef::new("balance", DataType::Int),
//! ])?);
//! let accounts = mgr.create_snapshot_table("accounts", Arc::clone(&schema))?;
//!
//! let mut txn = mgr.start_2pl(1);
//! let row = Row::coarse(schema, vec![Value::Int(1), Value::Int(100)])?;
//! txn.insert_row(&(accounts as _), row)?;
//! txn.commit()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   Transactions (2PL / OCC / nested / raw)    │
//! │   staging · merge cursor · locks · witnesses │
//! ├──────────────────────────────────────────────┤
//! │   Tables (unsorted / sorted / snapshot)      │
//! ├──────────────────────────────────────────────┤
//! │   Versioned map (snapshots, deferred GC)     │
//! ├──────────────────────────────────────────────┤
//! │   Rows · owner try-locks · column versions   │
//! ├──────────────────────────────────────────────┤
//! │   Schema · values · composite keys           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! Tables, rows and snapshot groups are shared between threads; each
//! transaction object belongs to exactly one thread. Nothing in the core
//! blocks indefinitely: row and column locks are try-locks whose failure
//! surfaces as a [`Conflict`], and snapshot readers never wait on the
//! writer.
//!
//! ## Module Overview
//!
//! - [`types`]: values, data types, composite row keys
//! - [`schema`]: column and schema definitions
//! - [`row`]: shared rows, owner-tracked try-locks, column versions
//! - [`vmap`]: versioned ordered map with snapshots and deferred GC
//! - [`table`]: the three table containers behind one capability trait
//! - [`txn`]: the transaction runtime and its disciplines

pub mod config;
pub mod row;
pub mod schema;
pub mod table;
pub mod txn;
pub mod types;
pub mod vmap;

pub use row::{Row, RowHandle, RowKind};
pub use schema::{ColumnDef, Schema};
pub use table::{
    Order, ResultSet, SnapshotTable, SortedTable, Table, TableKind, TableRef, TableSnapshot,
    UnsortedTable,
};
pub use txn::{Conflict, NestedTxn, OccPolicy, Txn, Txn2Pl, TxnMgr, TxnOcc, TxnState, UncheckedTxn};
pub use types::{ColumnId, DataType, MultiKey, TableId, TxnId, Value};
pub use vmap::{MapSnapshot, SnapshotRange, Version, VersionedMap, VersionedValue};
