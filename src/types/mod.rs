//! # Core Value Types
//!
//! Runtime values, column data types, and the composite row key used by every
//! table container. `Value` carries a total order and bit-pattern hashing so
//! it can serve directly as B-tree and hash-map key material.

mod data_type;
mod multi_key;
mod value;

pub use data_type::DataType;
pub use multi_key::MultiKey;
pub use value::Value;

/// Column position within a schema.
pub type ColumnId = usize;

/// Identifier assigned to a table at registration.
pub type TableId = u32;

/// Transaction identifier. Allocation is the caller's concern; ids only need
/// to be unique among transactions that may contend for the same rows.
pub type TxnId = u64;
