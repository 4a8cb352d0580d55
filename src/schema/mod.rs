//! # Schema Definitions
//!
//! Column and schema metadata for table rows. A schema is an ordered list of
//! typed columns, one or more of which form the row key; the key columns'
//! values, projected in schema order, are the row's [`MultiKey`].
//!
//! ## Construction
//!
//! ```rust,ignore
//! use snapdb::schema::{ColumnDef, Schema};
//! use snapdb::types::DataType;
//!
//! let schema = Schema::new(vec![
//!     ColumnDef::new("id", DataType::Int).with_key(),
//!     ColumnDef::new("name", DataType::Text),
//!     ColumnDef::new("balance", DataType::Int),
//! ])?;
//! ```
//!
//! Schemas are immutable once built and shared between a table and every row
//! it owns via `Arc<Schema>`.

use eyre::{bail, Result};

use crate::types::{ColumnId, DataType, MultiKey, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
    key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            key: false,
        }
    }

    /// Marks this column as part of the row key.
    pub fn with_key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_key(&self) -> bool {
        self.key
    }
}

#[derive(Debug, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    key_columns: Vec<ColumnId>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        if columns.is_empty() {
            bail!("schema requires at least one column");
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name() == col.name()) {
                bail!("duplicate column name '{}'", col.name());
            }
        }
        let key_columns: Vec<ColumnId> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_key())
            .map(|(i, _)| i)
            .collect();
        if key_columns.is_empty() {
            bail!("schema requires at least one key column");
        }
        Ok(Self {
            columns,
            key_columns,
        })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn columns_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn column(&self, id: ColumnId) -> &ColumnDef {
        &self.columns[id]
    }

    pub fn key_columns(&self) -> &[ColumnId] {
        &self.key_columns
    }

    /// Projects the key columns out of a full row of values.
    pub fn key_of(&self, values: &[Value]) -> MultiKey {
        debug_assert_eq!(values.len(), self.columns.len());
        self.key_columns
            .iter()
            .map(|&i| values[i].clone())
            .collect::<Vec<_>>()
            .into()
    }

    /// Checks a full row of values against column count and types.
    pub fn check_row(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.columns.len() {
            bail!(
                "row has {} values, schema '{}' columns expect {}",
                values.len(),
                self.columns
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(","),
                self.columns.len()
            );
        }
        for (col, value) in self.columns.iter().zip(values) {
            if !col.data_type().accepts(value) {
                bail!(
                    "column '{}' of type {} cannot hold {:?}",
                    col.name(),
                    col.data_type(),
                    value
                );
            }
        }
        Ok(())
    }
}
