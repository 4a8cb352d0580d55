//! # Tuning Constants
//!
//! Centralizes the inline-capacity constants used by the transaction layer.
//! Values that depend on each other are co-located so a change to one is
//! visible next to the others.
//!
//! ```text
//! UPDATE_BATCH_INLINE (4)
//!       Per-row staged column writes. Most transactions touch a handful of
//!       columns per row; the batch spills to the heap past this size.
//!
//! LOCK_SPANS_INLINE (2)
//!       Lock records per row. Coarse transactions record at most a read and
//!       a write span per row; fine-grained transactions spill on wide rows.
//!
//! READ_OWNERS_INLINE (2)
//!       Concurrent reader ids tracked inline by an owner lock before the
//!       holder list spills.
//! ```

/// Inline capacity of a per-row staged update batch.
pub const UPDATE_BATCH_INLINE: usize = 4;

/// Inline capacity of the lock-span list recorded per row.
pub const LOCK_SPANS_INLINE: usize = 2;

/// Inline capacity of an owner lock's reader list.
pub const READ_OWNERS_INLINE: usize = 2;
