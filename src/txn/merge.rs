//! Merge cursor: one transaction-local view over committed and staged rows.
//!
//! Interleaves the committed-side cursor with the staged-insert slice in row
//! key order, hiding rows the transaction has staged for removal. When both
//! sides present the same key the committed row is yielded first; the staged
//! row is new and follows. Descending scans mirror the comparison.
//!
//! The cursor owns everything it walks: the committed `ResultSet`, a
//! direction-ordered copy of the staged slice, and the removal filter.
//! One row is prefetched per side; nothing else is buffered.

use hashbrown::HashSet;

use crate::row::RowHandle;
use crate::table::ResultSet;

pub(crate) fn merge(
    committed: ResultSet,
    staged: Vec<RowHandle>,
    removed: HashSet<RowHandle>,
    descending: bool,
) -> ResultSet {
    if staged.is_empty() && removed.is_empty() {
        return committed;
    }
    ResultSet::new(Box::new(MergeCursor {
        committed,
        staged: staged.into_iter(),
        removed,
        descending,
        committed_next: None,
        staged_next: None,
    }))
}

struct MergeCursor {
    committed: ResultSet,
    staged: std::vec::IntoIter<RowHandle>,
    removed: HashSet<RowHandle>,
    descending: bool,
    committed_next: Option<RowHandle>,
    staged_next: Option<RowHandle>,
}

impl MergeCursor {
    fn prefetch(&mut self) {
        while self.committed_next.is_none() {
            match self.committed.next() {
                Some(row) if self.removed.contains(&row) => continue,
                other => {
                    self.committed_next = other;
                    break;
                }
            }
        }
        if self.staged_next.is_none() {
            self.staged_next = self.staged.next();
        }
    }
}

impl Iterator for MergeCursor {
    type Item = RowHandle;

    fn next(&mut self) -> Option<RowHandle> {
        self.prefetch();
        match (&self.committed_next, &self.staged_next) {
            (Some(c), Some(s)) => {
                let committed_first = if self.descending {
                    c.key() >= s.key()
                } else {
                    c.key() <= s.key()
                };
                if committed_first {
                    self.committed_next.take()
                } else {
                    self.staged_next.take()
                }
            }
            (Some(_), None) => self.committed_next.take(),
            (None, Some(_)) => self.staged_next.take(),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::schema::{ColumnDef, Schema};
    use crate::types::{DataType, Value};
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ColumnDef::new("id", DataType::Int).with_key(),
                ColumnDef::new("v", DataType::Int),
            ])
            .unwrap(),
        )
    }

    fn row(id: i64, v: i64) -> RowHandle {
        Row::coarse(schema(), vec![Value::Int(id), Value::Int(v)]).unwrap()
    }

    fn ids(rs: ResultSet) -> Vec<i64> {
        rs.map(|r| match r.get(0) {
            Value::Int(i) => i,
            other => panic!("unexpected key {other:?}"),
        })
        .collect()
    }

    #[test]
    fn interleaves_in_key_order() {
        let committed = ResultSet::from_vec(vec![row(1, 0), row(4, 0), row(6, 0)]);
        let staged = vec![row(2, 0), row(5, 0)];
        let out = merge(committed, staged, HashSet::new(), false);
        assert_eq!(ids(out), vec![1, 2, 4, 5, 6]);
    }

    #[test]
    fn committed_wins_key_ties() {
        let committed_row = row(3, 0);
        let staged_row = row(3, 1);
        let committed = ResultSet::from_vec(vec![committed_row.clone()]);
        let out: Vec<RowHandle> =
            merge(committed, vec![staged_row.clone()], HashSet::new(), false).collect();
        assert_eq!(out, vec![committed_row, staged_row]);
    }

    #[test]
    fn removed_rows_are_hidden() {
        let a = row(1, 0);
        let b = row(2, 0);
        let c = row(3, 0);
        let committed = ResultSet::from_vec(vec![a.clone(), b.clone(), c.clone()]);
        let removed: HashSet<RowHandle> = [b].into_iter().collect();
        let out = merge(committed, Vec::new(), removed, false);
        assert_eq!(ids(out), vec![1, 3]);
    }

    #[test]
    fn descending_mirrors_ascending() {
        let committed = ResultSet::from_vec(vec![row(6, 0), row(4, 0), row(1, 0)]);
        let staged = vec![row(5, 0), row(2, 0)];
        let out = merge(committed, staged, HashSet::new(), true);
        assert_eq!(ids(out), vec![6, 5, 4, 2, 1]);
    }
}
