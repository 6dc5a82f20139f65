//! Sort engine.
//!
//! An [`OrderBy`] is parsed from `"col[:asc|:desc] ..."` and turned into a
//! [`RowComparator`]: one cell comparator per field in priority order, each
//! ordering by value class first (null, then NaN, then the rest) and by
//! value on a tie. Cells are compared on their input value so that pending
//! edits sort where they are displayed.

use std::cmp::Ordering;
use std::fmt;

use horizon_grid_core::logging::targets;
use horizon_grid_core::{GridError, Result};
use serde::{Deserialize, Serialize};

use crate::row::RowId;
use crate::store::RowStore;
use crate::value::compare_cells;

/// Sort direction of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    }
}

/// An ordered list of sort columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy {
    entries: Vec<(String, SortDir)>,
}

impl OrderBy {
    /// Parse `"col[:asc|:desc] ..."`. A missing direction means ascending.
    pub fn parse(s: &str) -> Result<Self> {
        let mut entries: Vec<(String, SortDir)> = Vec::new();
        for word in s.split_whitespace() {
            let (col, dir) = match word.split_once(':') {
                Some((col, "asc")) => (col, SortDir::Asc),
                Some((col, "desc")) => (col, SortDir::Desc),
                Some(_) => return Err(GridError::InvalidOrderBy(s.to_string())),
                None => (word, SortDir::Asc),
            };
            if col.is_empty() {
                return Err(GridError::InvalidOrderBy(s.to_string()));
            }
            entries.retain(|(c, _)| c != col);
            entries.push((col.to_string(), dir));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(String, SortDir)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dir(&self, col: &str) -> Option<SortDir> {
        self.entries.iter().find(|(c, _)| c == col).map(|(_, d)| *d)
    }

    /// Zero-based priority of a column, if it is sorted on.
    pub fn priority(&self, col: &str) -> Option<usize> {
        self.entries.iter().position(|(c, _)| c == col)
    }

    /// Set or clear the direction of `col`. Unless `keep_others`, every
    /// other column is dropped.
    pub fn set_dir(&mut self, col: &str, dir: Option<SortDir>, keep_others: bool) {
        if !keep_others {
            self.entries.retain(|(c, _)| c == col);
        }
        match (self.priority(col), dir) {
            (Some(i), Some(dir)) => self.entries[i].1 = dir,
            (Some(i), None) => {
                self.entries.remove(i);
            }
            (None, Some(dir)) => self.entries.push((col.to_string(), dir)),
            (None, None) => {}
        }
    }

    /// Cycle `col` through ascending, descending and unsorted.
    pub fn toggle(&mut self, col: &str, keep_others: bool) {
        let next = match self.dir(col) {
            None => Some(SortDir::Asc),
            Some(SortDir::Asc) => Some(SortDir::Desc),
            Some(SortDir::Desc) => None,
        };
        self.set_dir(col, next, keep_others);
    }

    /// Drop columns that do not exist or are not sortable.
    pub fn retain_sortable(&mut self, store: &RowStore) {
        self.entries.retain(|(col, _)| match store.field(col) {
            Some(field) if field.sortable => true,
            Some(_) => {
                tracing::warn!(target: targets::SORT, col, "field is not sortable");
                false
            }
            None => {
                tracing::warn!(target: targets::SORT, col, "order_by references unknown column");
                false
            }
        });
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (col, dir)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(col)?;
            if *dir == SortDir::Desc {
                f.write_str(":desc")?;
            }
        }
        Ok(())
    }
}

/// Composed row comparator over resolved field positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowComparator {
    keys: Vec<(usize, SortDir)>,
}

impl RowComparator {
    /// Build a comparator for `order_by`, falling back to ascending
    /// `pos_col` when no order is given. `None` means "keep load order".
    pub fn new(store: &RowStore, order_by: &OrderBy, pos_col: Option<&str>) -> Option<Self> {
        let mut keys: Vec<(usize, SortDir)> = order_by
            .entries()
            .iter()
            .filter_map(|(col, dir)| store.field_index(col).map(|fi| (fi, *dir)))
            .collect();
        if keys.is_empty() {
            if let Some(fi) = pos_col.and_then(|c| store.field_index(c)) {
                keys.push((fi, SortDir::Asc));
            }
        }
        (!keys.is_empty()).then_some(Self { keys })
    }

    pub fn compare(&self, store: &RowStore, a: RowId, b: RowId) -> Ordering {
        for &(fi, dir) in &self.keys {
            let ord = match (store.cell_input_val(a, fi), store.cell_input_val(b, fi)) {
                (Some(v1), Some(v2)) => compare_cells(v1, v2),
                _ => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return dir.apply(ord);
            }
        }
        Ordering::Equal
    }

    /// Tree-stable comparison: rows in different subtrees are ordered by
    /// their ancestors at the first level where their chains diverge, and an
    /// ancestor always precedes its descendants.
    pub fn compare_in_tree(&self, store: &RowStore, a: RowId, b: RowId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let path = |row: RowId| -> Vec<RowId> {
            let mut path: Vec<RowId> = store
                .row(row)
                .map(|r| r.parent_rows().iter().rev().copied().collect())
                .unwrap_or_default();
            path.push(row);
            path
        };
        let (pa, pb) = (path(a), path(b));
        match pa.iter().zip(&pb).position(|(x, y)| x != y) {
            Some(i) => self.compare(store, pa[i], pb[i]),
            None => pa.len().cmp(&pb.len()),
        }
    }
}

/// Sort `rows` in place by `order_by`.
pub fn sort_rows(store: &RowStore, rows: &mut [RowId], order_by: &OrderBy) {
    if let Some(cmp) = RowComparator::new(store, order_by, None) {
        rows.sort_by(|&a, &b| cmp.compare(store, a, b));
    }
}
