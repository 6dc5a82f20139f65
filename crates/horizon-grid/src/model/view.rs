//! The visible row sequence: sort order, filters, master/detail parameters.

use std::cmp::Ordering;

use horizon_grid_core::logging::{span_names, targets};
use horizon_grid_core::{PerfSpan, Result};

use super::{ReloadDecision, ReloadOptions, RowsetModel};
use crate::filter::{ParamVals, RowFilter};
use crate::row::{RowFlag, RowId};
use crate::sort::{OrderBy, RowComparator, SortDir};
use crate::value::Value;

impl RowsetModel {
    // -------------------------------------------------------------------------
    // Sort order
    // -------------------------------------------------------------------------

    pub fn order_by(&self) -> &OrderBy {
        &self.order_by
    }

    /// Replace the sort order. Unknown and non-sortable columns are dropped.
    pub fn set_order_by(&mut self, order_by: &str) -> Result<()> {
        let mut parsed = OrderBy::parse(order_by)?;
        parsed.retain_sortable(&self.store);
        self.apply_order_by(parsed);
        Ok(())
    }

    /// Set (or clear, with `None`) the direction of one column.
    pub fn set_order_by_dir(&mut self, col: &str, dir: Option<SortDir>, keep_others: bool) {
        let mut order_by = self.order_by.clone();
        order_by.set_dir(col, dir, keep_others);
        order_by.retain_sortable(&self.store);
        self.apply_order_by(order_by);
    }

    /// Cycle one column through ascending, descending and unsorted.
    pub fn toggle_order_by(&mut self, col: &str, keep_others: bool) {
        let mut order_by = self.order_by.clone();
        order_by.toggle(col, keep_others);
        order_by.retain_sortable(&self.store);
        self.apply_order_by(order_by);
    }

    fn apply_order_by(&mut self, order_by: OrderBy) {
        if order_by == self.order_by {
            return;
        }
        if !self.config.can_sort_rows && !order_by.is_empty() {
            tracing::debug!(target: targets::SORT, "sorting disabled");
            return;
        }
        self.order_by = order_by;
        self.init_rows();
        self.signals.order_by_changed.emit(self.order_by.to_string());
    }

    /// Compare two rows the way the visible sequence orders them.
    pub fn compare_rows(&self, a: RowId, b: RowId) -> Ordering {
        let pos_col = self.pos_field().map(|f| f.name.as_str());
        let Some(cmp) = RowComparator::new(&self.store, &self.order_by, pos_col) else {
            return Ordering::Equal;
        };
        if self.tree.is_active() {
            cmp.compare_in_tree(&self.store, a, b)
        } else {
            cmp.compare(&self.store, a, b)
        }
    }

    // -------------------------------------------------------------------------
    // Visible rows
    // -------------------------------------------------------------------------

    /// Recompute the visible sequence from the filter, the sort order and
    /// the tree, and store each row's position in its index slot.
    pub(crate) fn init_rows(&mut self) {
        let _span = PerfSpan::new(span_names::SORT);
        let local = self.config.is_client_side() && !self.param_map.is_empty();
        self.filter = RowFilter::build(&self.store, &self.param_vals, local);

        for &row in &self.rows {
            self.store.set_row_index(row, None);
        }
        let pos_col = self.pos_field().map(|f| f.name.clone());
        let cmp = RowComparator::new(&self.store, &self.order_by, pos_col.as_deref());

        let rows = if self.tree.is_active() {
            if let Some(cmp) = &cmp {
                self.tree
                    .sort_children(&mut self.store, |store, a, b| cmp.compare(store, a, b));
            }
            let store = &self.store;
            let filter = &self.filter;
            self.tree.flatten(store, |row| {
                store.row(row).is_some_and(|r| !r.parent_collapsed) && filter.accepts(store, row)
            })
        } else {
            let mut rows: Vec<RowId> = self
                .store
                .all_rows()
                .iter()
                .copied()
                .filter(|&row| self.filter.accepts(&self.store, row))
                .collect();
            if let Some(cmp) = &cmp {
                rows.sort_by(|&a, &b| cmp.compare(&self.store, a, b));
            }
            rows
        };

        for (i, &row) in rows.iter().enumerate() {
            self.store.set_row_index(row, Some(i));
        }
        tracing::trace!(target: targets::SORT, visible = rows.len(), "visible rows rebuilt");
        self.rows = rows;
        self.signals.rows_changed.emit(());
    }

    /// Whether a row passes the filter and has no collapsed ancestor.
    pub fn is_row_visible(&self, row: RowId) -> bool {
        self.store.row(row).is_some_and(|r| !r.parent_collapsed) && self.filter.accepts(&self.store, row)
    }

    /// Whether exclude lists currently hide rows.
    pub fn is_filtered(&self) -> bool {
        self.filter.is_filtered()
    }

    /// Hide rows whose `col` value is in `vals`. The list is kept as a live
    /// property override so it survives a reset.
    pub fn set_exclude_vals(&mut self, col: &str, vals: Vec<Value>) -> Result<()> {
        let fi = self.require_field(col)?;
        self.config
            .fields
            .prop_col_attrs
            .entry(col.to_string())
            .or_default()
            .exclude_vals = Some(vals.clone());
        if let Some(field) = self.store.field_at_mut(fi) {
            field.exclude_vals = vals;
        }
        self.init_rows();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Master/detail parameters
    // -------------------------------------------------------------------------

    pub fn param_vals(&self) -> &ParamVals {
        &self.param_vals
    }

    /// Replace the parameter declaration (`"param[=master_col] ..."`).
    /// Values become unavailable until a master selection is given.
    pub fn set_params(&mut self, params: &str) {
        self.param_map = crate::filter::ParamMap::parse(params);
        self.config.params = Some(params.to_string());
        self.param_vals = if self.param_map.is_empty() {
            ParamVals::Unbound
        } else {
            ParamVals::Unavailable
        };
        self.init_rows();
        self.signals.params_changed.emit(());
    }

    /// Set parameter values. A client-side rowset refilters in place; a
    /// remote one asks for a reload.
    pub fn set_param_vals(&mut self, vals: ParamVals) -> Option<ReloadDecision> {
        if vals == self.param_vals {
            return None;
        }
        self.param_vals = vals;
        self.signals.params_changed.emit(());
        if self.config.is_client_side() {
            self.init_rows();
            return None;
        }
        Some(self.reload(ReloadOptions::default()))
    }

    /// Derive parameter values from the rows selected in a master rowset.
    pub fn set_master_selection(&mut self, master: &RowsetModel, selected: &[RowId]) -> Option<ReloadDecision> {
        let vals = self.param_map.param_vals(&master.store, selected);
        self.set_param_vals(vals)
    }

    /// The opaque filter token describing the current parameter values.
    pub fn filter_token(&self) -> Option<String> {
        self.param_map.filter_token(&self.param_vals)
    }

    /// A master row's key changed from `old` to `new`: carry the change
    /// into the foreign-key cells of this client-side detail rowset.
    /// Returns the number of rows updated.
    pub fn master_val_changed(&mut self, master_col: &str, old: &Value, new: &Value) -> usize {
        if !self.config.is_client_side() {
            return 0;
        }
        let Some(param) = self.param_map.param_for(master_col).map(str::to_string) else {
            return 0;
        };
        let Some(fi) = self.store.field_index(&param) else {
            return 0;
        };
        let rows = match self.lookup(&param, std::slice::from_ref(old)) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(target: targets::FILTER, %err, "detail lookup failed");
                return 0;
            }
        };
        let mut count = 0;
        for row in rows {
            if self.set_cell_val_at(row, fi, new.clone(), false) {
                count += 1;
            }
        }
        self.cascade_params(master_col, old, new);
        if count > 0 {
            self.init_rows();
        }
        count
    }

    /// Master rows were marked (or unmarked) removed: mirror the mark on
    /// the matching rows of this client-side detail rowset.
    ///
    /// `keys` are the removed master rows' `(master_col, value)` pairs.
    pub fn master_row_removed(&mut self, keys: &[(String, Value)], removed: bool) -> usize {
        if !self.config.is_client_side() {
            return 0;
        }
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for (master_col, val) in keys {
            if let Some(param) = self.param_map.param_for(master_col) {
                cols.push(param.to_string());
                vals.push(val.clone());
            }
        }
        if cols.is_empty() {
            return 0;
        }
        let rows = self.lookup(&cols.join(" "), &vals).unwrap_or_default();
        let mut count = 0;
        for row in rows {
            let Some(r) = self.store.row(row) else {
                continue;
            };
            if r.removed == removed {
                continue;
            }
            self.begin_change(row, false);
            self.store.set_row_flag(RowFlag::Removed, removed);
            self.end_change();
            if removed {
                self.row_changed(row);
            } else if !self.store.cells_modified(row, None) && !self.store.row(row).is_some_and(|r| r.is_new) {
                self.row_unchanged(row);
            }
            count += 1;
        }
        if count > 0 {
            self.init_rows();
        }
        count
    }

    /// Follow a master key change in the stored parameter values.
    fn cascade_params(&mut self, master_col: &str, old: &Value, new: &Value) {
        let Some(param) = self.param_map.param_for(master_col).map(str::to_string) else {
            return;
        };
        if let ParamVals::Rows(rows) = &mut self.param_vals {
            for (p, v) in rows.iter_mut().flatten() {
                if *p == param && v == old {
                    *v = new.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::changeset::{RowData, Rowset};
    use crate::config::RowsetConfig;
    use crate::field::FieldAttrs;

    fn people() -> RowsetModel {
        let rowset = Rowset {
            fields: vec![
                FieldAttrs::named("id").with_type("number"),
                FieldAttrs::named("name"),
                FieldAttrs::named("pos").with_type("number"),
            ],
            rows: vec![
                RowData::Values(vec![1.into(), "carol".into(), 3.into()]),
                RowData::Values(vec![2.into(), "alice".into(), 1.into()]),
                RowData::Values(vec![3.into(), "bob".into(), 2.into()]),
            ],
            pk: Some("id".into()),
            pos_col: Some("pos".into()),
            ..Default::default()
        };
        RowsetModel::new(RowsetConfig::with_rowset(rowset))
    }

    fn names(m: &RowsetModel) -> Vec<String> {
        m.rows()
            .iter()
            .map(|&r| m.cell_val(r, "name").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_pos_order_by_default() {
        let m = people();
        assert_eq!(names(&m), ["alice", "bob", "carol"]);
        for (i, &row) in m.rows().iter().enumerate() {
            assert_eq!(m.row_index(row), Some(i));
        }
    }

    #[test]
    fn test_order_by_and_toggle() {
        let mut m = people();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        m.signals().order_by_changed.connect(move |o: &String| s.lock().push(o.clone()));

        m.set_order_by("name:desc").unwrap();
        assert_eq!(names(&m), ["carol", "bob", "alice"]);
        m.toggle_order_by("id", false);
        assert_eq!(names(&m), ["carol", "alice", "bob"]);
        m.toggle_order_by("id", false);
        m.toggle_order_by("id", false);
        // Back to the position fallback.
        assert_eq!(names(&m), ["alice", "bob", "carol"]);
        assert_eq!(*seen.lock(), ["name:desc", "id", "id:desc", ""]);
        assert!(m.set_order_by("name:up").is_err());
    }

    #[test]
    fn test_sort_uses_pending_values() {
        let mut m = people();
        m.set_order_by("name").unwrap();
        let carol = m.rows()[2];
        m.set_cell_val(carol, "name", "aaron", true).unwrap();
        m.set_order_by("name:desc").unwrap();
        m.set_order_by("name").unwrap();
        assert_eq!(m.rows()[0], carol);
    }

    #[test]
    fn test_exclude_vals() {
        let mut m = people();
        m.set_exclude_vals("name", vec!["bob".into()]).unwrap();
        assert_eq!(names(&m), ["alice", "carol"]);
        assert!(m.is_filtered());
        // The exclusion survives a reset.
        m.reset();
        assert_eq!(names(&m), ["alice", "carol"]);
    }

    fn orders() -> RowsetModel {
        let rowset = Rowset {
            fields: vec![FieldAttrs::named("order_id"), FieldAttrs::named("person_id")],
            rows: vec![
                RowData::Values(vec![10.into(), 1.into()]),
                RowData::Values(vec![11.into(), 1.into()]),
                RowData::Values(vec![12.into(), 2.into()]),
            ],
            pk: Some("order_id".into()),
            ..Default::default()
        };
        RowsetModel::new(RowsetConfig {
            params: Some("person_id=id".into()),
            ..RowsetConfig::with_rowset(rowset)
        })
    }

    #[test]
    fn test_master_detail_filter() {
        let master = people();
        let mut detail = orders();
        assert!(detail.rows().is_empty());
        assert!(!detail.can_add_rows());

        let one = master.lookup("id", &[1.into()]).unwrap();
        assert!(detail.set_master_selection(&master, &one).is_none());
        assert_eq!(detail.rows().len(), 2);
        assert_eq!(detail.filter_token().as_deref(), Some("[1]"));

        let all = master.all_rows().to_vec();
        detail.set_master_selection(&master, &all);
        assert_eq!(detail.rows().len(), 3);

        // New detail rows inherit the parameter value.
        detail.set_master_selection(&master, &one);
        let added = detail.add_row(None).unwrap();
        assert_eq!(detail.cell_val(added, "person_id"), Some(&Value::Int(1)));
        assert!(detail.rows().contains(&added));
    }

    #[test]
    fn test_master_changes_cascade() {
        let master = people();
        let mut detail = orders();
        let one = master.lookup("id", &[1.into()]).unwrap();
        detail.set_master_selection(&master, &one);

        assert_eq!(detail.master_val_changed("id", &1.into(), &7.into()), 2);
        assert_eq!(detail.rows().len(), 2);
        for &row in detail.rows() {
            assert_eq!(detail.cell_input_val(row, "person_id"), Some(&Value::Int(7)));
        }

        let n = detail.master_row_removed(&[("id".into(), 2.into())], true);
        assert_eq!(n, 1);
        assert_eq!(detail.changed_rows().len(), 3);
    }
}
