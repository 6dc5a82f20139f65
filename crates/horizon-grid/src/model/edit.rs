//! Edits: change brackets, cell writes, validation, insertion and removal.

use std::collections::HashSet;
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use horizon_grid_core::{GridError, Result};

use super::RowsetModel;
use super::save::SaveEffect;
use crate::changeset::RowData;
use crate::filter::ParamVals;
use crate::row::{RowFlag, RowId, Slot};
use crate::signals::NotifyKind;
use crate::store::{ERRORS, INPUT_VAL, VAL};
use crate::tree::Tree;
use crate::validate::{Errors, validate_cell};
use crate::value::Value;

/// How rows enter the rowset.
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Rows come from the store: they are not new and not dirty.
    pub from_server: bool,
    /// Rows come from user input.
    pub input: bool,
    /// Existing rows matched by primary key are updated in place, keeping
    /// pending edits.
    pub diff_merge: bool,
    /// Mark inserted and updated rows as merged.
    pub merged: bool,
    /// Parent row of inserted rows in a tree.
    pub parent: Option<RowId>,
    /// Position among the siblings (or the visible rows). Appends if unset.
    pub at: Option<usize>,
}

/// How rows leave the rowset.
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// The store already deleted the rows: drop them physically.
    pub from_server: bool,
    /// Toggle the removed mark instead of setting it.
    pub toggle: bool,
    /// The removal comes from user input.
    pub input: bool,
}

impl RowsetModel {
    // -------------------------------------------------------------------------
    // Change brackets
    // -------------------------------------------------------------------------

    pub(crate) fn begin_change(&mut self, row: RowId, input: bool) -> bool {
        self.store.begin_change(row, input)
    }

    /// Close a bracket; the outermost close publishes the coalesced changes.
    pub(crate) fn end_change(&mut self) {
        let Some(changes) = self.store.end_change() else {
            return;
        };
        tracing::trace!(
            target: targets::STORE,
            cells = changes.cells.len(),
            row_changes = changes.row_changes.len(),
            input = changes.input,
            "row state changed"
        );
        for change in changes.cells {
            self.signals.cell_state_changed.emit((changes.row, change));
        }
        for change in changes.row_changes {
            self.signals.row_state_changed.emit((changes.row, change));
        }
    }

    // -------------------------------------------------------------------------
    // Permissions
    // -------------------------------------------------------------------------

    pub fn can_add_rows(&self) -> bool {
        self.config.can_add_rows
            && self.rowset.as_ref().and_then(|rs| rs.can_add_rows) != Some(false)
            && self.param_vals != ParamVals::Unavailable
    }

    pub fn can_remove_rows(&self) -> bool {
        self.config.can_remove_rows
            && self.rowset.as_ref().and_then(|rs| rs.can_remove_rows) != Some(false)
    }

    pub fn can_change_rows(&self) -> bool {
        self.config.can_change_rows
            && self.rowset.as_ref().and_then(|rs| rs.can_change_rows) != Some(false)
    }

    /// Whether edits have somewhere to go: a server or an in-memory snapshot.
    pub fn can_save_changes(&self) -> bool {
        self.config.rowset_url.is_some() || self.config.static_rowset.is_some()
    }

    /// Whether a cell accepts user input.
    pub fn can_change_val(&self, row: RowId, col: &str) -> bool {
        let Some(field) = self.store.field(col) else {
            return false;
        };
        let Some(r) = self.store.row(row) else {
            return false;
        };
        self.can_change_rows()
            && r.can_change
            && !r.removed
            && !field.readonly
            && (r.is_new || !self.refs.pk_fi.contains(&field.val_index) || self.config.is_client_side())
    }

    /// Whether a row may be removed, notifying the user when it may not.
    pub fn can_remove_row(&self, row: RowId, input: bool) -> bool {
        let Some(r) = self.store.row(row) else {
            return false;
        };
        if !self.can_remove_rows() || !r.can_remove {
            if input {
                self.notify(NotifyKind::Error, "Row not removable");
            }
            return false;
        }
        if r.is_new && r.is_saving() {
            if input {
                self.notify(NotifyKind::Error, "Cannot remove a row that is being added to the server");
            }
            return false;
        }
        true
    }

    // -------------------------------------------------------------------------
    // Cell writes
    // -------------------------------------------------------------------------

    /// Write a pending value into a cell, validate it and update the dirty
    /// set. Returns `false` when nothing changed.
    ///
    /// Non-saving fields bypass the pending value and write the canonical
    /// one directly.
    pub fn set_cell_val(&mut self, row: RowId, col: &str, val: impl Into<Value>, input: bool) -> Result<bool> {
        let fi = self.require_field(col)?;
        self.require_row(row)?;
        Ok(self.set_cell_val_at(row, fi, val.into(), input))
    }

    pub(crate) fn set_cell_val_at(&mut self, row: RowId, fi: usize, val: Value, input: bool) -> bool {
        let Some(field) = self.store.field_at(fi) else {
            return false;
        };
        if input && field.readonly {
            return false;
        }
        if field.nosave {
            return self.reset_cell_val_at(row, fi, val, false);
        }
        let val = field.convert_val(val);
        let Some(cur_input) = self.store.cell_input_val(row, fi).cloned() else {
            return false;
        };
        if crate::value::compare_vals(&val, &cur_input).is_eq() {
            return false;
        }
        let errors = validate_cell(field, &val);
        let passed = errors.passed;
        let cur_val = self.store.cell_val(row, fi).cloned().unwrap_or_default();
        let cell_modified = crate::value::compare_vals(&val, &cur_val).is_ne();
        let row_modified = cell_modified || self.store.cells_modified(row, Some(fi));

        self.begin_change(row, input);
        self.store.set_cell_state(fi, INPUT_VAL, Slot::Val(val), Slot::Val(cur_val));
        self.store.set_cell_state(fi, ERRORS, Slot::Errors(errors), Slot::Undefined);
        self.store.set_row_errors(None);
        self.store.set_row_flag(RowFlag::Modified, row_modified);
        self.end_change();

        let pinned = self.store.row(row).is_some_and(|r| r.is_new || r.removed);
        if row_modified {
            self.row_changed(row);
        } else if !pinned {
            self.row_unchanged(row);
        }
        if passed && input && self.config.save_on_input {
            self.auto_save();
        }
        true
    }

    /// Write a canonical value, as if it came from the store.
    ///
    /// Under `diff_merge` a cell the user has not touched moves its pending
    /// value along; an edited cell keeps the edit.
    pub fn reset_cell_val(&mut self, row: RowId, col: &str, val: impl Into<Value>) -> Result<bool> {
        let fi = self.require_field(col)?;
        self.require_row(row)?;
        Ok(self.reset_cell_val_at(row, fi, val.into(), false))
    }

    pub(crate) fn reset_cell_val_at(&mut self, row: RowId, fi: usize, val: Value, diff_merge: bool) -> bool {
        let Some(field) = self.store.field_at(fi) else {
            return false;
        };
        let val = field.convert_val(val);
        let Some(old) = self.store.cell_val(row, fi).cloned() else {
            return false;
        };
        let was_modified = self.store.cell_modified(row, fi);

        let mut changed = false;
        self.begin_change(row, false);
        changed |= self.store.set_cell_state(fi, VAL, Slot::Val(val.clone()), Slot::Undefined);
        if !diff_merge || !was_modified {
            changed |= self
                .store
                .set_cell_state(fi, INPUT_VAL, Slot::Val(val.clone()), Slot::Val(old.clone()));
            if !diff_merge {
                changed |= self.store.set_cell_state(fi, ERRORS, Slot::Undefined, Slot::Undefined);
                changed |= self.store.set_row_errors(None);
            }
        }
        let modified = self.store.cells_modified(row, None);
        self.store.set_row_flag(RowFlag::Modified, modified);
        self.end_change();

        if let Some(r) = self.store.row(row) {
            if !modified && !r.is_new && !r.removed {
                self.row_unchanged(row);
            }
        }
        if crate::value::compare_vals(&old, &val).is_ne() {
            self.indices.get_mut().val_changed();
        }
        changed
    }

    /// Drop a cell's pending value.
    pub fn revert_cell(&mut self, row: RowId, col: &str) -> Result<bool> {
        let fi = self.require_field(col)?;
        let val = self.store.cell_val(row, fi).cloned().ok_or(GridError::UnknownRow)?;
        Ok(self.reset_cell_val_at(row, fi, val, false))
    }

    /// Drop every pending value of a row and its removed mark.
    pub fn revert_row(&mut self, row: RowId) -> Result<bool> {
        self.require_row(row)?;
        Ok(self.revert_row_at(row))
    }

    pub(crate) fn revert_row_at(&mut self, row: RowId) -> bool {
        let mut changed = false;
        self.begin_change(row, false);
        for fi in 0..self.store.field_count() {
            if let Some(val) = self.store.cell_val(row, fi).cloned() {
                changed |= self.reset_cell_val_at(row, fi, val, false);
            }
        }
        changed |= self.store.set_row_flag(RowFlag::Removed, false);
        self.end_change();
        if self.store.row(row).is_some_and(|r| !r.is_new) {
            self.row_unchanged(row);
        }
        changed
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Validate a row: every editable cell that is new or modified, then the
    /// row validators. A cached client-side result is returned as is; any
    /// edit of the row drops the cache.
    pub fn validate_row(&mut self, row: RowId) -> bool {
        let Some(r) = self.store.row(row) else {
            return false;
        };
        if let Some(errors) = r.errors.as_ref().filter(|e| e.client_side) {
            return errors.passed;
        }
        let is_new = r.is_new;

        let mut cell_errors = Vec::new();
        let mut passed = true;
        for (fi, field) in self.store.fields().iter().enumerate() {
            if field.readonly || !(is_new || self.store.cell_modified(row, fi)) {
                continue;
            }
            let val = self.store.cell_input_val(row, fi).cloned().unwrap_or_default();
            let errors = validate_cell(field, &val);
            passed &= errors.passed;
            cell_errors.push((fi, errors));
        }

        let mut row_errors = Errors::client();
        let validators: Vec<_> = self.row_validators.iter().map(Arc::clone).collect();
        for validator in validators {
            let ok = validator.validate(self, row);
            row_errors.add(ok, validator.message(self));
        }
        passed &= row_errors.passed;

        self.begin_change(row, false);
        for (fi, errors) in cell_errors {
            self.store.set_cell_state(fi, ERRORS, Slot::Errors(errors), Slot::Undefined);
        }
        let mut cached = row_errors;
        cached.passed = passed;
        self.store.set_row_errors(Some(cached));
        self.end_change();

        if !passed {
            tracing::debug!(target: targets::VALIDATE, "row failed validation");
        }
        passed
    }

    /// Failed messages of a row, optionally with its cells' as
    /// `"<label>: <message>"`.
    pub fn row_errors(&self, row: RowId, include_cells: bool) -> Vec<String> {
        let mut out = Vec::new();
        let Some(r) = self.store.row(row) else {
            return out;
        };
        if include_cells {
            for (fi, field) in self.store.fields().iter().enumerate() {
                if let Some(errors) = self.store.cell_errors(row, fi) {
                    out.extend(errors.messages().map(|m| format!("{}: {}", field.label, m)));
                }
            }
        }
        if let Some(errors) = r.errors() {
            out.extend(errors.messages().map(str::to_string));
        }
        out
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Insert rows, or update existing ones matched by primary key.
    ///
    /// Returns the number of rows inserted or updated.
    pub fn insert_rows(&mut self, rows: Vec<RowData>, opts: &InsertOptions) -> usize {
        if !opts.from_server && opts.input && !self.can_add_rows() {
            self.notify(NotifyKind::Error, "Adding rows not allowed");
            return 0;
        }
        let param_cols = self.param_cols();
        let mut added = Vec::new();
        let mut count = 0;
        let n = self.store.field_count();

        for data in rows {
            let mut vals: Vec<Option<Value>> = match data {
                RowData::Values(vals) => {
                    let mut vals: Vec<Option<Value>> = vals.into_iter().take(n).map(Some).collect();
                    vals.resize(n, None);
                    vals
                }
                RowData::Named(named) => {
                    let mut vals = vec![None; n];
                    for (col, val) in named {
                        match self.store.field_index(&col) {
                            Some(fi) => vals[fi] = Some(val),
                            None => tracing::warn!(target: targets::STORE, col = %col, "unknown column in inserted row"),
                        }
                    }
                    vals
                }
            };
            for (fi, val) in &param_cols {
                if vals[*fi].is_none() {
                    vals[*fi] = Some(val.clone());
                }
            }

            if let Some(row) = self.find_row(&vals) {
                for (fi, val) in vals.into_iter().enumerate() {
                    let Some(val) = val else {
                        continue;
                    };
                    if opts.from_server {
                        self.reset_cell_val_at(row, fi, val, opts.diff_merge);
                    } else {
                        self.set_cell_val_at(row, fi, val, opts.input);
                    }
                }
                if opts.merged {
                    self.set_merged(row, true);
                }
                count += 1;
                continue;
            }

            let parent = opts.parent.filter(|_| self.tree.is_active());
            if let (Some(id_fi), Some(parent_fi)) = (self.refs.id_fi, self.refs.parent_fi) {
                if self.tree.is_active() && vals[parent_fi].is_none() {
                    let pid = Tree::parent_id(&self.store, parent, id_fi);
                    vals[parent_fi] = Some(pid);
                }
            }
            let vals: Vec<Value> = self
                .store
                .fields()
                .iter()
                .zip(vals)
                .map(|(field, val)| {
                    let val = match val {
                        Some(val) => val,
                        None if opts.from_server => Value::Null,
                        None => field
                            .client_default
                            .as_ref()
                            .map(|d| d.produce())
                            .unwrap_or_else(|| field.default.clone()),
                    };
                    field.convert_val(val)
                })
                .collect();

            let row = self.store.insert_row(vals);
            if let Some(r) = self.store.row_mut(row) {
                r.is_new = !opts.from_server;
                r.merged = opts.merged;
            }
            self.indices.get_mut().row_added(&self.store, row);
            if self.tree.is_active() {
                let parent = parent.or_else(|| self.tree_parent_of(row));
                self.tree.attach(&mut self.store, row, parent);
                self.tree.init_parent_rows(&mut self.store, Some(row));
                let hidden = parent
                    .and_then(|p| self.store.row(p))
                    .is_some_and(|p| p.collapsed || p.parent_collapsed);
                if let Some(r) = self.store.row_mut(row) {
                    r.parent_collapsed = hidden;
                }
            }
            if !opts.from_server {
                self.row_changed(row);
            }
            added.push(row);
            count += 1;
        }

        if opts.input && !added.is_empty() {
            self.place_rows(&added, opts.at);
        }
        self.init_rows();
        if !added.is_empty() {
            tracing::debug!(target: targets::STORE, rows = added.len(), "rows added");
            self.signals.rows_added.emit(added.clone());
        }
        if opts.input && !added.is_empty() && self.config.save_on_add_row {
            self.auto_save();
        }
        count
    }

    /// Insert one empty user row and return it.
    pub fn add_row(&mut self, at: Option<usize>) -> Option<RowId> {
        let before = self.store.row_count();
        self.insert_rows(
            vec![RowData::Values(Vec::new())],
            &InsertOptions {
                input: true,
                at,
                ..Default::default()
            },
        );
        (self.store.row_count() > before)
            .then(|| self.store.all_rows().last().copied())
            .flatten()
    }

    /// Columns pre-filled from the current parameter values.
    fn param_cols(&self) -> Vec<(usize, Value)> {
        let ParamVals::Rows(rows) = &self.param_vals else {
            return Vec::new();
        };
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        first
            .iter()
            .filter_map(|(param, val)| Some((self.store.field_index(param)?, val.clone())))
            .collect()
    }

    /// Parent of a row by the parent id it carries.
    fn tree_parent_of(&self, row: RowId) -> Option<RowId> {
        let parent_fi = self.refs.parent_fi?;
        let id_col = self.refs.id_col.as_deref()?;
        let pid = self.store.cell_val(row, parent_fi)?;
        if pid.is_null() {
            return None;
        }
        self.lookup(id_col, std::slice::from_ref(pid))
            .ok()?
            .into_iter()
            .find(|&r| r != row)
    }

    /// Move freshly inserted user rows to position `at` of their sibling
    /// list (or of the visible rows), appending when unset, and renumber
    /// the position column.
    fn place_rows(&mut self, rows: &[RowId], at: Option<usize>) {
        let Some(&first) = rows.first() else {
            return;
        };
        if self.tree.is_active() {
            let parent = self.store.row(first).and_then(|r| r.parent_row);
            let mut order: Vec<RowId> = self
                .tree
                .siblings(&self.store, first)
                .iter()
                .copied()
                .filter(|r| !rows.contains(r))
                .collect();
            let at = at.unwrap_or(order.len()).min(order.len());
            order.splice(at..at, rows.iter().copied());
            self.tree.reorder_children(&mut self.store, parent, order);
            self.update_pos_field(Some(first));
        } else if let Some(pos_fi) = self.refs.pos_fi {
            let mut order: Vec<RowId> = self.rows.iter().copied().filter(|r| !rows.contains(r)).collect();
            let at = at.unwrap_or(order.len()).min(order.len());
            order.splice(at..at, rows.iter().copied());
            for (i, row) in order.into_iter().enumerate() {
                self.set_cell_val_at(row, pos_fi, Value::Int(i as i64 + 1), false);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Remove rows.
    ///
    /// New rows, rows of rowsets that cannot save, and rows the store
    /// already deleted are dropped physically with their subtrees. Other
    /// rows are marked removed until saved.
    pub fn remove_rows(&mut self, rows: &[RowId], opts: &RemoveOptions) -> bool {
        let physical_all = opts.from_server || !self.can_save_changes();
        let mut physical: Vec<RowId> = Vec::new();
        let mut marked: Vec<RowId> = Vec::new();
        for &row in rows {
            let Some(r) = self.store.row(row) else {
                continue;
            };
            if !opts.from_server && !self.can_remove_row(row, opts.input) {
                continue;
            }
            if physical_all || r.is_new {
                physical.push(row);
            } else {
                marked.push(row);
            }
        }
        if physical.is_empty() && marked.is_empty() {
            return false;
        }

        // A marked row takes its subtree along; new descendants are dropped.
        let mut seen: HashSet<RowId> = marked.iter().copied().collect();
        let mut marks = Vec::with_capacity(marked.len());
        for &row in &marked {
            let removed = !(opts.toggle && self.store.row(row).is_some_and(|r| r.removed));
            marks.push((row, removed));
            if !self.tree.is_active() {
                continue;
            }
            for child in Tree::each_child_row(&self.store, row) {
                if !seen.insert(child) {
                    continue;
                }
                match self.store.row(child) {
                    Some(c) if c.is_new => {
                        if removed {
                            physical.push(child);
                        }
                    }
                    Some(_) => marks.push((child, removed)),
                    None => {}
                }
            }
        }

        for &(row, removed) in &marks {
            self.begin_change(row, opts.input);
            self.store.set_row_flag(RowFlag::Removed, removed);
            self.end_change();
            if removed {
                self.row_changed(row);
            } else if !self.store.cells_modified(row, None) {
                self.row_unchanged(row);
            }
        }

        let mut dropped = Vec::new();
        if !physical.is_empty() {
            let mut gone: HashSet<RowId> = HashSet::new();
            for &row in &physical {
                for child in Tree::each_child_row(&self.store, row) {
                    gone.insert(child);
                }
                gone.insert(row);
            }
            for &row in &gone {
                if self.tree.is_active() {
                    self.tree.detach(&mut self.store, row);
                }
            }
            dropped = self
                .store
                .all_rows()
                .iter()
                .copied()
                .filter(|r| gone.contains(r))
                .collect();
            self.changed_rows.retain(|r| !gone.contains(r));
            self.store.remove_rows(&gone);
            self.indices.get_mut().row_removed();
            self.signals.changed_rows_changed.emit(self.changed_rows.len());
        }

        self.init_rows();
        if opts.input {
            self.update_pos_field(None);
        }
        if !dropped.is_empty() {
            tracing::debug!(target: targets::STORE, rows = dropped.len(), "rows removed");
            self.signals.rows_removed.emit(dropped);
        }
        if opts.input && !marked.is_empty() && self.config.save_on_remove_row {
            self.auto_save();
        }
        true
    }

    /// Physically remove rows the store no longer has.
    pub(crate) fn drop_rows(&mut self, rows: &[RowId]) {
        if !rows.is_empty() {
            self.remove_rows(
                rows,
                &RemoveOptions {
                    from_server: true,
                    ..Default::default()
                },
            );
        }
    }

    /// Toggle the removed mark of rows.
    pub fn toggle_remove_rows(&mut self, rows: &[RowId]) -> bool {
        self.remove_rows(
            rows,
            &RemoveOptions {
                toggle: true,
                input: true,
                ..Default::default()
            },
        )
    }

    // -------------------------------------------------------------------------
    // Tree edits
    // -------------------------------------------------------------------------

    /// Move a row (with its subtree) under another parent, or to the roots.
    /// Moves that would close a cycle are refused.
    pub fn change_row_parent(&mut self, row: RowId, parent: Option<RowId>) -> Result<bool> {
        self.require_row(row)?;
        if let Some(parent) = parent {
            self.require_row(parent)?;
        }
        if !self.tree.is_active() {
            return Err(GridError::NotAllowed("rowset is not a tree"));
        }
        if Tree::would_cycle(&self.store, row, parent) {
            tracing::debug!(target: targets::TREE, "reparent refused: cycle");
            return Ok(false);
        }
        if self.store.row(row).and_then(|r| r.parent_row) == parent {
            return Ok(false);
        }
        if !self.tree.reparent(&mut self.store, row, parent) {
            return Ok(false);
        }
        if let (Some(id_fi), Some(parent_fi)) = (self.refs.id_fi, self.refs.parent_fi) {
            let pid = Tree::parent_id(&self.store, parent, id_fi);
            self.set_cell_val_at(row, parent_fi, pid, false);
        }
        self.init_rows();
        self.update_pos_field(Some(row));
        Ok(true)
    }

    /// Collapse or expand one row (or every root when `None`).
    pub fn set_collapsed(&mut self, row: Option<RowId>, collapsed: bool, recursive: bool) {
        if !self.tree.is_active() {
            return;
        }
        self.tree.set_collapsed(&mut self.store, row, collapsed, recursive);
        self.init_rows();
    }

    /// Collapse or expand the whole tree.
    pub fn set_collapsed_all(&mut self, collapsed: bool) {
        self.set_collapsed(None, collapsed, true);
    }

    pub fn toggle_collapsed(&mut self, row: RowId, recursive: bool) {
        let Some(collapsed) = self.store.row(row).map(|r| r.collapsed) else {
            return;
        };
        self.set_collapsed(Some(row), !collapsed, recursive);
    }

    /// Renumber the position column 1..n over the sibling list of `row`
    /// (or over the visible rows of a flat rowset).
    pub(crate) fn update_pos_field(&mut self, row: Option<RowId>) {
        let Some(pos_fi) = self.refs.pos_fi else {
            return;
        };
        let rows: Vec<RowId> = match row {
            Some(row) if self.tree.is_active() => self.tree.siblings(&self.store, row).to_vec(),
            None if self.tree.is_active() => self.tree.root_rows().to_vec(),
            _ => self.rows.clone(),
        };
        let mut changed = false;
        let mut pos: i64 = 0;
        for row in rows {
            if self.store.row(row).is_none_or(|r| r.removed) {
                continue;
            }
            pos += 1;
            changed |= self.set_cell_val_at(row, pos_fi, Value::Int(pos), false);
        }
        if changed {
            tracing::trace!(target: targets::SORT, "positions renumbered");
        }
    }

    // -------------------------------------------------------------------------
    // Dirty set
    // -------------------------------------------------------------------------

    /// Add a row to the dirty set. Rows of non-saving rowsets are ignored.
    pub(crate) fn row_changed(&mut self, row: RowId) {
        if self.store.row(row).is_none_or(|r| r.nosave) {
            return;
        }
        if !self.changed_rows.contains(&row) {
            self.changed_rows.push(row);
            self.signals.changed_rows_changed.emit(self.changed_rows.len());
        }
    }

    pub(crate) fn row_unchanged(&mut self, row: RowId) {
        if let Some(i) = self.changed_rows.iter().position(|&r| r == row) {
            self.changed_rows.remove(i);
            self.signals.changed_rows_changed.emit(self.changed_rows.len());
        }
    }

    fn set_merged(&mut self, row: RowId, merged: bool) {
        self.begin_change(row, false);
        self.store.set_row_flag(RowFlag::Merged, merged);
        self.end_change();
    }

    /// The user left a row: save it when it has pending changes.
    pub fn exit_row(&mut self, row: RowId) -> Option<SaveEffect> {
        if !self.config.save_on_exit_row || !self.changed_rows.contains(&row) {
            return None;
        }
        Some(self.auto_save())
    }

    /// Save on behalf of an auto-save setting. Requests are queued for
    /// [`take_pending_saves`](Self::take_pending_saves).
    pub(crate) fn auto_save(&mut self) -> SaveEffect {
        let effect = self.save();
        if let SaveEffect::Submit(pending) = &effect {
            self.outbox.push(pending.clone());
        }
        tracing::trace!(target: targets::SAVE, ?effect, "auto save");
        effect
    }
}
