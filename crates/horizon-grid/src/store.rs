//! Row store.
//!
//! [`RowStore`] owns the resolved fields and every row in load order. It
//! maintains the slot layout described in [`crate::row`] as fields come and
//! go and as state keys are allocated, and it collects state writes made
//! inside a `begin_change` / `end_change` bracket into one [`StateChanges`]
//! record.

use std::collections::{HashMap, HashSet};

use horizon_grid_core::logging::targets;
use slotmap::SlotMap;

use crate::field::Field;
use crate::row::{Row, RowFlag, RowId, Slot};
use crate::validate::Errors;
use crate::value::Value;

/// State key addressing the canonical value slot.
pub const VAL: &str = "val";
/// State key of the pending (user-entered) value.
pub const INPUT_VAL: &str = "input_val";
/// State key of the cell validation result.
pub const ERRORS: &str = "errors";

/// One coalesced cell state write.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub field: String,
    pub key: String,
    pub value: Slot,
    pub old: Slot,
}

/// One coalesced row state write.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Flag { flag: RowFlag, value: bool, old: bool },
    Errors,
}

/// Everything that changed on one row during an outermost change bracket.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanges {
    pub row: RowId,
    pub cells: Vec<CellChange>,
    pub row_changes: Vec<RowChange>,
    /// The edit came from user input.
    pub input: bool,
}

impl StateChanges {
    fn new(row: RowId, input: bool) -> Self {
        Self {
            row,
            cells: Vec::new(),
            row_changes: Vec::new(),
            input,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.row_changes.is_empty()
    }

    /// A canonical or pending value changed.
    pub fn vals_changed(&self) -> bool {
        self.cells.iter().any(|c| c.key == VAL || c.key == INPUT_VAL)
    }

    pub fn errors_changed(&self) -> bool {
        self.cells.iter().any(|c| c.key == ERRORS)
            || self.row_changes.iter().any(|c| matches!(c, RowChange::Errors))
    }

    pub fn flag_changed(&self, flag: RowFlag) -> bool {
        self.row_changes
            .iter()
            .any(|c| matches!(c, RowChange::Flag { flag: f, .. } if *f == flag))
    }

    fn record_cell(&mut self, field: &str, key: &str, value: Slot, old: Slot) {
        match self
            .cells
            .iter_mut()
            .find(|c| c.field == field && c.key == key)
        {
            Some(change) => change.value = value,
            None => self.cells.push(CellChange {
                field: field.to_string(),
                key: key.to_string(),
                value,
                old,
            }),
        }
    }

    fn record_flag(&mut self, flag: RowFlag, value: bool, old: bool) {
        for change in &mut self.row_changes {
            if let RowChange::Flag { flag: f, value: v, .. } = change {
                if *f == flag {
                    *v = value;
                    return;
                }
            }
        }
        self.row_changes.push(RowChange::Flag { flag, value, old });
    }
}

struct Batch {
    depth: usize,
    changes: StateChanges,
}

/// Fields plus rows in load order.
pub struct RowStore {
    fields: Vec<Field>,
    field_map: HashMap<String, usize>,
    rows: SlotMap<RowId, Row>,
    all_rows: Vec<RowId>,
    state_keys: HashMap<String, usize>,
    next_key_index: usize,
    batch: Option<Batch>,
}

impl Default for RowStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RowStore {
    pub fn new(fields: Vec<Field>) -> Self {
        let mut store = Self {
            fields: Vec::new(),
            field_map: HashMap::new(),
            rows: SlotMap::with_key(),
            all_rows: Vec::new(),
            state_keys: HashMap::new(),
            next_key_index: 0,
            batch: None,
        };
        store.set_fields(fields);
        store
    }

    /// Replace the schema, dropping every row.
    ///
    /// Allocated state keys survive: key indices are never reused.
    pub fn set_fields(&mut self, fields: Vec<Field>) {
        self.rows.clear();
        self.all_rows.clear();
        self.batch = None;
        self.fields = fields;
        self.reindex_fields();
    }

    fn reindex_fields(&mut self) {
        self.field_map.clear();
        for (fi, field) in self.fields.iter_mut().enumerate() {
            field.val_index = fi;
            self.field_map.insert(field.name.clone(), fi);
        }
    }

    // -------------------------------------------------------------------------
    // Fields
    // -------------------------------------------------------------------------

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, col: &str) -> Option<&Field> {
        self.field_map.get(col).map(|&fi| &self.fields[fi])
    }

    pub fn field_at(&self, fi: usize) -> Option<&Field> {
        self.fields.get(fi)
    }

    pub(crate) fn field_at_mut(&mut self, fi: usize) -> Option<&mut Field> {
        self.fields.get_mut(fi)
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.iter_mut()
    }

    pub fn field_index(&self, col: &str) -> Option<usize> {
        self.field_map.get(col).copied()
    }

    /// Resolve a space-separated column list. `None` unless every column exists.
    pub fn field_indices(&self, cols: &str) -> Option<Vec<usize>> {
        let indices: Option<Vec<usize>> =
            cols.split_whitespace().map(|c| self.field_index(c)).collect();
        indices.filter(|v| !v.is_empty())
    }

    /// Append a field, widening every row: one value slot at the end of the
    /// value area, then one slot at the end of every state block.
    pub fn add_field(&mut self, mut field: Field) -> usize {
        let fi = self.fields.len();
        field.val_index = fi;
        self.field_map.insert(field.name.clone(), fi);
        self.fields.push(field);

        let fn_new = fi + 1;
        let keys = self.state_key_count();
        for row in self.rows.values_mut() {
            row.slots.insert(fi, Slot::Val(Value::Null));
            // Block k now starts at fn_new + 1 + k * fn_new; its new slot is its last.
            for k in 0..keys {
                row.slots.insert(2 * fn_new + k * fn_new, Slot::Undefined);
            }
        }
        tracing::debug!(target: targets::STORE, field = fi, "field added");
        fi
    }

    /// Remove a field and its slot from every state block of every row.
    pub fn remove_field(&mut self, fi: usize) -> Option<Field> {
        if fi >= self.fields.len() {
            return None;
        }
        let field = self.fields.remove(fi);
        self.reindex_fields();

        let fn_new = self.fields.len();
        for row in self.rows.values_mut() {
            row.slots.remove(fi);
            let mut i = fn_new + 1 + fi;
            while i < row.slots.len() {
                row.slots.remove(i);
                i += fn_new;
            }
        }
        tracing::debug!(target: targets::STORE, field = %field.name, "field removed");
        Some(field)
    }

    // -------------------------------------------------------------------------
    // Layout
    // -------------------------------------------------------------------------

    /// Number of state keys allocated so far.
    pub fn state_key_count(&self) -> usize {
        self.next_key_index
    }

    /// Slot count every row has.
    pub fn row_width(&self) -> usize {
        let n = self.fields.len();
        n + 1 + self.next_key_index * n
    }

    fn allocate_key(&mut self, key: &str) -> usize {
        if let Some(&ki) = self.state_keys.get(key) {
            return ki;
        }
        let ki = self.next_key_index;
        self.next_key_index += 1;
        self.state_keys.insert(key.to_string(), ki);
        let width = self.row_width();
        for row in self.rows.values_mut() {
            row.slots.resize(width, Slot::Undefined);
        }
        tracing::trace!(target: targets::STORE, key, index = ki, "state key allocated");
        ki
    }

    fn slot_index(&self, fi: usize, key: &str) -> Option<usize> {
        if key == VAL {
            return Some(fi);
        }
        let n = self.fields.len();
        self.state_keys.get(key).map(|&ki| n + 1 + ki * n + fi)
    }

    // -------------------------------------------------------------------------
    // Rows
    // -------------------------------------------------------------------------

    /// Create a row from positional values and append it to the load order.
    pub fn insert_row(&mut self, vals: Vec<Value>) -> RowId {
        let n = self.fields.len();
        let mut slots: Vec<Slot> = vals.into_iter().take(n).map(Slot::Val).collect();
        slots.resize(n, Slot::Val(Value::Null));
        slots.resize(self.row_width(), Slot::Undefined);
        let id = self.rows.insert(Row::new(slots));
        self.all_rows.push(id);
        id
    }

    /// Drop rows from storage and from the load order.
    pub fn remove_rows(&mut self, ids: &HashSet<RowId>) -> usize {
        let mut removed = 0;
        for &id in ids {
            if self.rows.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.all_rows.retain(|id| !ids.contains(id));
        }
        removed
    }

    pub fn clear_rows(&mut self) {
        self.rows.clear();
        self.all_rows.clear();
        self.batch = None;
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.get(id)
    }

    pub(crate) fn row_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.get_mut(id)
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.rows.contains_key(id)
    }

    /// All rows in load order.
    pub fn all_rows(&self) -> &[RowId] {
        &self.all_rows
    }

    pub fn row_count(&self) -> usize {
        self.all_rows.len()
    }

    // -------------------------------------------------------------------------
    // Cell access
    // -------------------------------------------------------------------------

    pub fn cell_val(&self, id: RowId, fi: usize) -> Option<&Value> {
        if fi >= self.fields.len() {
            return None;
        }
        self.rows.get(id)?.slots.get(fi)?.as_val()
    }

    pub fn cell_state(&self, id: RowId, fi: usize, key: &str) -> Option<&Slot> {
        if fi >= self.fields.len() {
            return None;
        }
        let si = self.slot_index(fi, key)?;
        self.rows.get(id)?.slots.get(si)
    }

    /// The pending value, or the canonical one when nothing is pending.
    pub fn cell_input_val(&self, id: RowId, fi: usize) -> Option<&Value> {
        match self.cell_state(id, fi, INPUT_VAL).and_then(Slot::as_val) {
            Some(v) => Some(v),
            None => self.cell_val(id, fi),
        }
    }

    pub fn cell_errors(&self, id: RowId, fi: usize) -> Option<&Errors> {
        self.cell_state(id, fi, ERRORS).and_then(Slot::as_errors)
    }

    pub fn cell_modified(&self, id: RowId, fi: usize) -> bool {
        match (self.cell_input_val(id, fi), self.cell_val(id, fi)) {
            (Some(input), Some(val)) => crate::value::compare_vals(input, val).is_ne(),
            _ => false,
        }
    }

    pub fn cells_modified(&self, id: RowId, exclude: Option<usize>) -> bool {
        (0..self.fields.len())
            .filter(|&fi| Some(fi) != exclude)
            .any(|fi| self.cell_modified(id, fi))
    }

    /// Position in the visible sequence, stored in the reserved slot.
    pub fn row_index(&self, id: RowId) -> Option<usize> {
        match self.rows.get(id)?.slots.get(self.fields.len())? {
            Slot::Index(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn set_row_index(&mut self, id: RowId, index: Option<usize>) {
        let n = self.fields.len();
        if let Some(slot) = self.rows.get_mut(id).and_then(|r| r.slots.get_mut(n)) {
            *slot = index.map_or(Slot::Undefined, Slot::Index);
        }
    }

    // -------------------------------------------------------------------------
    // Change brackets
    // -------------------------------------------------------------------------

    /// Open a change bracket on `row`. Nested calls only bump a counter.
    ///
    /// Returns `true` for the outermost bracket.
    pub fn begin_change(&mut self, row: RowId, input: bool) -> bool {
        if let Some(batch) = self.batch.as_mut() {
            batch.depth += 1;
            return false;
        }
        self.batch = Some(Batch {
            depth: 1,
            changes: StateChanges::new(row, input),
        });
        true
    }

    /// Close a bracket. The outermost close returns the coalesced changes,
    /// or `None` if nothing changed.
    pub fn end_change(&mut self) -> Option<StateChanges> {
        let batch = self.batch.as_mut()?;
        if batch.depth > 1 {
            batch.depth -= 1;
            return None;
        }
        let batch = self.batch.take()?;
        (!batch.changes.is_empty()).then_some(batch.changes)
    }

    pub fn in_change(&self) -> bool {
        self.batch.is_some()
    }

    /// The row the open bracket applies to.
    pub fn change_row(&self) -> Option<RowId> {
        self.batch.as_ref().map(|b| b.changes.row)
    }

    /// Write one cell state slot of the bracketed row.
    ///
    /// An undefined slot reads as `default`. Writing a value equal to the
    /// current one is a no-op and returns `false`.
    pub fn set_cell_state(&mut self, fi: usize, key: &str, val: Slot, default: Slot) -> bool {
        let Some(row) = self.change_row() else {
            tracing::warn!(target: targets::STORE, key, "cell state written outside a change bracket");
            return false;
        };
        if fi >= self.fields.len() || !self.rows.contains_key(row) {
            return false;
        }
        let si = match key {
            VAL => fi,
            _ => {
                let ki = self.allocate_key(key);
                self.fields.len() + 1 + ki * self.fields.len() + fi
            }
        };
        let slot = &mut self.rows[row].slots[si];
        let old = if slot.is_undefined() { default } else { slot.clone() };
        if old == val {
            return false;
        }
        *slot = val.clone();
        let field = self.fields[fi].name.clone();
        if let Some(batch) = self.batch.as_mut() {
            batch.changes.record_cell(&field, key, val, old);
        }
        true
    }

    pub fn set_row_flag(&mut self, flag: RowFlag, val: bool) -> bool {
        let Some(row) = self.change_row() else {
            return false;
        };
        let Some(r) = self.rows.get_mut(row) else {
            return false;
        };
        let slot = r.flag_mut(flag);
        let old = *slot;
        if old == val {
            return false;
        }
        *slot = val;
        if let Some(batch) = self.batch.as_mut() {
            batch.changes.record_flag(flag, val, old);
        }
        true
    }

    pub fn set_row_errors(&mut self, errors: Option<Errors>) -> bool {
        let Some(row) = self.change_row() else {
            return false;
        };
        let Some(r) = self.rows.get_mut(row) else {
            return false;
        };
        if r.errors == errors {
            return false;
        }
        r.errors = errors;
        if let Some(batch) = self.batch.as_mut() {
            if !batch.changes.row_changes.contains(&RowChange::Errors) {
                batch.changes.row_changes.push(RowChange::Errors);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(names: &[&str]) -> RowStore {
        RowStore::new(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| Field::new(*n, i))
                .collect(),
        )
    }

    fn assert_layout(store: &RowStore) {
        let width = store.field_count() + 1 + store.state_key_count() * store.field_count();
        for &id in store.all_rows() {
            assert_eq!(store.row(id).unwrap().len(), width);
        }
    }

    fn set_input(store: &mut RowStore, row: RowId, fi: usize, v: Value) {
        store.begin_change(row, false);
        let cur = store.cell_val(row, fi).cloned().unwrap_or_default();
        store.set_cell_state(fi, INPUT_VAL, Slot::Val(v), Slot::Val(cur));
        store.end_change();
    }

    #[test]
    fn test_row_length_tracks_fields_and_keys() {
        let mut store = store(&["a", "b"]);
        let r1 = store.insert_row(vec![1.into(), "x".into()]);
        assert_layout(&store);

        set_input(&mut store, r1, 1, "y".into());
        assert_eq!(store.state_key_count(), 1);
        let r2 = store.insert_row(vec![2.into()]);
        assert_layout(&store);
        assert_eq!(store.cell_val(r2, 1), Some(&Value::Null));

        store.add_field(Field::new("c", 0));
        assert_layout(&store);
        assert_eq!(store.cell_input_val(r1, 1), Some(&Value::from("y")));
        assert_eq!(store.cell_input_val(r1, 0), Some(&Value::Int(1)));

        store.remove_field(0);
        assert_layout(&store);
        assert_eq!(store.field_index("b"), Some(0));
        assert_eq!(store.cell_input_val(r1, 0), Some(&Value::from("y")));
        assert_eq!(store.cell_val(r1, 0), Some(&Value::from("x")));
    }

    #[test]
    fn test_first_field_widens_existing_rows() {
        let mut store = store(&[]);
        let row = store.insert_row(Vec::new());
        assert_layout(&store);

        assert_eq!(store.add_field(Field::new("a", 0)), 0);
        assert_layout(&store);
        assert_eq!(store.cell_val(row, 0), Some(&Value::Null));

        set_input(&mut store, row, 0, 5.into());
        store.add_field(Field::new("b", 0));
        assert_layout(&store);
        assert_eq!(store.cell_input_val(row, 0), Some(&Value::Int(5)));
        assert_eq!(store.cell_state(row, 1, INPUT_VAL), Some(&Slot::Undefined));
    }

    #[test]
    fn test_remove_and_readd_field_restores_val_index() {
        let mut store = store(&["a", "b", "c"]);
        let row = store.insert_row(vec![1.into(), 2.into(), 3.into()]);
        set_input(&mut store, row, 0, 10.into());

        let c = store.remove_field(2).unwrap();
        let fi = store.add_field(c);
        assert_eq!(fi, 2);
        let indices: Vec<usize> = store.fields().iter().map(|f| f.val_index).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(store.cell_input_val(row, 0), Some(&Value::Int(10)));
        assert_eq!(store.cell_state(row, 2, INPUT_VAL), Some(&Slot::Undefined));
        assert_layout(&store);
    }

    #[test]
    fn test_nested_brackets_coalesce() {
        let mut store = store(&["a"]);
        let row = store.insert_row(vec![1.into()]);

        assert!(store.begin_change(row, false));
        assert!(!store.begin_change(row, false));
        store.set_cell_state(0, INPUT_VAL, Slot::Val(2.into()), Slot::Val(1.into()));
        store.set_cell_state(0, INPUT_VAL, Slot::Val(3.into()), Slot::Val(1.into()));
        store.set_row_flag(RowFlag::Modified, true);
        assert!(store.end_change().is_none());
        assert!(store.in_change());

        let changes = store.end_change().unwrap();
        assert!(!store.in_change());
        assert_eq!(changes.cells.len(), 1);
        assert_eq!(changes.cells[0].value, Slot::Val(3.into()));
        assert_eq!(changes.cells[0].old, Slot::Val(1.into()));
        assert!(changes.vals_changed());
        assert!(changes.flag_changed(RowFlag::Modified));
    }

    #[test]
    fn test_unchanged_write_is_noop() {
        let mut store = store(&["a"]);
        let row = store.insert_row(vec![1.into()]);
        store.begin_change(row, false);
        assert!(!store.set_cell_state(0, INPUT_VAL, Slot::Val(1.into()), Slot::Val(1.into())));
        assert!(!store.set_row_flag(RowFlag::Modified, false));
        assert!(store.end_change().is_none());
        assert!(!store.cell_modified(row, 0));
    }

    #[test]
    fn test_key_indices_are_never_reused() {
        let mut store = store(&["a"]);
        let row = store.insert_row(vec![1.into()]);
        store.begin_change(row, false);
        store.set_cell_state(0, INPUT_VAL, Slot::Val(2.into()), Slot::Undefined);
        store.set_cell_state(0, "custom", Slot::Val(true.into()), Slot::Undefined);
        store.end_change();
        store.set_fields(vec![Field::new("x", 0), Field::new("y", 1)]);
        assert_eq!(store.state_key_count(), 2);
        let row = store.insert_row(vec![]);
        assert_eq!(store.row(row).unwrap().len(), 2 + 1 + 2 * 2);
    }
}
