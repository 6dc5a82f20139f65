//! The rowset engine.
//!
//! [`RowsetModel`] ties the pieces together: it resolves fields from a
//! snapshot, fills the [`RowStore`], derives the tree and the visible row
//! sequence, tracks edits in a dirty set and drives the save and reload
//! state machines. Network I/O is not done here: saving and loading produce
//! request descriptions ([`PendingSave`], [`LoadTicket`]) that a transport
//! executes, reporting back through [`RowsetModel::finish_save`] and
//! [`RowsetModel::finish_load`].
//!
//! The implementation is split by concern:
//!
//! - `edit`: change brackets, cell writes, validation, insert and remove
//! - `view`: sorting, filtering, master/detail parameters, collapse state
//! - `save`: packing, result application, serialization, diff-merge, reload

mod edit;
mod save;
mod view;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use horizon_grid_core::{GridError, Result};
use parking_lot::Mutex;

use crate::changeset::{RowData, Rowset};
use crate::config::RowsetConfig;
use crate::field::{ClientDefault, ConvertFn, Field, FieldAttrs};
use crate::filter::{ParamMap, ParamVals, RowFilter};
use crate::index::{GroupOptions, IndexCache, RowGroup, row_groups};
use crate::row::{Row, RowId, SaveRequestId};
use crate::shared::SharedRowsets;
use crate::signals::{Notification, NotifyKind, RowsetSignals};
use crate::sort::OrderBy;
use crate::store::RowStore;
use crate::tree::{Tree, TreeBuild};
use crate::validate::{
    CellValidator, Errors, LookupSource, LookupValidator, RowValidator, UniqueKeyValidator,
    init_field_validators,
};
use crate::value::Value;

pub use edit::{InsertOptions, RemoveOptions};
pub use save::{
    LoadTicket, PendingSave, ReloadDecision, ReloadOptions, SaveEffect, TransportFailure,
};

/// Host-supplied behaviour attached to a column by name. Survives schema
/// rebinding.
#[derive(Clone, Default)]
struct FieldHooks {
    validators: Vec<Arc<dyn CellValidator>>,
    convert: Option<ConvertFn>,
    client_default: Option<ClientDefault>,
}

/// Resolved column references.
#[derive(Debug, Clone, Default)]
struct ColumnRefs {
    pk: Option<String>,
    pk_fi: Vec<usize>,
    id_col: Option<String>,
    parent_col: Option<String>,
    id_fi: Option<usize>,
    parent_fi: Option<usize>,
    pos_fi: Option<usize>,
    tree_fi: Option<usize>,
    name_fi: Option<usize>,
    val_fi: Option<usize>,
}

/// In-memory tabular data engine backing one grid, list or dropdown.
pub struct RowsetModel {
    config: RowsetConfig,
    rowset: Option<Rowset>,
    store: RowStore,
    indices: Mutex<IndexCache>,
    tree: Tree,
    tree_build: Option<TreeBuild>,
    refs: ColumnRefs,
    hooks: HashMap<String, FieldHooks>,
    lookup_sources: HashMap<String, LookupSource>,
    row_validators: Vec<Arc<dyn RowValidator>>,
    custom_row_validators: Vec<Arc<dyn RowValidator>>,

    order_by: OrderBy,
    param_map: ParamMap,
    param_vals: ParamVals,
    filter: RowFilter,
    rows: Vec<RowId>,

    changed_rows: Vec<RowId>,
    saves: HashMap<SaveRequestId, Vec<RowId>>,
    outbox: Vec<PendingSave>,
    update_ids: HashSet<String>,
    load: Option<LoadTicket>,
    next_request: u64,
    ready: bool,

    signals: RowsetSignals,
}

impl RowsetModel {
    /// Create an engine and bind it to the configured static rowset, if any.
    pub fn new(config: RowsetConfig) -> Self {
        let order_by = match config.order_by.as_deref().map(OrderBy::parse).transpose() {
            Ok(order_by) => order_by.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(target: targets::SORT, %err, "ignoring order_by");
                OrderBy::default()
            }
        };
        let param_map = ParamMap::parse(config.params.as_deref().unwrap_or_default());
        let param_vals = if param_map.is_empty() {
            ParamVals::Unbound
        } else {
            ParamVals::Unavailable
        };
        let mut model = Self {
            rowset: config.static_rowset.clone(),
            config,
            store: RowStore::default(),
            indices: Mutex::new(IndexCache::default()),
            tree: Tree::default(),
            tree_build: None,
            refs: ColumnRefs::default(),
            hooks: HashMap::new(),
            lookup_sources: HashMap::new(),
            row_validators: Vec::new(),
            custom_row_validators: Vec::new(),
            order_by,
            param_map,
            param_vals,
            filter: RowFilter::default(),
            rows: Vec::new(),
            changed_rows: Vec::new(),
            saves: HashMap::new(),
            outbox: Vec::new(),
            update_ids: HashSet::new(),
            load: None,
            next_request: 0,
            ready: false,
            signals: RowsetSignals::new(),
        };
        if model.rowset.is_some() {
            model.reset();
        }
        model
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &RowsetConfig {
        &self.config
    }

    pub fn signals(&self) -> &RowsetSignals {
        &self.signals
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    /// The snapshot the engine is currently bound to.
    pub fn rowset(&self) -> Option<&Rowset> {
        self.rowset.as_ref()
    }

    /// Whether a snapshot has been bound.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn fields(&self) -> &[Field] {
        self.store.fields()
    }

    pub fn field(&self, col: &str) -> Option<&Field> {
        self.store.field(col)
    }

    pub fn field_index(&self, col: &str) -> Option<usize> {
        self.store.field_index(col)
    }

    fn require_field(&self, col: &str) -> Result<usize> {
        self.store
            .field_index(col)
            .ok_or_else(|| GridError::UnknownColumn(col.to_string()))
    }

    fn require_row(&self, row: RowId) -> Result<&Row> {
        self.store.row(row).ok_or(GridError::UnknownRow)
    }

    /// Visible rows in display order.
    pub fn rows(&self) -> &[RowId] {
        &self.rows
    }

    /// All rows in load order, including filtered and collapsed ones.
    pub fn all_rows(&self) -> &[RowId] {
        self.store.all_rows()
    }

    pub fn row_count(&self) -> usize {
        self.store.row_count()
    }

    pub fn row(&self, row: RowId) -> Option<&Row> {
        self.store.row(row)
    }

    /// Position of a row in the visible sequence.
    pub fn row_index(&self, row: RowId) -> Option<usize> {
        self.store.row_index(row)
    }

    /// Space-separated primary-key columns.
    pub fn pk(&self) -> Option<&str> {
        self.refs.pk.as_deref()
    }

    pub fn pk_fields(&self) -> impl Iterator<Item = &Field> {
        self.refs.pk_fi.iter().filter_map(|&fi| self.store.field_at(fi))
    }

    pub fn id_col(&self) -> Option<&str> {
        self.refs.id_col.as_deref()
    }

    pub fn parent_col(&self) -> Option<&str> {
        self.refs.parent_col.as_deref()
    }

    pub fn pos_field(&self) -> Option<&Field> {
        self.refs.pos_fi.and_then(|fi| self.store.field_at(fi))
    }

    /// Column the tree is drawn in. Display only.
    pub fn tree_field(&self) -> Option<&Field> {
        self.refs.tree_fi.and_then(|fi| self.store.field_at(fi))
    }

    pub fn name_field(&self) -> Option<&Field> {
        self.refs.name_fi.and_then(|fi| self.store.field_at(fi))
    }

    pub fn val_field(&self) -> Option<&Field> {
        self.refs.val_fi.and_then(|fi| self.store.field_at(fi))
    }

    pub fn is_tree(&self) -> bool {
        self.tree.is_active()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Outcome of the last tree build, `None` when no tree is configured.
    pub fn tree_build(&self) -> Option<TreeBuild> {
        self.tree_build
    }

    /// Rows with unsaved modifications, in the order they became dirty.
    pub fn changed_rows(&self) -> &[RowId] {
        &self.changed_rows
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_rows.is_empty()
    }

    // -------------------------------------------------------------------------
    // Cells
    // -------------------------------------------------------------------------

    pub fn cell_val(&self, row: RowId, col: &str) -> Option<&Value> {
        self.store.cell_val(row, self.store.field_index(col)?)
    }

    pub fn cell_input_val(&self, row: RowId, col: &str) -> Option<&Value> {
        self.store.cell_input_val(row, self.store.field_index(col)?)
    }

    pub fn cell_errors(&self, row: RowId, col: &str) -> Option<&Errors> {
        self.store.cell_errors(row, self.store.field_index(col)?)
    }

    pub fn cell_modified(&self, row: RowId, col: &str) -> bool {
        self.store
            .field_index(col)
            .is_some_and(|fi| self.store.cell_modified(row, fi))
    }

    /// Canonical values of a space-separated column list.
    pub fn cell_vals(&self, row: RowId, cols: &str) -> Option<Vec<Value>> {
        self.store
            .field_indices(cols)?
            .into_iter()
            .map(|fi| self.store.cell_val(row, fi).cloned())
            .collect()
    }

    /// Pending values of a space-separated column list.
    pub fn cell_input_vals(&self, row: RowId, cols: &str) -> Option<Vec<Value>> {
        self.store
            .field_indices(cols)?
            .into_iter()
            .map(|fi| self.store.cell_input_val(row, fi).cloned())
            .collect()
    }

    /// Display text of a row: its name column, else its primary key.
    pub fn row_label(&self, row: RowId) -> String {
        let fis: Vec<usize> = match self.refs.name_fi {
            Some(fi) => vec![fi],
            None => self.refs.pk_fi.clone(),
        };
        fis.iter()
            .filter_map(|&fi| {
                let field = self.store.field_at(fi)?;
                Some(field.to_text(self.store.cell_input_val(row, fi)?))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    // -------------------------------------------------------------------------
    // Indices
    // -------------------------------------------------------------------------

    /// Rows whose canonical values of `cols` equal `vals`.
    pub fn lookup(&self, cols: &str, vals: &[Value]) -> Result<Vec<RowId>> {
        self.indices.lock().lookup(&self.store, cols, vals)
    }

    /// The row whose value column holds `val`.
    pub fn lookup_val(&self, val: &Value) -> Option<RowId> {
        let field = self.val_field()?;
        self.lookup(&field.name, std::slice::from_ref(val))
            .ok()?
            .first()
            .copied()
    }

    /// Group rows by one or more levels of columns.
    pub fn row_groups(&self, opts: &GroupOptions) -> Result<Vec<RowGroup>> {
        row_groups(&mut self.indices.lock(), &self.store, opts)
    }

    /// Find an existing row by the primary-key values of a positional
    /// record. `None` slots mean "not given".
    fn find_row(&self, vals: &[Option<Value>]) -> Option<RowId> {
        let pk = self.refs.pk.as_deref()?;
        if self.store.row_count() == 0 {
            return None;
        }
        let key: Option<Vec<Value>> = self
            .refs
            .pk_fi
            .iter()
            .map(|&fi| {
                let field = self.store.field_at(fi)?;
                vals.get(fi)?.clone().map(|v| field.convert_val(v))
            })
            .collect();
        self.lookup(pk, &key?).ok()?.first().copied()
    }

    // -------------------------------------------------------------------------
    // Schema binding
    // -------------------------------------------------------------------------

    /// Rebuild everything from the bound snapshot: fields, rows, tree and
    /// the visible sequence. Pending requests are aborted and unsaved edits
    /// are discarded.
    pub fn reset(&mut self) {
        self.abort_all();
        self.init_fields();
        self.init_all_rows();
        self.init_tree();
        self.init_rows();
        self.ready = self.rowset.is_some();
        tracing::debug!(
            target: targets::STORE,
            rows = self.store.row_count(),
            fields = self.store.field_count(),
            "rowset reset"
        );
        self.signals.fields_changed.emit(());
        self.signals.reset.emit(());
    }

    /// Bind a new snapshot and reset.
    pub fn set_rowset(&mut self, rowset: Rowset) {
        self.rowset = Some(rowset);
        self.reset();
    }

    fn init_fields(&mut self) {
        let specs = self
            .rowset
            .as_ref()
            .map(|rs| rs.fields.clone())
            .unwrap_or_default();
        let mut fields = self
            .config
            .fields
            .resolve(&specs, self.config.rowset_name.as_deref());
        for field in &mut fields {
            self.init_field(field);
        }
        self.store.set_fields(fields);
        self.indices.get_mut().clear();
        self.init_refs();
        self.order_by.retain_sortable(&self.store);
    }

    fn init_field(&self, field: &mut Field) {
        init_field_validators(field);
        if let Some(hooks) = self.hooks.get(&field.name) {
            if !field.readonly {
                field.validators.extend(hooks.validators.iter().cloned());
            }
            if hooks.convert.is_some() {
                field.convert = hooks.convert.clone();
            }
            if hooks.client_default.is_some() {
                field.client_default = hooks.client_default.clone();
            }
        }
        if field.readonly {
            return;
        }
        let Some(lookup) = &field.lookup else {
            return;
        };
        if let Some(source) = self.lookup_sources.get(&lookup.rowset_name) {
            let validator = LookupValidator::new(source.clone(), lookup.cols.clone());
            field.validators.push(Arc::new(validator));
        }
    }

    /// Resolve the column references of the snapshot and configuration. An
    /// unknown column disables the feature depending on it.
    fn init_refs(&mut self) {
        let rs = self.rowset.as_ref();
        let pick = |cfg: &Option<String>, rs_col: Option<&Option<String>>| {
            cfg.clone().or_else(|| rs_col.cloned().flatten())
        };
        let store = &self.store;
        let resolve = |role: &'static str, col: &Option<String>| -> Option<usize> {
            let col = col.as_deref()?;
            let fi = store.field_index(col);
            if fi.is_none() {
                tracing::warn!(target: targets::FIELD, role, col, "unknown column, feature disabled");
            }
            fi
        };

        let mut refs = ColumnRefs::default();
        if let Some(pk) = rs.and_then(|rs| rs.pk.clone()).filter(|pk| !pk.trim().is_empty()) {
            match store.field_indices(&pk) {
                Some(fis) => {
                    refs.pk_fi = fis;
                    refs.pk = Some(pk);
                }
                None => tracing::warn!(target: targets::FIELD, pk = %pk, "unknown pk column, feature disabled"),
            }
        }
        let single_pk = refs
            .pk
            .as_ref()
            .filter(|_| refs.pk_fi.len() == 1)
            .cloned();
        refs.id_col = pick(&self.config.id_col, rs.map(|rs| &rs.id_col)).or(single_pk);
        refs.parent_col = pick(&self.config.parent_col, rs.map(|rs| &rs.parent_col));
        refs.id_fi = resolve("id_col", &refs.id_col);
        refs.parent_fi = resolve("parent_col", &refs.parent_col);
        if refs.id_fi.is_none() {
            refs.id_col = None;
        }
        if refs.parent_fi.is_none() {
            refs.parent_col = None;
        }
        refs.pos_fi = resolve("pos_col", &pick(&self.config.pos_col, rs.map(|rs| &rs.pos_col)));
        refs.tree_fi = resolve("tree_col", &pick(&self.config.tree_col, rs.map(|rs| &rs.tree_col)));
        refs.name_fi = resolve("name_col", &rs.and_then(|rs| rs.name_col.clone()));
        refs.val_fi = resolve("val_col", &rs.and_then(|rs| rs.val_col.clone()));
        self.refs = refs;

        self.row_validators.clear();
        if self.refs.pk.is_some() {
            self.row_validators.push(Arc::new(UniqueKeyValidator));
        }
        self.row_validators
            .extend(self.custom_row_validators.iter().cloned());
    }

    /// Fill the store from saved row states, saved row values or the
    /// snapshot rows, in that order of preference.
    fn init_all_rows(&mut self) {
        self.changed_rows.clear();
        self.store.clear_rows();
        self.indices.get_mut().invalidate_all();
        if self.rowset.is_none() {
            return;
        }
        if let Some(states) = self.config.row_states.clone() {
            self.deserialize_all_row_states(&states);
        } else if let Some(row_vals) = self.config.row_vals.clone() {
            for vals in &row_vals {
                let vals = self.deserialize_row_vals(vals);
                self.store.insert_row(vals);
            }
        } else {
            let rows = self
                .rowset
                .as_mut()
                .map(|rs| std::mem::take(&mut rs.rows))
                .unwrap_or_default();
            for data in &rows {
                let vals = self.snapshot_vals(data);
                self.store.insert_row(vals);
            }
            if let Some(rs) = self.rowset.as_mut() {
                rs.rows = rows;
            }
        }
    }

    /// Positional, converted values of a snapshot row.
    fn snapshot_vals(&self, data: &RowData) -> Vec<Value> {
        match data {
            RowData::Values(vals) => self
                .store
                .fields()
                .iter()
                .enumerate()
                .map(|(fi, field)| field.convert_val(vals.get(fi).cloned().unwrap_or_default()))
                .collect(),
            RowData::Named(vals) => self.deserialize_row_vals(vals),
        }
    }

    fn init_tree(&mut self) {
        let (Some(id_col), Some(parent_col)) = (self.refs.id_col.clone(), self.refs.parent_col.clone()) else {
            self.tree.reset(&mut self.store);
            self.tree_build = None;
            return;
        };
        let build = self
            .tree
            .build(&mut self.store, self.indices.get_mut(), &id_col, &parent_col);
        self.tree_build = Some(build);
    }

    /// Append a field to the schema. Existing rows get a null cell.
    pub fn add_field(&mut self, attrs: FieldAttrs) -> usize {
        let mut taken: HashSet<String> = self.store.fields().iter().map(|f| f.name.clone()).collect();
        let fi = self.store.field_count();
        let mut field = self.config.fields.resolve_one(
            &attrs,
            fi,
            self.config.rowset_name.as_deref(),
            &mut taken,
        );
        self.init_field(&mut field);
        let fi = self.store.add_field(field);
        self.rowset.get_or_insert_with(Rowset::default).fields.push(attrs);
        self.schema_changed();
        fi
    }

    /// Remove a field from the schema and from every row.
    pub fn remove_field(&mut self, col: &str) -> Result<Field> {
        let fi = self.require_field(col)?;
        let field = self
            .store
            .remove_field(fi)
            .ok_or_else(|| GridError::UnknownColumn(col.to_string()))?;
        if let Some(rs) = self.rowset.as_mut() {
            if fi < rs.fields.len() {
                rs.fields.remove(fi);
            }
        }
        self.schema_changed();
        Ok(field)
    }

    fn schema_changed(&mut self) {
        self.indices.get_mut().clear();
        self.init_refs();
        let tree_cols = self.refs.id_fi.is_some() && self.refs.parent_fi.is_some();
        if tree_cols != self.tree.is_active() {
            self.init_tree();
        }
        self.order_by.retain_sortable(&self.store);
        self.init_rows();
        self.signals.fields_changed.emit(());
    }

    // -------------------------------------------------------------------------
    // Host hooks
    // -------------------------------------------------------------------------

    /// Attach an extra cell validator to a column. Readonly columns ignore it.
    pub fn add_cell_validator(&mut self, col: &str, validator: Arc<dyn CellValidator>) {
        self.hooks
            .entry(col.to_string())
            .or_default()
            .validators
            .push(validator.clone());
        if let Some(fi) = self.store.field_index(col) {
            if let Some(field) = self.store.field_at_mut(fi).filter(|f| !f.readonly) {
                field.validators.push(validator);
            }
        }
    }

    pub fn add_row_validator(&mut self, validator: Arc<dyn RowValidator>) {
        self.custom_row_validators.push(validator.clone());
        self.row_validators.push(validator);
    }

    /// Transform applied to every value written into a column.
    pub fn set_converter(&mut self, col: &str, convert: ConvertFn) {
        self.hooks.entry(col.to_string()).or_default().convert = Some(convert.clone());
        if let Some(fi) = self.store.field_index(col) {
            if let Some(field) = self.store.field_at_mut(fi) {
                field.convert = Some(convert);
            }
        }
    }

    /// Default of a column in user-inserted rows, overriding `client_default`.
    pub fn set_client_default(&mut self, col: &str, default: ClientDefault) {
        self.hooks.entry(col.to_string()).or_default().client_default = Some(default.clone());
        if let Some(fi) = self.store.field_index(col) {
            if let Some(field) = self.store.field_at_mut(fi) {
                field.client_default = Some(default);
            }
        }
    }

    /// Acquire the lookup rowsets referenced by this engine's fields and
    /// validate those fields against them.
    pub fn bind_lookups(&mut self, shared: &SharedRowsets) {
        let names: HashSet<String> = self
            .store
            .fields()
            .iter()
            .filter_map(|f| f.lookup.as_ref().map(|l| l.rowset_name.clone()))
            .collect();
        for name in names {
            if !self.lookup_sources.contains_key(&name) {
                let source = shared.acquire(&name);
                self.lookup_sources.insert(name, source);
            }
        }
        self.reinit_field_validators();
    }

    /// Release every lookup rowset acquired by [`bind_lookups`](Self::bind_lookups).
    pub fn release_lookups(&mut self, shared: &SharedRowsets) {
        for name in std::mem::take(&mut self.lookup_sources).into_keys() {
            shared.release(&name);
        }
        self.reinit_field_validators();
    }

    fn reinit_field_validators(&mut self) {
        let mut fields: Vec<Field> = self.store.fields().to_vec();
        for field in &mut fields {
            self.init_field(field);
        }
        for (slot, field) in self.store.fields_mut().zip(fields) {
            slot.validators = field.validators;
        }
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    fn notify(&self, kind: NotifyKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            NotifyKind::Error => tracing::warn!(target: targets::SAVE, %message, "user notified"),
            _ => tracing::debug!(target: targets::SAVE, %message, "user notified"),
        }
        self.signals.notify.emit(Notification { kind, message });
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }
}

impl std::fmt::Debug for RowsetModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowsetModel")
            .field("rowset_name", &self.config.rowset_name)
            .field("fields", &self.store.field_count())
            .field("rows", &self.store.row_count())
            .field("visible", &self.rows.len())
            .field("changed", &self.changed_rows.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
