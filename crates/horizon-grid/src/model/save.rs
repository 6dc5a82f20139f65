//! Saving and loading: changeset packing, result application,
//! serialization of static rowsets, diff-merge and the reload state machine.

use std::fmt;

use horizon_grid_core::PerfSpan;
use horizon_grid_core::logging::{span_names, targets};
use rand::Rng;

use super::RowsetModel;
use super::edit::InsertOptions;
use crate::changeset::{
    ChangeRow, ChangeType, Changeset, OLD_SUFFIX, RowData, RowState, RowVals, Rowset, SaveRequest, SaveResult,
};
use crate::filter::ParamVals;
use crate::row::{RowFlag, RowId, SaveRequestId, Slot};
use crate::signals::{NotifyKind, SaveFailed};
use crate::store::ERRORS;
use crate::validate::Errors;
use crate::value::{Value, compare_vals};

/// Why a transport request did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Network,
    Http { status: u16, message: String },
    /// The request was cancelled. Never shown to the user.
    Abort,
}

impl TransportFailure {
    /// The message shown to the user when a save fails this way.
    pub fn save_message(&self) -> Option<String> {
        match self {
            TransportFailure::Http { status, message } => Some(format!("Server returned {status} {message}")),
            TransportFailure::Network => Some("Saving failed: network error.".to_string()),
            TransportFailure::Timeout => Some("Saving failed: timed out.".to_string()),
            TransportFailure::Abort => None,
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Timeout => f.write_str("timeout"),
            TransportFailure::Network => f.write_str("network"),
            TransportFailure::Http { status, message } => write!(f, "http {status} {message}"),
            TransportFailure::Abort => f.write_str("abort"),
        }
    }
}

/// A save request waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSave {
    pub id: SaveRequestId,
    pub request: SaveRequest,
}

/// What a call to [`RowsetModel::save`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEffect {
    /// Nothing to save.
    Nothing,
    /// Local state was accepted as canonical.
    Committed,
    /// Rows were serialized into the static rowset and committed.
    Saved,
    /// A request must be sent; report back with [`RowsetModel::finish_save`].
    Submit(PendingSave),
}

/// Options of [`RowsetModel::reload`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadOptions {
    /// Merge the new snapshot into the current rows instead of resetting.
    pub allow_diff_merge: bool,
    /// Update ids carried by a push notification.
    pub update_ids: Option<Vec<String>>,
    /// Filter token carried by a push notification. `None` matches any.
    pub if_filter: Option<String>,
}

/// A load the transport must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub id: u64,
    pub url: String,
    /// Current filter token, sent as the `filter` query argument.
    pub filter: Option<String>,
    pub allow_diff_merge: bool,
}

/// What a call to [`RowsetModel::reload`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadDecision {
    Ignored,
    /// The rowset was rebuilt locally.
    Reset,
    /// A load must be performed; report back with [`RowsetModel::finish_load`].
    Fetch(LoadTicket),
}

/// A fresh update id: a random 52-bit integer in base 36.
fn new_update_id() -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n: u64 = rand::thread_rng().gen_range(0..1u64 << 52);
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.iter().rev().collect()
}

impl RowsetModel {
    // -------------------------------------------------------------------------
    // Packing
    // -------------------------------------------------------------------------

    /// Pack the dirty set into a changeset, paired with the source rows.
    ///
    /// Rows already being saved and rows failing validation are skipped.
    pub fn pack_changes(&mut self) -> (Changeset, Vec<RowId>) {
        let _span = PerfSpan::new(span_names::PACK);
        let mut changes = Changeset::default();
        let mut rows = Vec::new();
        let dirty = self.changed_rows.clone();
        for row in dirty {
            let Some(r) = self.store.row(row) else {
                continue;
            };
            if r.is_saving() || r.nosave {
                continue;
            }
            let (is_new, removed) = (r.is_new, r.removed);
            let change = if removed {
                ChangeRow {
                    change_type: ChangeType::Remove,
                    values: self.old_pk_vals(row),
                }
            } else {
                if !self.validate_row(row) {
                    continue;
                }
                if is_new {
                    ChangeRow {
                        change_type: ChangeType::New,
                        values: self.new_row_vals(row),
                    }
                } else {
                    let mut values = self.modified_vals(row);
                    if values.is_empty() {
                        continue;
                    }
                    values.extend(self.old_pk_vals(row));
                    ChangeRow {
                        change_type: ChangeType::Update,
                        values,
                    }
                }
            };
            changes.rows.push(change);
            rows.push(row);
        }
        tracing::debug!(target: targets::SAVE, rows = changes.len(), "changes packed");
        (changes, rows)
    }

    fn old_pk_vals(&self, row: RowId) -> RowVals {
        self.pk_fields()
            .map(|f| {
                let val = self.store.cell_val(row, f.val_index).cloned().unwrap_or_default();
                (format!("{}{OLD_SUFFIX}", f.name), val)
            })
            .collect()
    }

    fn new_row_vals(&self, row: RowId) -> RowVals {
        self.store
            .fields()
            .iter()
            .filter(|f| !f.nosave)
            .filter_map(|f| {
                let val = self.store.cell_input_val(row, f.val_index)?;
                compare_vals(val, &f.default).is_ne().then(|| (f.name.clone(), val.clone()))
            })
            .collect()
    }

    fn modified_vals(&self, row: RowId) -> RowVals {
        self.store
            .fields()
            .iter()
            .filter(|f| !f.nosave && self.store.cell_modified(row, f.val_index))
            .filter_map(|f| Some((f.name.clone(), self.store.cell_input_val(row, f.val_index)?.clone())))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Saving
    // -------------------------------------------------------------------------

    /// Save the dirty set the way this rowset is configured to.
    pub fn save(&mut self) -> SaveEffect {
        if self.config.rowset_url.is_some() {
            return self.save_to_server();
        }
        if self.config.static_rowset.is_none() {
            if !self.has_changes() {
                return SaveEffect::Nothing;
            }
            self.commit_changes();
            return SaveEffect::Committed;
        }

        if self.config.save_row_states {
            self.config.row_states = Some(self.serialize_all_row_states());
            self.config.row_vals = None;
            let rows = self.changed_rows.clone();
            self.commit_rows(&rows);
        } else {
            self.config.row_vals = Some(self.serialize_all_row_vals());
            let rows: Vec<RowId> = self
                .changed_rows
                .clone()
                .into_iter()
                .filter(|&row| self.store.row(row).is_some_and(|r| r.removed) || self.validate_row(row))
                .collect();
            self.commit_rows(&rows);
        }
        tracing::debug!(target: targets::SAVE, "static rowset saved");
        self.signals.saved.emit(());
        SaveEffect::Saved
    }

    fn save_to_server(&mut self) -> SaveEffect {
        let (changes, rows) = self.pack_changes();
        if changes.is_empty() {
            return SaveEffect::Nothing;
        }
        let update_id = new_update_id();
        self.update_ids.insert(update_id.clone());
        let id = SaveRequestId(self.next_request_id());
        for &row in &rows {
            if let Some(r) = self.store.row_mut(row) {
                r.save_request = Some(id);
            }
        }
        self.saves.insert(id, rows);
        tracing::debug!(target: targets::SAVE, update_id = %update_id, rows = changes.len(), "save submitted");
        self.signals.saving.emit(true);
        SaveEffect::Submit(PendingSave {
            id,
            request: SaveRequest::new(changes, update_id),
        })
    }

    /// Save requests queued by auto-save settings, in submission order.
    pub fn take_pending_saves(&mut self) -> Vec<PendingSave> {
        std::mem::take(&mut self.outbox)
    }

    pub fn is_saving(&self) -> bool {
        !self.saves.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.load.is_some()
    }

    /// Whether an update id was issued by this engine and not yet echoed.
    pub fn owns_update_id(&self, update_id: &str) -> bool {
        self.update_ids.contains(update_id)
    }

    /// Report the outcome of a submitted save. Unknown (aborted) requests
    /// are ignored.
    pub fn finish_save(&mut self, id: SaveRequestId, result: Result<SaveResult, TransportFailure>) {
        let Some(rows) = self.saves.remove(&id) else {
            tracing::debug!(target: targets::SAVE, "result of an aborted save ignored");
            return;
        };
        for &row in &rows {
            if let Some(r) = self.store.row_mut(row).filter(|r| r.save_request == Some(id)) {
                r.save_request = None;
            }
        }
        self.signals.saving.emit(false);
        match result {
            Ok(result) => {
                self.apply_results(&rows, result);
                self.signals.saved.emit(());
            }
            Err(failure) => {
                let message = failure.save_message();
                tracing::warn!(target: targets::SAVE, %failure, "save failed");
                if let Some(message) = &message {
                    self.notify(NotifyKind::Error, message.clone());
                }
                self.signals.save_failed.emit(SaveFailed { failure, message });
            }
        }
    }

    /// Write a save result back into the rows it was packed from.
    fn apply_results(&mut self, rows: &[RowId], result: SaveResult) {
        let mut to_remove = Vec::new();
        let mut messages = Vec::new();
        for (row, res) in rows.iter().copied().zip(result.rows) {
            let Some(r) = self.store.row(row) else {
                continue;
            };
            let failed = res.failed();
            if res.remove || (r.removed && !failed) {
                to_remove.push(row);
                continue;
            }

            self.begin_change(row, false);
            match res.values {
                Some(values) => {
                    for (fi, val) in values.into_iter().enumerate().take(self.store.field_count()) {
                        self.reset_cell_val_at(row, fi, val, false);
                    }
                }
                None if !failed => self.commit_input_vals(row),
                None => {}
            }
            if let Some(error) = res.error {
                self.store.set_row_errors(Some(Errors::server(error.clone())));
                messages.push(error);
            }
            for (col, message) in res.field_errors {
                let Some(fi) = self.store.field_index(&col) else {
                    tracing::warn!(target: targets::SAVE, col = %col, "error for unknown column");
                    continue;
                };
                messages.push(format!("{}: {}", self.store.fields()[fi].label, message));
                self.store
                    .set_cell_state(fi, ERRORS, Slot::Errors(Errors::server(message)), Slot::Undefined);
            }
            if !failed {
                self.store.set_row_flag(RowFlag::IsNew, false);
                self.store.set_row_flag(RowFlag::Modified, false);
            }
            self.end_change();
            if !failed {
                self.row_unchanged(row);
            }
        }

        self.drop_rows(&to_remove);
        if !messages.is_empty() {
            self.notify(NotifyKind::Error, messages.join("\n"));
        }
        self.init_rows();
    }

    fn commit_input_vals(&mut self, row: RowId) {
        for fi in 0..self.store.field_count() {
            if self.store.cell_modified(row, fi) {
                if let Some(val) = self.store.cell_input_val(row, fi).cloned() {
                    self.reset_cell_val_at(row, fi, val, false);
                }
            }
        }
    }

    /// Accept every pending edit as canonical. Removed rows are dropped.
    pub fn commit_changes(&mut self) {
        self.abort_all();
        let rows = self.changed_rows.clone();
        self.commit_rows(&rows);
    }

    fn commit_rows(&mut self, rows: &[RowId]) {
        let mut removed = Vec::new();
        for &row in rows {
            let Some(r) = self.store.row(row) else {
                continue;
            };
            if r.removed {
                removed.push(row);
                continue;
            }
            self.begin_change(row, false);
            self.commit_input_vals(row);
            self.store.set_row_flag(RowFlag::IsNew, false);
            self.store.set_row_flag(RowFlag::Modified, false);
            self.end_change();
            self.row_unchanged(row);
        }
        self.drop_rows(&removed);
        self.init_rows();
    }

    /// Drop every pending edit: new rows go away, removed rows come back,
    /// modified rows revert.
    pub fn revert_changes(&mut self) {
        self.abort_all();
        let rows = self.changed_rows.clone();
        let mut new_rows = Vec::new();
        for row in rows {
            if self.store.row(row).is_some_and(|r| r.is_new) {
                new_rows.push(row);
            } else {
                self.revert_row_at(row);
            }
        }
        self.drop_rows(&new_rows);
        self.init_rows();
    }

    /// Cancel the in-flight load and every in-flight save.
    pub fn abort_all(&mut self) {
        self.abort_load();
        if self.saves.is_empty() && self.outbox.is_empty() {
            return;
        }
        self.outbox.clear();
        let saves: Vec<_> = self.saves.drain().collect();
        for (_, rows) in &saves {
            for &row in rows {
                if let Some(r) = self.store.row_mut(row) {
                    r.save_request = None;
                }
            }
        }
        if !saves.is_empty() {
            tracing::debug!(target: targets::SAVE, count = saves.len(), "saves aborted");
            self.signals.saving.emit(false);
        }
    }

    pub fn abort_load(&mut self) {
        if let Some(ticket) = self.load.take() {
            tracing::debug!(target: targets::LOAD, id = ticket.id, "load aborted");
            self.signals.loading.emit(false);
        }
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    /// Pending values of a row by column name. Nosave fields and values
    /// equal to the field default are left out.
    pub fn serialize_row_vals(&self, row: RowId) -> RowVals {
        self.new_row_vals(row)
    }

    /// Positional values from named ones. Missing columns take the field
    /// default.
    pub fn deserialize_row_vals(&self, vals: &RowVals) -> Vec<Value> {
        for col in vals.keys() {
            if self.store.field_index(col).is_none() {
                tracing::warn!(target: targets::LOAD, col = %col, "unknown column in row values");
            }
        }
        self.store
            .fields()
            .iter()
            .map(|f| f.convert_val(vals.get(&f.name).cloned().unwrap_or_else(|| f.default.clone())))
            .collect()
    }

    /// Values of every row worth keeping: removed, nosave and invalid rows
    /// are skipped.
    pub fn serialize_all_row_vals(&mut self) -> Vec<RowVals> {
        let rows = self.store.all_rows().to_vec();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(r) = self.store.row(row) else {
                continue;
            };
            if r.removed || r.nosave {
                continue;
            }
            if (r.is_new || r.modified) && !self.validate_row(row) {
                continue;
            }
            out.push(self.serialize_row_vals(row));
        }
        out
    }

    /// Values plus `is_new` and `removed` marks of every saving row.
    pub fn serialize_all_row_states(&self) -> Vec<RowState> {
        self.store
            .all_rows()
            .iter()
            .filter_map(|&row| {
                let r = self.store.row(row)?;
                (!r.nosave).then(|| RowState {
                    is_new: r.is_new,
                    removed: r.removed,
                    vals: self.serialize_row_vals(row),
                })
            })
            .collect()
    }

    /// Append rows from saved row states. New and removed rows join the
    /// dirty set.
    pub fn deserialize_all_row_states(&mut self, states: &[RowState]) {
        for state in states {
            let vals = self.deserialize_row_vals(&state.vals);
            let row = self.store.insert_row(vals);
            if let Some(r) = self.store.row_mut(row) {
                r.is_new = state.is_new;
                r.removed = state.removed;
            }
            if state.is_new || state.removed {
                self.row_changed(row);
            }
        }
        self.indices.get_mut().invalidate_all();
    }

    // -------------------------------------------------------------------------
    // Diff-merge
    // -------------------------------------------------------------------------

    /// Whether a snapshot has the field names and primary key of the
    /// current one.
    pub fn same_fields(&self, rs: &Rowset) -> bool {
        let Some(cur) = &self.rowset else {
            return false;
        };
        cur.pk == rs.pk
            && cur.fields.len() == rs.fields.len()
            && cur.fields.iter().zip(&rs.fields).all(|(a, b)| a.name == b.name)
    }

    fn can_diff_merge(&self, rs: &Rowset) -> bool {
        self.ready && !self.tree.is_active() && self.refs.pk.is_some() && self.same_fields(rs)
    }

    /// Merge a fresh snapshot into the current rows: rows matched by primary
    /// key are updated, unmatched incoming rows are added, and rows that
    /// are neither new nor in the snapshot are dropped. Pending edits
    /// survive.
    ///
    /// Refused (returning `false`) for trees and for snapshots of another
    /// shape.
    pub fn diff_merge(&mut self, rs: Rowset) -> bool {
        if !self.can_diff_merge(&rs) {
            tracing::debug!(target: targets::LOAD, "diff-merge refused");
            return false;
        }
        self.clear_merged();
        let incoming: Vec<RowData> = rs.rows.clone();
        self.insert_rows(
            incoming,
            &InsertOptions {
                from_server: true,
                diff_merge: true,
                merged: true,
                ..Default::default()
            },
        );
        let stale: Vec<RowId> = self
            .store
            .all_rows()
            .iter()
            .copied()
            .filter(|&row| self.store.row(row).is_some_and(|r| !r.merged && !r.is_new))
            .collect();
        self.drop_rows(&stale);
        self.clear_merged();
        tracing::debug!(target: targets::LOAD, stale = stale.len(), "snapshot merged");
        self.rowset = Some(rs);
        self.init_rows();
        true
    }

    fn clear_merged(&mut self) {
        let rows = self.store.all_rows().to_vec();
        for row in rows {
            if let Some(r) = self.store.row_mut(row) {
                r.merged = false;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reload
    // -------------------------------------------------------------------------

    /// Reload the rowset.
    ///
    /// A client-side rowset, or one whose parameters are unavailable, is
    /// rebuilt locally. A push-driven reload (with update ids) is ignored
    /// when it only echoes this engine's own saves, while a save is in
    /// flight, or when its filter does not match ours.
    pub fn reload(&mut self, opts: ReloadOptions) -> ReloadDecision {
        let Some(url) = self.config.rowset_url.clone() else {
            self.reset();
            return ReloadDecision::Reset;
        };
        if self.param_vals == ParamVals::Unavailable {
            if let Some(rs) = self.rowset.as_mut() {
                rs.rows.clear();
            }
            self.reset();
            return ReloadDecision::Reset;
        }

        let saving = self.is_saving();
        if let Some(ids) = &opts.update_ids {
            let ours = ids.iter().filter(|id| self.update_ids.remove(id.as_str())).count();
            if !ids.is_empty() && ours == ids.len() {
                tracing::debug!(target: targets::LOAD, "push echoes our own save");
                return ReloadDecision::Ignored;
            }
            if saving {
                tracing::debug!(target: targets::LOAD, "push ignored while saving");
                return ReloadDecision::Ignored;
            }
            if let Some(filter) = &opts.if_filter {
                if self.filter_token().as_ref() != Some(filter) {
                    tracing::trace!(target: targets::LOAD, %filter, "push for another filter");
                    return ReloadDecision::Ignored;
                }
            }
        } else if saving {
            self.notify(NotifyKind::Warn, "Cannot reload while saving is in progress.");
            return ReloadDecision::Ignored;
        }

        self.abort_load();
        let ticket = LoadTicket {
            id: self.next_request_id(),
            url,
            filter: self.filter_token(),
            allow_diff_merge: opts.allow_diff_merge,
        };
        tracing::debug!(target: targets::LOAD, id = ticket.id, url = %ticket.url, "load started");
        self.load = Some(ticket.clone());
        self.signals.loading.emit(true);
        ReloadDecision::Fetch(ticket)
    }

    /// Report the outcome of a load. Results of superseded loads are
    /// ignored; a failure keeps the current rows.
    pub fn finish_load(&mut self, id: u64, result: Result<Rowset, TransportFailure>) {
        let Some(ticket) = self.load.take_if(|t| t.id == id) else {
            tracing::debug!(target: targets::LOAD, id, "stale load result ignored");
            return;
        };
        self.signals.loading.emit(false);
        match result {
            Ok(rs) => {
                if ticket.allow_diff_merge && self.can_diff_merge(&rs) {
                    self.diff_merge(rs);
                } else {
                    self.set_rowset(rs);
                }
            }
            Err(TransportFailure::Abort) => {
                tracing::debug!(target: targets::LOAD, id, "load aborted");
            }
            Err(failure) => {
                tracing::warn!(target: targets::LOAD, %failure, "load failed");
                self.signals.load_failed.emit(failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::changeset::ResultRow;
    use crate::config::RowsetConfig;
    use crate::field::FieldAttrs;
    use crate::model::RemoveOptions;
    use crate::signals::Notification;

    fn rowset() -> Rowset {
        Rowset {
            fields: vec![FieldAttrs::named("id").with_type("number"), FieldAttrs::named("v")],
            rows: vec![
                RowData::Values(vec![1.into(), "a".into()]),
                RowData::Values(vec![2.into(), "b".into()]),
            ],
            pk: Some("id".into()),
            ..Default::default()
        }
    }

    fn remote() -> RowsetModel {
        let mut m = RowsetModel::new(RowsetConfig {
            save_on_remove_row: false,
            save_on_exit_row: false,
            ..RowsetConfig::with_url("https://example.com/rowset")
        });
        m.set_rowset(rowset());
        m
    }

    fn notifications(m: &RowsetModel) -> Arc<Mutex<Vec<Notification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        m.signals().notify.connect(move |n: &Notification| s.lock().push(n.clone()));
        seen
    }

    #[test]
    fn test_update_id_format() {
        let id = new_update_id();
        assert!(!id.is_empty() && id.len() <= 11);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_pack_changes() {
        let mut m = remote();
        let (r1, r2) = (m.rows()[0], m.rows()[1]);
        m.set_cell_val(r1, "v", "a1", true).unwrap();
        m.remove_rows(&[r2], &RemoveOptions { input: true, ..Default::default() });
        let added = m.add_row(None).unwrap();
        m.set_cell_val(added, "id", 3, true).unwrap();

        let (changes, rows) = m.pack_changes();
        assert_eq!(rows, [r1, r2, added]);
        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"rows": [
                {"type": "update", "values": {"v": "a1", "id:old": 1}},
                {"type": "remove", "values": {"id:old": 2}},
                {"type": "new", "values": {"id": 3}},
            ]})
        );
    }

    #[test]
    fn test_invalid_rows_are_not_packed() {
        let mut m = remote();
        let row = m.rows()[0];
        m.set_cell_val(row, "id", 2, true).unwrap();
        let (changes, _) = m.pack_changes();
        assert!(changes.is_empty());
        assert_eq!(m.save(), SaveEffect::Nothing);
    }

    #[test]
    fn test_save_round_trip() {
        let mut m = remote();
        let row = m.rows()[0];
        m.set_cell_val(row, "v", "a1", true).unwrap();

        let SaveEffect::Submit(pending) = m.save() else {
            panic!("expected a request");
        };
        assert!(m.row(row).unwrap().is_saving());
        assert!(m.owns_update_id(&pending.request.update_id));
        // Rows in flight are not packed again.
        assert!(m.pack_changes().0.is_empty());

        m.finish_save(pending.id, Ok(SaveResult { rows: vec![ResultRow::default()] }));
        assert_eq!(m.cell_val(row, "v"), Some(&Value::from("a1")));
        assert!(!m.row(row).unwrap().modified);
        assert!(!m.has_changes());
        assert!(!m.is_saving());
    }

    #[test]
    fn test_save_results() {
        let mut m = remote();
        let (r1, r2) = (m.rows()[0], m.rows()[1]);
        m.set_cell_val(r1, "v", "x", true).unwrap();
        m.set_cell_val(r2, "v", "y", true).unwrap();
        let seen = notifications(&m);

        let SaveEffect::Submit(pending) = m.save() else {
            panic!("expected a request");
        };
        let result = SaveResult {
            rows: vec![
                ResultRow {
                    field_errors: [("v".to_string(), "taken".to_string())].into(),
                    ..Default::default()
                },
                ResultRow {
                    values: Some(vec![2.into(), "Y".into()]),
                    ..Default::default()
                },
            ],
        };
        m.finish_save(pending.id, Ok(result));

        assert!(m.row(r1).unwrap().modified);
        assert!(!m.cell_errors(r1, "v").unwrap().client_side);
        assert_eq!(m.cell_val(r2, "v"), Some(&Value::from("Y")));
        assert_eq!(m.changed_rows(), [r1]);
        assert_eq!(seen.lock()[0].message, "V: taken");

        // Editing the cell drops the server error.
        m.set_cell_val(r1, "v", "z", true).unwrap();
        assert!(m.cell_errors(r1, "v").unwrap().passed);
    }

    #[test]
    fn test_save_failure_keeps_edits() {
        let mut m = remote();
        let row = m.rows()[0];
        m.set_cell_val(row, "v", "x", true).unwrap();
        let seen = notifications(&m);
        let failed = Arc::new(Mutex::new(None));
        let f = failed.clone();
        m.signals().save_failed.connect(move |e: &SaveFailed| *f.lock() = Some(e.clone()));

        let SaveEffect::Submit(pending) = m.save() else {
            panic!("expected a request");
        };
        m.finish_save(
            pending.id,
            Err(TransportFailure::Http {
                status: 500,
                message: "Internal Server Error".into(),
            }),
        );
        assert_eq!(seen.lock()[0].message, "Server returned 500 Internal Server Error");
        assert_eq!(failed.lock().as_ref().unwrap().failure.save_message(), Some("Server returned 500 Internal Server Error".into()));
        assert_eq!(m.changed_rows(), [row]);
        assert!(!m.row(row).unwrap().is_saving());
        assert_eq!(m.cell_input_val(row, "v"), Some(&Value::from("x")));

        // Aborts are silent.
        let SaveEffect::Submit(pending) = m.save() else {
            panic!("expected a request");
        };
        m.finish_save(pending.id, Err(TransportFailure::Abort));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_server_removal() {
        let mut m = remote();
        let row = m.rows()[1];
        m.remove_rows(&[row], &RemoveOptions { input: true, ..Default::default() });
        let SaveEffect::Submit(pending) = m.save() else {
            panic!("expected a request");
        };
        m.finish_save(pending.id, Ok(SaveResult { rows: vec![ResultRow { remove: true, ..Default::default() }] }));
        assert_eq!(m.row_count(), 1);
        assert!(!m.has_changes());
    }

    #[test]
    fn test_static_save_writes_row_vals() {
        let mut m = RowsetModel::new(RowsetConfig::with_rowset(rowset()));
        let row = m.rows()[0];
        m.set_cell_val(row, "v", "a1", true).unwrap();
        assert_eq!(m.save(), SaveEffect::Saved);
        let vals = m.config().row_vals.clone().unwrap();
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0]["v"], Value::from("a1"));
        assert!(!m.has_changes());

        // The saved values replace the snapshot rows on reset.
        m.reset();
        assert_eq!(m.cell_val(m.rows()[0], "v"), Some(&Value::from("a1")));
    }

    #[test]
    fn test_static_save_row_states() {
        let mut m = RowsetModel::new(RowsetConfig {
            save_row_states: true,
            save_on_remove_row: false,
            ..RowsetConfig::with_rowset(rowset())
        });
        let row = m.rows()[1];
        m.remove_rows(&[row], &RemoveOptions { input: true, ..Default::default() });
        m.save();
        let states = m.config().row_states.clone().unwrap();
        assert_eq!(states.len(), 2);
        assert!(states[1].removed);
        assert_eq!(m.row_count(), 1);

        m.reset();
        assert_eq!(m.row_count(), 2);
        assert_eq!(m.changed_rows().len(), 1);
    }

    #[test]
    fn test_revert_changes() {
        let mut m = remote();
        let (r1, r2) = (m.rows()[0], m.rows()[1]);
        m.set_cell_val(r1, "v", "x", true).unwrap();
        m.remove_rows(&[r2], &RemoveOptions { input: true, ..Default::default() });
        m.add_row(None).unwrap();
        m.revert_changes();
        assert_eq!(m.row_count(), 2);
        assert!(!m.has_changes());
        assert_eq!(m.cell_input_val(r1, "v"), Some(&Value::from("a")));
        assert!(!m.row(r2).unwrap().removed);
    }

    #[test]
    fn test_push_echo_is_ignored() {
        let mut m = remote();
        let row = m.rows()[0];
        m.set_cell_val(row, "v", "x", true).unwrap();
        let SaveEffect::Submit(pending) = m.save() else {
            panic!("expected a request");
        };
        let update_id = pending.request.update_id.clone();
        m.finish_save(pending.id, Ok(SaveResult { rows: vec![ResultRow::default()] }));

        let echo = ReloadOptions {
            allow_diff_merge: true,
            update_ids: Some(vec![update_id.clone()]),
            if_filter: None,
        };
        assert_eq!(m.reload(echo.clone()), ReloadDecision::Ignored);
        // The id is consumed by the first echo.
        assert!(!m.owns_update_id(&update_id));
        assert!(matches!(m.reload(echo), ReloadDecision::Fetch(_)));
    }

    #[test]
    fn test_reload_while_saving() {
        let mut m = remote();
        let row = m.rows()[0];
        m.set_cell_val(row, "v", "x", true).unwrap();
        let seen = notifications(&m);
        let SaveEffect::Submit(_) = m.save() else {
            panic!("expected a request");
        };
        assert_eq!(m.reload(ReloadOptions::default()), ReloadDecision::Ignored);
        assert_eq!(seen.lock()[0].message, "Cannot reload while saving is in progress.");
    }

    #[test]
    fn test_stale_load_is_ignored() {
        let mut m = remote();
        let ReloadDecision::Fetch(first) = m.reload(ReloadOptions::default()) else {
            panic!("expected a fetch");
        };
        let ReloadDecision::Fetch(second) = m.reload(ReloadOptions::default()) else {
            panic!("expected a fetch");
        };
        let mut rs = rowset();
        rs.rows.truncate(1);
        m.finish_load(first.id, Ok(rs.clone()));
        assert_eq!(m.row_count(), 2);
        m.finish_load(second.id, Ok(rs));
        assert_eq!(m.row_count(), 1);
        assert!(!m.is_loading());
    }

    #[test]
    fn test_load_failure_keeps_rows() {
        let mut m = remote();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let f = failures.clone();
        m.signals().load_failed.connect(move |e: &TransportFailure| f.lock().push(e.clone()));
        let ReloadDecision::Fetch(ticket) = m.reload(ReloadOptions::default()) else {
            panic!("expected a fetch");
        };
        m.finish_load(ticket.id, Err(TransportFailure::Timeout));
        assert_eq!(m.row_count(), 2);
        assert_eq!(*failures.lock(), [TransportFailure::Timeout]);
    }

    #[test]
    fn test_diff_merge_refuses_other_shape() {
        let mut m = remote();
        let mut rs = rowset();
        rs.fields.push(FieldAttrs::named("extra"));
        assert!(!m.same_fields(&rs));
        assert!(!m.diff_merge(rs));
        assert_eq!(m.row_count(), 2);
    }
}
