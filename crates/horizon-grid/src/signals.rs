//! Observable events of a rowset engine.
//!
//! Hosts connect to the fields of [`RowsetSignals`]. Every signal is emitted
//! synchronously, after the operation that caused it has been fully applied.
//! Cell and row state signals fire once per outermost change bracket, with
//! the coalesced changes of that bracket.

use horizon_grid_core::Signal;

use crate::model::TransportFailure;
use crate::row::RowId;
use crate::store::{CellChange, RowChange};

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Info,
    Warn,
    Error,
}

/// A message the host should show to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub message: String,
}

/// Payload of [`RowsetSignals::save_failed`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveFailed {
    pub failure: TransportFailure,
    /// The message shown to the user, if any (aborts are silent).
    pub message: Option<String>,
}

/// Typed signals of one rowset engine.
#[derive(Default)]
pub struct RowsetSignals {
    // -------------------------------------------------------------------------
    // Row and cell state
    // -------------------------------------------------------------------------
    /// A cell state slot (`val`, `input_val`, `errors`, ...) changed.
    /// Args: (row, change)
    pub cell_state_changed: Signal<(RowId, CellChange)>,

    /// A row flag or the row errors changed.
    /// Args: (row, change)
    pub row_state_changed: Signal<(RowId, RowChange)>,

    /// Rows were inserted.
    pub rows_added: Signal<Vec<RowId>>,

    /// Rows were physically removed.
    pub rows_removed: Signal<Vec<RowId>>,

    /// The visible row sequence was rebuilt (filter, sort or tree change).
    pub rows_changed: Signal<()>,

    /// The dirty set changed. Args: number of dirty rows.
    pub changed_rows_changed: Signal<usize>,

    // -------------------------------------------------------------------------
    // Schema and view
    // -------------------------------------------------------------------------
    /// The rowset was reset from a snapshot.
    pub reset: Signal<()>,

    /// A field was added, removed or re-resolved.
    pub fields_changed: Signal<()>,

    /// The sort order changed. Args: the new `order_by` string.
    pub order_by_changed: Signal<String>,

    /// Parameter values changed.
    pub params_changed: Signal<()>,

    // -------------------------------------------------------------------------
    // Load and save
    // -------------------------------------------------------------------------
    /// A load started (`true`) or finished (`false`).
    pub loading: Signal<bool>,

    pub load_failed: Signal<TransportFailure>,

    /// A save started (`true`) or finished (`false`).
    pub saving: Signal<bool>,

    pub saved: Signal<()>,

    pub save_failed: Signal<SaveFailed>,

    /// A user-facing message.
    pub notify: Signal<Notification>,
}

impl RowsetSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for RowsetSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowsetSignals").finish_non_exhaustive()
    }
}
