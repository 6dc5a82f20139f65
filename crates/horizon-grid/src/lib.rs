//! Horizon Grid - an in-memory tabular data engine.
//!
//! This crate holds the data layer behind data-bound grid, list and dropdown
//! widgets. A [`RowsetModel`] owns one rowset and provides:
//!
//! - **Fields**: Typed columns resolved from layered attribute defaults
//! - **Row Store**: Canonical values plus per-cell and per-row state slots
//! - **Indices**: Lazily built multi-column lookup indices and grouping
//! - **Trees**: Parent/child hierarchy with cycle detection and collapse state
//! - **Sorting & Filtering**: Tree-aware ordering, parameter and exclusion filters
//! - **Change Tracking**: Dirty rows, validation and a save pipeline with
//!   diff-merge on reload
//!
//! Network I/O lives in `horizon-grid-net`; the engine only produces
//! changesets and consumes results and snapshots.
//!
//! # Example
//!
//! ```
//! use horizon_grid::{FieldAttrs, RowData, Rowset, RowsetConfig, RowsetModel};
//!
//! let rowset = Rowset {
//!     fields: vec![FieldAttrs::named("id"), FieldAttrs::named("name")],
//!     rows: vec![RowData::Values(vec![1.into(), "Ann".into()])],
//!     pk: Some("id".into()),
//!     ..Default::default()
//! };
//! let mut model = RowsetModel::new(RowsetConfig::with_rowset(rowset));
//!
//! let row = model.rows()[0];
//! model.set_cell_val(row, "name", "Anna", true)?;
//! assert!(model.has_changes());
//! # Ok::<(), horizon_grid::GridError>(())
//! ```

pub mod changeset;
pub mod config;
pub mod field;
pub mod filter;
pub mod index;
pub mod model;
pub mod row;
pub mod shared;
pub mod signals;
pub mod sort;
pub mod store;
pub mod tree;
pub mod validate;
pub mod value;

pub use horizon_grid_core::{GridError, Result, Signal};

pub use changeset::{
    ChangeRow, ChangeType, Changeset, ResultRow, RowData, RowState, RowVals, Rowset, SaveRequest,
    SaveResult,
};
pub use config::{ConfigError, RowsetConfig};
pub use field::{ClientDefault, Field, FieldAttrs, FieldLayers};
pub use filter::{Expr, ParamVals};
pub use index::{GroupOptions, RowGroup};
pub use model::{
    InsertOptions, LoadTicket, PendingSave, ReloadDecision, ReloadOptions, RemoveOptions,
    RowsetModel, SaveEffect, TransportFailure,
};
pub use row::{Row, RowFlag, RowId, SaveRequestId};
pub use shared::{SharedLimits, SharedRowset, SharedRowsets};
pub use signals::{Notification, NotifyKind, RowsetSignals, SaveFailed};
pub use sort::{OrderBy, SortDir};
pub use tree::TreeBuild;
pub use validate::{CellValidator, Errors, RowValidator};
pub use value::Value;
