//! Row records.
//!
//! A row is a growable slot vector with a known layout:
//!
//! ```text
//! [f0_val, f1_val, ..., row_index, f0_k0, f1_k0, ..., f0_k1, f1_k1, ...]
//! ```
//!
//! The first `field_count` slots hold canonical values, the next slot holds
//! the row's position in the visible sequence, and every allocated state key
//! (`input_val`, `errors`, ...) adds one field-wide block. Flags live on the
//! row itself.

use std::sync::Arc;

use slotmap::new_key_type;

use crate::validate::Errors;
use crate::value::Value;

new_key_type! {
    /// Stable handle to a row inside one engine.
    pub struct RowId;
}

/// Identifier of a save request that a row is currently part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveRequestId(pub(crate) u64);

/// Content of one row slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Slot {
    /// Never written; reads fall back to the canonical value or a default.
    #[default]
    Undefined,
    Val(Value),
    Errors(Errors),
    Index(usize),
}

impl Slot {
    pub fn as_val(&self) -> Option<&Value> {
        match self {
            Slot::Val(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_errors(&self) -> Option<&Errors> {
        match self {
            Slot::Errors(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Slot::Undefined)
    }
}

/// Boolean row-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowFlag {
    IsNew,
    Modified,
    Removed,
    Merged,
    Focusable,
    CanChange,
    CanRemove,
    Nosave,
    Collapsed,
}

/// One record of the rowset.
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) slots: Vec<Slot>,
    pub is_new: bool,
    pub modified: bool,
    pub removed: bool,
    pub merged: bool,
    pub focusable: bool,
    pub can_change: bool,
    pub can_remove: bool,
    pub nosave: bool,
    pub collapsed: bool,
    pub(crate) parent_collapsed: bool,
    pub(crate) errors: Option<Errors>,
    pub(crate) save_request: Option<SaveRequestId>,
    pub(crate) parent_row: Option<RowId>,
    pub(crate) child_rows: Vec<RowId>,
    pub(crate) parent_rows: Option<Arc<[RowId]>>,
}

impl Row {
    pub(crate) fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            is_new: false,
            modified: false,
            removed: false,
            merged: false,
            focusable: true,
            can_change: true,
            can_remove: true,
            nosave: false,
            collapsed: false,
            parent_collapsed: false,
            errors: None,
            save_request: None,
            parent_row: None,
            child_rows: Vec::new(),
            parent_rows: None,
        }
    }

    /// Number of slots, including the index slot and all state blocks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn flag(&self, flag: RowFlag) -> bool {
        match flag {
            RowFlag::IsNew => self.is_new,
            RowFlag::Modified => self.modified,
            RowFlag::Removed => self.removed,
            RowFlag::Merged => self.merged,
            RowFlag::Focusable => self.focusable,
            RowFlag::CanChange => self.can_change,
            RowFlag::CanRemove => self.can_remove,
            RowFlag::Nosave => self.nosave,
            RowFlag::Collapsed => self.collapsed,
        }
    }

    pub(crate) fn flag_mut(&mut self, flag: RowFlag) -> &mut bool {
        match flag {
            RowFlag::IsNew => &mut self.is_new,
            RowFlag::Modified => &mut self.modified,
            RowFlag::Removed => &mut self.removed,
            RowFlag::Merged => &mut self.merged,
            RowFlag::Focusable => &mut self.focusable,
            RowFlag::CanChange => &mut self.can_change,
            RowFlag::CanRemove => &mut self.can_remove,
            RowFlag::Nosave => &mut self.nosave,
            RowFlag::Collapsed => &mut self.collapsed,
        }
    }

    /// Row-level validation result, if the row has been validated.
    pub fn errors(&self) -> Option<&Errors> {
        self.errors.as_ref()
    }

    pub fn is_saving(&self) -> bool {
        self.save_request.is_some()
    }

    pub fn parent_row(&self) -> Option<RowId> {
        self.parent_row
    }

    pub fn child_rows(&self) -> &[RowId] {
        &self.child_rows
    }

    /// Ancestor chain, closest parent first.
    pub fn parent_rows(&self) -> &[RowId] {
        self.parent_rows.as_deref().unwrap_or(&[])
    }

    /// Tree depth: 0 for a root row.
    pub fn depth(&self) -> usize {
        self.parent_rows().len()
    }

    pub fn is_parent_collapsed(&self) -> bool {
        self.parent_collapsed
    }
}
