//! Tree builder.
//!
//! Derives a parent/child hierarchy from an id column and a parent column.
//! Membership lives in [`Tree`] (the root list) and on the rows themselves
//! (`parent_row`, `child_rows`, `parent_rows`). Every walk keeps a visited
//! set, and a relation that does not reach every row from the roots is
//! treated as cyclic: the tree is discarded and rows are presented flat.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use horizon_grid_core::logging::{span_names, targets};
use horizon_grid_core::PerfSpan;

use crate::index::{IndexCache, RangeDefs};
use crate::row::RowId;
use crate::store::RowStore;
use crate::value::Value;

/// Outcome of [`Tree::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeBuild {
    /// The hierarchy was built.
    Built,
    /// The parent relation contains a cycle; rows are flat.
    Cycle,
    /// The id or parent column is missing; rows are flat.
    Unavailable,
}

/// Root list plus activity flag of a rowset's hierarchy.
#[derive(Debug, Default, Clone)]
pub struct Tree {
    active: bool,
    root_rows: Vec<RowId>,
}

impl Tree {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn root_rows(&self) -> &[RowId] {
        &self.root_rows
    }

    /// Drop all hierarchy state, leaving rows flat.
    pub fn reset(&mut self, store: &mut RowStore) {
        self.active = false;
        self.root_rows.clear();
        let rows = store.all_rows().to_vec();
        for row in rows {
            if let Some(r) = store.row_mut(row) {
                r.parent_row = None;
                r.child_rows.clear();
                r.parent_rows = None;
                r.parent_collapsed = false;
            }
        }
    }

    /// Build the hierarchy over every row of `store`.
    ///
    /// A row whose parent id matches no row becomes a root (with a warning).
    pub fn build(
        &mut self,
        store: &mut RowStore,
        cache: &mut IndexCache,
        id_col: &str,
        parent_col: &str,
    ) -> TreeBuild {
        let _span = PerfSpan::new(span_names::TREE_BUILD);
        self.reset(store);
        let Some(parent_fi) = store.field_index(parent_col) else {
            return TreeBuild::Unavailable;
        };
        let links: Vec<(RowId, Option<RowId>)> = {
            let index = match cache.index(store, id_col, &RangeDefs::new()) {
                Ok(index) => index,
                Err(err) => {
                    tracing::warn!(target: targets::TREE, %err, "id column unavailable");
                    return TreeBuild::Unavailable;
                }
            };
            store
                .all_rows()
                .iter()
                .map(|&row| {
                    let parent = match store.cell_val(row, parent_fi) {
                        Some(pid) if !pid.is_null() => {
                            let found = index.lookup(std::slice::from_ref(pid)).first().copied();
                            if found.is_none() {
                                tracing::warn!(target: targets::TREE, parent = %pid, "parent row not found");
                            }
                            found
                        }
                        _ => None,
                    };
                    (row, parent)
                })
                .collect()
        };

        self.active = true;
        for (row, parent) in links {
            self.attach(store, row, parent);
        }

        let reached = self.init_parent_rows(store, None);
        if reached != store.row_count() {
            tracing::warn!(
                target: targets::TREE,
                unreachable = store.row_count() - reached,
                "circular parent references, presenting rows flat"
            );
            self.reset(store);
            return TreeBuild::Cycle;
        }
        tracing::debug!(target: targets::TREE, roots = self.root_rows.len(), "tree built");
        TreeBuild::Built
    }

    /// Append `row` to `parent`'s children, or to the roots.
    pub fn attach(&mut self, store: &mut RowStore, row: RowId, parent: Option<RowId>) {
        if let Some(r) = store.row_mut(row) {
            r.parent_row = parent;
        }
        match parent.and_then(|p| store.row_mut(p)) {
            Some(p) => p.child_rows.push(row),
            None => self.root_rows.push(row),
        }
    }

    /// Unlink `row` from its parent's children (or the roots).
    ///
    /// A parent left without children is no longer collapsed.
    pub fn detach(&mut self, store: &mut RowStore, row: RowId) {
        let parent = store.row(row).and_then(|r| r.parent_row);
        match parent.and_then(|p| store.row_mut(p)) {
            Some(p) => {
                p.child_rows.retain(|&c| c != row);
                if p.child_rows.is_empty() {
                    p.collapsed = false;
                }
            }
            None => self.root_rows.retain(|&c| c != row),
        }
        if let Some(r) = store.row_mut(row) {
            r.parent_row = None;
            r.parent_rows = None;
        }
    }

    /// Compute ancestor chains top-down from `start` (or from the roots).
    ///
    /// All children of a row share one chain. Returns the number of rows
    /// reached.
    pub fn init_parent_rows(&self, store: &mut RowStore, start: Option<RowId>) -> usize {
        let mut visited = HashSet::new();
        let mut stack: Vec<(Vec<RowId>, Arc<[RowId]>)> = match start {
            Some(row) => {
                let chain = chain_below(store, store.row(row).and_then(|r| r.parent_row));
                vec![(vec![row], chain)]
            }
            None => vec![(self.root_rows.clone(), Arc::from([]))],
        };
        while let Some((rows, chain)) = stack.pop() {
            for row in rows {
                if !visited.insert(row) {
                    continue;
                }
                let Some(r) = store.row_mut(row) else {
                    continue;
                };
                r.parent_rows = Some(chain.clone());
                if !r.child_rows.is_empty() {
                    let child_chain: Arc<[RowId]> = std::iter::once(row).chain(chain.iter().copied()).collect();
                    stack.push((r.child_rows.clone(), child_chain));
                }
            }
        }
        visited.len()
    }

    /// Whether making `parent` the parent of `row` would close a cycle.
    pub fn would_cycle(store: &RowStore, row: RowId, parent: Option<RowId>) -> bool {
        let Some(parent) = parent else {
            return false;
        };
        parent == row
            || store
                .row(parent)
                .is_some_and(|p| p.parent_rows().contains(&row))
    }

    /// Move `row` (with its subtree) under `parent`. Refuses cycles.
    pub fn reparent(&mut self, store: &mut RowStore, row: RowId, parent: Option<RowId>) -> bool {
        if !self.active || Self::would_cycle(store, row, parent) {
            return false;
        }
        self.detach(store, row);
        self.attach(store, row, parent);
        self.init_parent_rows(store, Some(row));
        let collapsed = parent
            .and_then(|p| store.row(p))
            .is_some_and(|p| p.collapsed || p.parent_collapsed);
        let mut hide_children = collapsed;
        if let Some(r) = store.row_mut(row) {
            r.parent_collapsed = collapsed;
            hide_children |= r.collapsed;
        }
        set_parent_collapsed(store, row, hide_children);
        true
    }

    /// Collapse or expand `row` (or every root when `None`).
    pub fn set_collapsed(&self, store: &mut RowStore, row: Option<RowId>, collapsed: bool, recursive: bool) {
        if !self.active {
            return;
        }
        let targets: Vec<RowId> = match row {
            Some(row) => vec![row],
            None => self.root_rows.clone(),
        };
        for row in targets {
            let Some(r) = store.row_mut(row) else {
                continue;
            };
            if r.child_rows.is_empty() {
                continue;
            }
            if recursive {
                set_collapsed_all(store, row, collapsed);
            } else if r.collapsed != collapsed {
                r.collapsed = collapsed;
                set_parent_collapsed(store, row, collapsed);
            }
        }
    }

    /// Descendants of `row`, each subtree before its root.
    pub fn each_child_row(store: &RowStore, row: RowId) -> Vec<RowId> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([row]);
        // (row, position of its next child to visit)
        let mut stack = vec![(row, 0)];
        while let Some((cur, pos)) = stack.pop() {
            match store.row(cur).and_then(|r| r.child_rows().get(pos).copied()) {
                Some(child) => {
                    stack.push((cur, pos + 1));
                    if visited.insert(child) {
                        stack.push((child, 0));
                    }
                }
                None if cur != row => out.push(cur),
                None => {}
            }
        }
        out
    }

    /// Number of descendants shown when `row` is expanded.
    pub fn expanded_child_row_count(store: &RowStore, row: RowId) -> usize {
        let mut count = 0;
        let mut visited = HashSet::from([row]);
        let mut stack = vec![row];
        while let Some(row) = stack.pop() {
            let Some(r) = store.row(row) else {
                continue;
            };
            for &child in r.child_rows() {
                if !visited.insert(child) {
                    continue;
                }
                count += 1;
                if store.row(child).is_some_and(|c| !c.collapsed) {
                    stack.push(child);
                }
            }
        }
        count
    }

    /// Sort every sibling list with `cmp`.
    pub fn sort_children<F>(&mut self, store: &mut RowStore, cmp: F)
    where
        F: Fn(&RowStore, RowId, RowId) -> Ordering,
    {
        let mut roots = std::mem::take(&mut self.root_rows);
        roots.sort_by(|&a, &b| cmp(&*store, a, b));
        self.root_rows = roots;

        let mut visited = HashSet::new();
        let mut stack = self.root_rows.clone();
        while let Some(row) = stack.pop() {
            if !visited.insert(row) {
                continue;
            }
            let Some(mut children) = store.row_mut(row).map(|r| std::mem::take(&mut r.child_rows)) else {
                continue;
            };
            if children.len() > 1 {
                children.sort_by(|&a, &b| cmp(&*store, a, b));
            }
            stack.extend(children.iter().copied());
            if let Some(r) = store.row_mut(row) {
                r.child_rows = children;
            }
        }
    }

    /// Pre-order traversal of the rows for which `visible` holds. A row
    /// that is not visible hides its subtree.
    pub fn flatten<F>(&self, store: &RowStore, visible: F) -> Vec<RowId>
    where
        F: Fn(RowId) -> bool,
    {
        let mut out = Vec::with_capacity(store.row_count());
        let mut visited = HashSet::new();
        let mut stack: Vec<RowId> = self.root_rows.iter().rev().copied().collect();
        while let Some(row) = stack.pop() {
            if !visited.insert(row) || !visible(row) {
                continue;
            }
            out.push(row);
            if let Some(r) = store.row(row) {
                stack.extend(r.child_rows().iter().rev().copied());
            }
        }
        out
    }

    /// Replace the child list of `parent` (or the roots) with a permutation
    /// of it.
    pub fn reorder_children(&mut self, store: &mut RowStore, parent: Option<RowId>, rows: Vec<RowId>) {
        match parent.and_then(|p| store.row_mut(p)) {
            Some(p) => p.child_rows = rows,
            None => self.root_rows = rows,
        }
    }

    /// The sibling list `row` belongs to.
    pub fn siblings<'a>(&'a self, store: &'a RowStore, row: RowId) -> &'a [RowId] {
        match store.row(row).and_then(|r| r.parent_row).and_then(|p| store.row(p)) {
            Some(parent) => parent.child_rows(),
            None => &self.root_rows,
        }
    }

    /// Id value of the parent a row should carry in its parent column.
    pub fn parent_id(store: &RowStore, parent: Option<RowId>, id_fi: usize) -> Value {
        parent
            .and_then(|p| store.cell_val(p, id_fi))
            .cloned()
            .unwrap_or_default()
    }
}

fn chain_below(store: &RowStore, parent: Option<RowId>) -> Arc<[RowId]> {
    match parent.and_then(|p| store.row(p).map(|r| (p, r))) {
        Some((p, r)) => std::iter::once(p).chain(r.parent_rows().iter().copied()).collect(),
        None => Arc::from([]),
    }
}

fn set_parent_collapsed(store: &mut RowStore, row: RowId, collapsed: bool) {
    let mut visited = HashSet::from([row]);
    let mut stack = vec![row];
    while let Some(row) = stack.pop() {
        let children = store.row(row).map(|r| r.child_rows.clone()).unwrap_or_default();
        for child in children {
            if !visited.insert(child) {
                continue;
            }
            if let Some(c) = store.row_mut(child) {
                c.parent_collapsed = collapsed;
                if !c.collapsed {
                    stack.push(child);
                }
            }
        }
    }
}

fn set_collapsed_all(store: &mut RowStore, row: RowId, collapsed: bool) {
    let mut visited = HashSet::from([row]);
    let mut stack = vec![row];
    while let Some(row) = stack.pop() {
        let Some(r) = store.row_mut(row) else {
            continue;
        };
        if r.child_rows.is_empty() {
            continue;
        }
        r.collapsed = collapsed;
        let children = r.child_rows.clone();
        for child in children {
            if !visited.insert(child) {
                continue;
            }
            if let Some(c) = store.row_mut(child) {
                c.parent_collapsed = collapsed;
            }
            stack.push(child);
        }
    }
}
