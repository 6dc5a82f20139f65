//! Shared lookup rowsets.
//!
//! Fields with a `lookup_rowset_name` validate their values against another
//! rowset. Many engines usually look up the same rowset, so lookup engines
//! live in a [`SharedRowsets`] registry keyed by rowset name, with explicit
//! reference counting. Unreferenced engines stay cached until the idle set
//! grows past the configured ceilings, then the least recently used ones
//! are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::RowsetModel;

/// Ceilings on what idle shared rowsets may hold before eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedLimits {
    pub max_unused_nav_count: usize,
    pub max_unused_row_count: usize,
    pub max_unused_val_count: usize,
}

impl Default for SharedLimits {
    fn default() -> Self {
        Self {
            max_unused_nav_count: 20,
            max_unused_row_count: 1_000_000,
            max_unused_val_count: 10_000_000,
        }
    }
}

/// Handle to a shared engine.
pub type SharedRowset = Arc<Mutex<RowsetModel>>;

/// Creates the engine for a rowset name on first acquisition.
pub type RowsetFactory = Box<dyn Fn(&str) -> RowsetModel + Send + Sync>;

struct Entry {
    model: SharedRowset,
    refs: usize,
    last_used: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    tick: u64,
}

/// Reference-counted registry of lookup engines.
pub struct SharedRowsets {
    inner: Mutex<Inner>,
    factory: RowsetFactory,
    limits: SharedLimits,
}

impl SharedRowsets {
    pub fn new<F>(limits: SharedLimits, factory: F) -> Self
    where
        F: Fn(&str) -> RowsetModel + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
            factory: Box::new(factory),
            limits,
        }
    }

    pub fn limits(&self) -> SharedLimits {
        self.limits
    }

    /// Take a reference to the engine for `name`, creating it if needed.
    ///
    /// Creating an engine first runs a collection pass over idle entries.
    pub fn acquire(&self, name: &str) -> SharedRowset {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(name) {
            entry.refs += 1;
            return entry.model.clone();
        }
        Self::collect(&mut inner, &self.limits);
        let model = Arc::new(Mutex::new((self.factory)(name)));
        let tick = inner.tick;
        inner.entries.insert(
            name.to_string(),
            Entry {
                model: model.clone(),
                refs: 1,
                last_used: tick,
            },
        );
        tracing::debug!(target: targets::SHARED, name, "shared rowset created");
        model
    }

    /// Drop a reference. The engine stays cached until collected.
    pub fn release(&self, name: &str) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        match inner.entries.get_mut(name) {
            Some(entry) if entry.refs > 0 => {
                entry.refs -= 1;
                if entry.refs == 0 {
                    entry.last_used = tick;
                }
            }
            _ => tracing::warn!(target: targets::SHARED, name, "release of unreferenced shared rowset"),
        }
    }

    /// The cached engine for `name`, without taking a reference.
    pub fn get(&self, name: &str) -> Option<SharedRowset> {
        self.inner.lock().entries.get(name).map(|e| e.model.clone())
    }

    pub fn ref_count(&self, name: &str) -> usize {
        self.inner.lock().entries.get(name).map_or(0, |e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict idle engines, oldest first, until the idle set is within limits.
    /// Returns the number of evicted engines.
    pub fn gc(&self) -> usize {
        Self::collect(&mut self.inner.lock(), &self.limits)
    }

    fn collect(inner: &mut Inner, limits: &SharedLimits) -> usize {
        let mut idle: Vec<(String, u64, usize, usize)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.refs == 0)
            .map(|(name, e)| {
                let model = e.model.lock();
                let rows = model.row_count();
                (name.clone(), e.last_used, rows, rows * model.fields().len())
            })
            .collect();
        let mut navs = idle.len();
        let mut rows: usize = idle.iter().map(|i| i.2).sum();
        let mut vals: usize = idle.iter().map(|i| i.3).sum();
        let over = |navs: usize, rows: usize, vals: usize| {
            navs > limits.max_unused_nav_count
                || rows > limits.max_unused_row_count
                || vals > limits.max_unused_val_count
        };
        if !over(navs, rows, vals) {
            return 0;
        }

        // Newest first, so that popping yields the oldest.
        idle.sort_by(|a, b| b.1.cmp(&a.1));
        let mut evicted = 0;
        while over(navs, rows, vals) {
            let Some((name, _, r, v)) = idle.pop() else {
                break;
            };
            inner.entries.remove(&name);
            tracing::debug!(target: targets::SHARED, name = %name, "shared rowset evicted");
            navs -= 1;
            rows -= r;
            vals -= v;
            evicted += 1;
        }
        evicted
    }
}

impl std::fmt::Debug for SharedRowsets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRowsets")
            .field("entries", &self.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
