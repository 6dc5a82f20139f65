//! Logging facilities for Horizon Grid.
//!
//! Horizon Grid uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in the host application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_grid=debug,horizon_grid::index=trace")
//!     .init();
//! ```
//!
//! Every event emitted by the workspace names one of the [`targets`] below so
//! that a subsystem can be filtered independently.

/// Span names used throughout Horizon Grid for tracing.
pub mod span_names {
    /// Signal emission span.
    pub const SIGNAL: &str = "horizon_grid::signal";
    /// Index rebuild span.
    pub const INDEX_REBUILD: &str = "horizon_grid::index_rebuild";
    /// Tree construction span.
    pub const TREE_BUILD: &str = "horizon_grid::tree_build";
    /// Visible row sort span.
    pub const SORT: &str = "horizon_grid::sort";
    /// Changeset packing span.
    pub const PACK: &str = "horizon_grid::pack";
}

/// Target names for log filtering.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "horizon_grid_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "horizon_grid_core::signal";
    /// Field registry target.
    pub const FIELD: &str = "horizon_grid::field";
    /// Row store target.
    pub const STORE: &str = "horizon_grid::store";
    /// Index manager target.
    pub const INDEX: &str = "horizon_grid::index";
    /// Tree builder target.
    pub const TREE: &str = "horizon_grid::tree";
    /// Sort engine target.
    pub const SORT: &str = "horizon_grid::sort";
    /// Filter engine target.
    pub const FILTER: &str = "horizon_grid::filter";
    /// Validation target.
    pub const VALIDATE: &str = "horizon_grid::validate";
    /// Save pipeline target.
    pub const SAVE: &str = "horizon_grid::save";
    /// Load / reload target.
    pub const LOAD: &str = "horizon_grid::load";
    /// Shared lookup registry target.
    pub const SHARED: &str = "horizon_grid::shared";
    /// Configuration target.
    pub const CONFIG: &str = "horizon_grid::config";
    /// Network transport target.
    pub const TRANSPORT: &str = "horizon_grid_net::transport";
    /// Push notification target.
    pub const PUSH: &str = "horizon_grid_net::push";
}

/// A guard for timing an operation.
///
/// When dropped, the span closes, which lets a timing-aware subscriber
/// report the elapsed time.
///
/// ```ignore
/// use horizon_grid_core::logging::{PerfSpan, span_names};
///
/// fn rebuild() {
///     let _span = PerfSpan::new(span_names::INDEX_REBUILD);
///     // ... work ...
/// }
/// ```
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span, active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::debug_span!(target: "horizon_grid::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span() {
        let _span = PerfSpan::new(span_names::SORT);
    }

    #[test]
    fn test_targets_share_prefix() {
        for target in [targets::FIELD, targets::INDEX, targets::SAVE, targets::LOAD] {
            assert!(target.starts_with("horizon_grid::"));
        }
    }
}
