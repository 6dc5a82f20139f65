//! Core systems for Horizon Grid.
//!
//! This crate provides the foundational pieces shared by the data engine and
//! its network transport:
//!
//! - **Signal/Slot System**: Type-safe, synchronous change notification
//! - **Logging**: `tracing` targets and span names for every subsystem
//! - **Errors**: The caller-error type used across the workspace
//!
//! # Signal/Slot Example
//!
//! ```
//! use horizon_grid_core::Signal;
//!
//! let saved = Signal::<()>::new();
//! let conn_id = saved.connect(|_| println!("saved"));
//! saved.emit(());
//! saved.disconnect(conn_id);
//! ```

mod error;
pub mod logging;
pub mod signal;

pub use error::{GridError, Result};
pub use logging::PerfSpan;
pub use signal::{ConnectionId, Signal};
