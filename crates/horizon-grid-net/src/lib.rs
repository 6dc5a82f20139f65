//! Transport for Horizon Grid.
//!
//! The data engine in `horizon-grid` never performs I/O. This crate connects
//! it to rowset stores:
//!
//! - **Transports**: [`HttpTransport`] (JSON over HTTP) and
//!   [`MemoryTransport`] (an in-process store), behind [`RowsetTransport`]
//! - **Driver**: [`RowsetDriver`] performs an engine's loads and saves on the
//!   tokio runtime, with cancellation of superseded loads
//! - **Push**: [`PushRouter`] turns push notifications into diff-merge
//!   reloads of every bound engine
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use horizon_grid::{ReloadOptions, RowsetConfig, RowsetModel};
//! use horizon_grid_net::{HttpClient, HttpTransport, RowsetDriver};
//!
//! let transport = Arc::new(HttpTransport::new(HttpClient::new()?));
//! let model = RowsetModel::new(RowsetConfig::with_url("https://example.com/rowsets/items"));
//! let driver = RowsetDriver::with_model(model, transport);
//!
//! // Fetch the first snapshot
//! driver.reload(ReloadOptions::default()).await;
//!
//! // Edit, then save
//! {
//!     let mut model = driver.model().lock();
//!     let row = model.rows()[0];
//!     model.set_cell_val(row, "name", "Anna", true)?;
//! }
//! driver.save().await;
//! ```

mod client;
mod driver;
mod error;
mod push;
mod transport;

pub use client::{HttpClient, HttpClientBuilder, HttpClientConfig};
pub use driver::RowsetDriver;
pub use error::{Result, TransportError};
pub use push::{EmptyPushMessage, PushMessage, PushRouter};
pub use transport::{HttpTransport, MemoryTransport, RowsetTransport};
