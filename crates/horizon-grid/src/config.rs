//! Rowset configuration.
//!
//! [`RowsetConfig`] carries everything a host sets on an engine before it is
//! bound: behaviour flags, column references, field attribute layers and
//! the data source. It can be built in code or loaded from TOML or JSON.

use std::path::{Path, PathBuf};

use horizon_grid_core::GridError;
use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::changeset::{RowState, RowVals, Rowset};
use crate::field::FieldLayers;
use crate::shared::SharedLimits;

/// Errors that can occur while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("Failed to parse TOML in '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The text is not valid JSON for this schema.
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension is neither `.toml` nor `.json`.
    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(PathBuf),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::Toml {
            path: path.into(),
            source,
        }
    }
}

impl From<ConfigError> for GridError {
    fn from(err: ConfigError) -> Self {
        GridError::Config(err.to_string())
    }
}

/// Configuration of one rowset engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowsetConfig {
    /// Name used for shared lookups, push notifications and
    /// `rowset_col_attrs` keys.
    pub rowset_name: Option<String>,
    /// Remote endpoint. Absent for client-side rowsets.
    pub rowset_url: Option<String>,
    /// In-memory snapshot the engine is bound to.
    pub static_rowset: Option<Rowset>,
    /// Saved row values of a static rowset, replacing its rows.
    pub row_vals: Option<Vec<RowVals>>,
    /// Saved row states of a static rowset, replacing its rows.
    pub row_states: Option<Vec<RowState>>,

    pub can_add_rows: bool,
    pub can_remove_rows: bool,
    pub can_change_rows: bool,
    pub can_sort_rows: bool,
    pub can_move_rows: bool,
    pub save_on_add_row: bool,
    pub save_on_remove_row: bool,
    pub save_on_input: bool,
    pub save_on_exit_row: bool,
    /// Static rowsets save to `row_states` instead of `row_vals`.
    pub save_row_states: bool,

    /// Master/detail parameters: `"param[=master_col] ..."`.
    pub params: Option<String>,
    pub order_by: Option<String>,
    pub id_col: Option<String>,
    pub parent_col: Option<String>,
    pub pos_col: Option<String>,
    pub tree_col: Option<String>,

    #[serde(flatten)]
    pub fields: FieldLayers,

    pub shared: SharedLimits,
}

impl Default for RowsetConfig {
    fn default() -> Self {
        Self {
            rowset_name: None,
            rowset_url: None,
            static_rowset: None,
            row_vals: None,
            row_states: None,
            can_add_rows: true,
            can_remove_rows: true,
            can_change_rows: true,
            can_sort_rows: true,
            can_move_rows: false,
            save_on_add_row: false,
            save_on_remove_row: true,
            save_on_input: false,
            save_on_exit_row: true,
            save_row_states: false,
            params: None,
            order_by: None,
            id_col: None,
            parent_col: None,
            pos_col: None,
            tree_col: None,
            fields: FieldLayers::default(),
            shared: SharedLimits::default(),
        }
    }
}

impl RowsetConfig {
    /// A client-side config bound to an in-memory snapshot.
    pub fn with_rowset(rowset: Rowset) -> Self {
        Self {
            static_rowset: Some(rowset),
            ..Default::default()
        }
    }

    /// A remote config loading from `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            rowset_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text).map_err(|e| ConfigError::toml(path, e))?,
            Some("json") => Self::from_json_str(&text)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        tracing::debug!(target: targets::CONFIG, path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Whether the rowset filters itself on parameter values instead of
    /// asking a server for filtered rows.
    pub fn is_client_side(&self) -> bool {
        self.rowset_url.is_none()
    }
}
