//! Error types for Horizon Grid.

use std::fmt;

/// The main error type for Horizon Grid operations.
///
/// These are caller errors: a reference to something the engine does not
/// have, or malformed configuration text. Validation failures and server
/// rejections are carried as data, never as `GridError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    /// No field with this name exists.
    UnknownColumn(String),
    /// The row handle is stale or belongs to another engine.
    UnknownRow,
    /// An `order_by` expression could not be parsed.
    InvalidOrderBy(String),
    /// A range definition (`col/offset/unit/freq`) could not be parsed.
    InvalidRangeDef(String),
    /// The operation is not permitted by the engine's configuration.
    NotAllowed(&'static str),
    /// Configuration could not be read or parsed.
    Config(String),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn(col) => write!(f, "Unknown column: {col}"),
            Self::UnknownRow => write!(f, "Row does not exist"),
            Self::InvalidOrderBy(s) => write!(f, "Invalid order_by: {s}"),
            Self::InvalidRangeDef(s) => write!(f, "Invalid range definition: {s}"),
            Self::NotAllowed(op) => write!(f, "Operation not allowed: {op}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for GridError {}

/// A specialized Result type for Horizon Grid operations.
pub type Result<T> = std::result::Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            GridError::UnknownColumn("price".into()).to_string(),
            "Unknown column: price"
        );
        assert_eq!(GridError::UnknownRow.to_string(), "Row does not exist");
    }
}
