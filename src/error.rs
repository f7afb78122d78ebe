//! Error types for aggview
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is the [`ViewError`] enum below.

use thiserror::Error;

/// Result type alias for aggview operations
pub type Result<T> = std::result::Result<T, ViewError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewError {
    // =========================================================================
    // Schema and row errors
    // =========================================================================
    /// Column not present in the table schema or the view output
    #[error("No column '{0}'")]
    ColumnNotFound(String),

    /// A NULL was written to a NOT NULL column
    #[error("column '{0}' is not nullable")]
    NotNullable(String),

    /// A value did not match the declared column type
    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    /// Row index outside the table
    #[error("row {index} out of range [0, {len})")]
    RowOutOfRange { index: usize, len: usize },

    // =========================================================================
    // Cursor errors
    // =========================================================================
    /// The cursor is not positioned on a row
    #[error("no current row")]
    NoCurrentRow,

    /// Unsupported character in a navigation command string
    #[error("Invalid navigation command: '{0}', should consist of '+', '-', '>', '<' and '=' only")]
    InvalidNavigation(String),

    // =========================================================================
    // Definition and evaluation errors
    // =========================================================================
    /// Expression text could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// View definition is structurally invalid
    #[error("invalid view definition: {0}")]
    InvalidDefinition(String),

    /// Operand types are not valid for an operator
    #[error("invalid operands for '{op}': {left} and {right}")]
    InvalidOperands {
        op: &'static str,
        left: String,
        right: String,
    },

    /// Integer arithmetic overflowed
    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),

    // =========================================================================
    // Ambient errors
    // =========================================================================
    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// JSON export failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ViewError {
    fn from(err: serde_json::Error) -> Self {
        ViewError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ViewError::ColumnNotFound("asdfasdf".to_string());
        assert!(err.to_string().contains("No column"));

        let err = ViewError::InvalidNavigation("=s><+-".to_string());
        assert!(err.to_string().contains("Invalid navigation command"));
    }
}
