//! Error types for Testbed

use thiserror::Error;

use crate::db::Dialect;

/// Result type alias using Testbed Error
pub type Result<T> = std::result::Result<T, Error>;

/// Testbed error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported database dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Dialect {dialect} is not available in this build (enable the `{feature}` feature)")]
    DialectUnavailable {
        dialect: Dialect,
        feature: &'static str,
    },

    #[error("Failed to connect to {dialect} database: {message}")]
    Connection { dialect: Dialect, message: String },

    #[error("SQL statement {index} failed on {dialect}: {message} (statement: {statement})")]
    SqlExecution {
        dialect: Dialect,
        index: usize,
        statement: String,
        message: String,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a failing statement at `index` of a batch
    pub fn sql(dialect: Dialect, index: usize, statement: &str, message: impl ToString) -> Self {
        Error::SqlExecution {
            dialect,
            index,
            statement: statement.to_string(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a connection failure
    pub fn connection(dialect: Dialect, message: impl ToString) -> Self {
        Error::Connection {
            dialect,
            message: message.to_string(),
        }
    }
}
