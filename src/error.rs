//! Error handling module
//!
//! Provides the unified error type for a statdiff run. Every variant is fatal:
//! the run stops, a message is printed and the process exits non-zero.

use crate::config::ConfigError;
use thiserror::Error;
use tracing::{debug, error};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DataSource(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Malformed snapshot: {0}")]
    Format(String),

    #[error("{0}")]
    Precondition(String),

    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Stable machine-readable code for this error class
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DataSource(_) | AppError::Pool(_) | AppError::Connection(_) => {
                "DATA_SOURCE_ERROR"
            }
            AppError::Format(_) => "FORMAT_ERROR",
            AppError::Precondition(_) => "PRECONDITION_VIOLATION",
            AppError::InternalConsistency(_) => "INTERNAL_CONSISTENCY_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Log driver-level detail; the user-facing message is printed by main
    pub fn log(&self) {
        match self {
            AppError::DataSource(e) => debug!(code = self.code(), "Database error: {:?}", e),
            AppError::Pool(e) => debug!(code = self.code(), "Pool error: {:?}", e),
            AppError::InternalConsistency(msg) => {
                error!(code = self.code(), "Diff engine invariant broken: {}", msg)
            }
            other => debug!(code = other.code(), "{:?}", other),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Format(err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

/// Helper function to create a precondition violation
pub fn precondition_error(msg: impl Into<String>) -> AppError {
    AppError::Precondition(msg.into())
}
