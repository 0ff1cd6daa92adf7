//! Unified error types for the sync engine
//!
//! This module defines error types that:
//! - Are serializable so a presentation layer can forward them as-is
//! - Separate recoverable network and persistence failures
//! - Never reach the merge, reconcile or view code paths, which are total

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for mailbox operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Whether the failure came from the remote source
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

// Implement From for common error types

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(err: r2d2::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<String> for SyncError {
    fn from(err: String) -> Self {
        SyncError::Other(err)
    }
}

impl From<&str> for SyncError {
    fn from(err: &str) -> Self {
        SyncError::Other(err.to_string())
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
