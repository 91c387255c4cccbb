//! Error types for the dispatch core
//!
//! Programming errors in the session protocol are surfaced as `SessionError`
//! and are never retriable. Correlation misses are not errors at all: they are
//! absorbed through `UnknownActivityAborted`.

use thiserror::Error;

use crate::cell::CellId;

/// Misuse of the session protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Constraints must be provided when starting a constrained session")]
    MissingConstraints,

    #[error("Activity {activity_id} has no result yet")]
    ResultMissing { activity_id: i64 },
}

/// Failures raised by a cell selector stage or while building the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Selector '{selector}' failed: {reason}")]
    Failed { selector: String, reason: String },

    #[error("Cell selection cancelled")]
    Cancelled,

    #[error("Invalid configuration for selector plugin '{plugin}': {reason}")]
    InvalidConfig { plugin: String, reason: String },

    #[error("Unknown selector plugin '{0}'")]
    UnknownPlugin(String),
}

impl SelectorError {
    pub fn failed(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(plugin: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from the coordinating engine's cell registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Cell {0} is not attached")]
    UnknownCell(CellId),

    #[error("Cell {0} is already attached")]
    DuplicateCell(CellId),
}
