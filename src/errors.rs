//! Typed error hierarchy for folio.
//!
//! Two top-level enums cover the two places callers need to match on a
//! failure kind:
//! - `ResetError`: ledger, orchestrator and clearing-strategy failures
//! - `ConfigError`: configuration loading and validation failures
//!
//! Glue code (CLI commands, server startup) uses `anyhow::Result` and wraps
//! these with context.

use thiserror::Error;

use crate::reset::models::ResetStatus;

/// Errors from the factory-reset subsystem.
#[derive(Debug, Error)]
pub enum ResetError {
    #[error("Reset job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: ResetStatus,
        to: ResetStatus,
    },

    #[error("Collection '{name}' is protected and can never be cleared")]
    ProtectedCollection { name: String },

    #[error("Invalid collection name '{name}'")]
    InvalidCollectionName { name: String },

    #[error("Failed to clear collection '{collection}': {source}")]
    ClearFailed {
        collection: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from loading or validating `folio.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
