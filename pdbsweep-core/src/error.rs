//! Error types for the pdbsweep-core crate.

use thiserror::Error;

/// Top-level error type for sweep operations.
///
/// A trainer that exits non-zero is not an error: it is recorded as
/// [`RunStatus::Failed`](crate::training::RunStatus::Failed) and the sweep moves on.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid run configuration: {0}")]
    InvalidRun(String),

    #[error("Sweep file error: {0}")]
    SweepFile(String),

    #[error("Failed to spawn trainer: {0}")]
    Spawn(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SweepError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_run(msg: impl Into<String>) -> Self {
        Self::InvalidRun(msg.into())
    }

    pub fn sweep_file(msg: impl Into<String>) -> Self {
        Self::SweepFile(msg.into())
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<figment::Error> for SweepError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, SweepError>;
