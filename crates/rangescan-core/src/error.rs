//! Error types for the rangescan pipeline.

use thiserror::Error;

/// Errors that can occur while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Returns `true` for failures the scheduler should retry on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}
