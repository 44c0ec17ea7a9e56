//! Record sink — idempotent persistence for decoded records.
//!
//! Sinks must dedupe on the record's natural key and report duplicates with
//! the explicit `DuplicateKey` variant; the scanner swallows those (expected
//! under at-least-once re-processing) and only logs other failures.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ScanRecord;

/// Errors a sink can report for a single record.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A record with the same natural key is already persisted. Expected
    /// whenever a block range is re-scanned; callers ignore it.
    #[error("duplicate key")]
    DuplicateKey,

    #[error("sink storage error: {0}")]
    Storage(String),
}

impl SinkError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey)
    }
}

/// Trait for persisting records produced by batches.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist one record, idempotent on `record.key`.
    ///
    /// Must be durable before returning: a later checkpoint advance implies
    /// all prior upserts of the batch are visible.
    async fn upsert(&self, record: ScanRecord) -> Result<(), SinkError>;
}
