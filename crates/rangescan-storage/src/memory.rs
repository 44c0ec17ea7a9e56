//! In-memory storage backend.
//!
//! Stores checkpoints, records, and coverage gaps in RAM. Useful for tests
//! and short-lived scans that don't need persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use rangescan_core::checkpoint::{indexer_name, CheckpointStore, CoverageGap, WorkerCheckpoint};
use rangescan_core::error::ScanError;
use rangescan_core::sink::{RecordSink, SinkError};
use rangescan_core::types::ScanRecord;

/// In-memory scanner storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, WorkerCheckpoint>>,
    records: Mutex<HashMap<String, ScanRecord>>,
    gaps: Mutex<Vec<CoverageGap>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted records for a stream, ordered by block then log index.
    pub fn records_by_stream(&self, stream: &str) -> Vec<ScanRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.stream == stream)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.block_number, r.key.log_index));
        records
    }

    /// Total number of persisted records.
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Destructive reset: drop all checkpoints, records, and gaps of `stream`.
    pub fn reset_stream(&self, stream: &str) {
        self.checkpoints.lock().unwrap().retain(|_, cp| cp.stream != stream);
        self.records.lock().unwrap().retain(|_, r| r.stream != stream);
        self.gaps.lock().unwrap().retain(|g| g.stream != stream);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, stream: &str, worker_id: u32) -> Result<Option<WorkerCheckpoint>, ScanError> {
        let key = indexer_name(stream, worker_id);
        Ok(self.checkpoints.lock().unwrap().get(&key).cloned())
    }

    async fn save(&self, checkpoint: WorkerCheckpoint) -> Result<(), ScanError> {
        let key = checkpoint.indexer_name();
        self.checkpoints.lock().unwrap().insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, stream: &str, worker_id: u32) -> Result<(), ScanError> {
        let key = indexer_name(stream, worker_id);
        self.checkpoints.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn list(&self, stream: &str) -> Result<Vec<WorkerCheckpoint>, ScanError> {
        let mut out: Vec<_> = self
            .checkpoints
            .lock()
            .unwrap()
            .values()
            .filter(|cp| cp.stream == stream)
            .cloned()
            .collect();
        out.sort_by_key(|cp| cp.worker_id);
        Ok(out)
    }

    async fn record_gap(&self, gap: CoverageGap) -> Result<(), ScanError> {
        self.gaps.lock().unwrap().push(gap);
        Ok(())
    }

    async fn gaps(&self, stream: &str) -> Result<Vec<CoverageGap>, ScanError> {
        let mut out: Vec<_> = self
            .gaps
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.stream == stream)
            .cloned()
            .collect();
        out.sort_by_key(|g| g.from_block);
        Ok(out)
    }
}

#[async_trait]
impl RecordSink for InMemoryStorage {
    async fn upsert(&self, record: ScanRecord) -> Result<(), SinkError> {
        let key = record.key.to_string();
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&key) {
            return Err(SinkError::DuplicateKey);
        }
        records.insert(key, record);
        Ok(())
    }
}
