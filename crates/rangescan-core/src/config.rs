//! Scanner configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a scan stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// First block of the domain (contract deployment / genesis offset).
    pub genesis_block: u64,
    /// Blocks per single event-source query. Ranges larger than this are
    /// sub-chunked inside a batch.
    pub chunk_size: u64,
    /// Blocks consumed per scheduler tick (one batch).
    pub batch_size: u64,
    /// Number of partitioned workers per stream.
    pub worker_count: u32,
    /// Floor for the RPC failsafe's worker-count reduction.
    pub min_workers: u32,
    /// Scheduler tick interval in milliseconds.
    pub interval_ms: u64,
    /// Delay between sub-chunk fetches (rate-limit smoothing).
    pub chunk_delay_ms: u64,
    /// A donor must have more than `2 ×` this many blocks remaining before a
    /// steal is attempted, and a steal never takes fewer than this.
    pub min_steal_blocks: u64,
    /// Donor reservations older than this are treated as expired.
    pub reservation_ttl_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            genesis_block: 0,
            chunk_size: 2_000,
            batch_size: 10_000,
            worker_count: 4,
            min_workers: 1,
            interval_ms: 5_000,
            chunk_delay_ms: 50,
            min_steal_blocks: 500_000,
            reservation_ttl_secs: 60,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first block of the domain.
    pub fn genesis_block(mut self, block: u64) -> Self {
        self.genesis_block = block;
        self
    }

    /// Set the blocks-per-fetch chunk size.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the blocks-per-tick batch size.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the partitioned worker count.
    pub fn worker_count(mut self, count: u32) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the minimum worker count for the RPC failsafe.
    pub fn min_workers(mut self, count: u32) -> Self {
        self.min_workers = count;
        self
    }

    /// Set the scheduler tick interval in milliseconds.
    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    /// Set the inter-chunk delay in milliseconds.
    pub fn chunk_delay_ms(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = ms;
        self
    }

    /// Set the minimum steal size in blocks.
    pub fn min_steal_blocks(mut self, blocks: u64) -> Self {
        self.min_steal_blocks = blocks;
        self
    }

    /// Validate invariants that the scheduler relies on.
    pub fn validate(&self) -> Result<(), crate::error::ScanError> {
        if self.worker_count == 0 {
            return Err(crate::error::ScanError::Config(
                "worker_count must be >= 1".into(),
            ));
        }
        if self.min_workers == 0 || self.min_workers > self.worker_count {
            return Err(crate::error::ScanError::Config(format!(
                "min_workers must be in 1..={}",
                self.worker_count
            )));
        }
        if self.chunk_size == 0 || self.batch_size == 0 {
            return Err(crate::error::ScanError::Config(
                "chunk_size and batch_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}
