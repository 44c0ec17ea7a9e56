//! Range partitioner — divides the block domain among workers.
//!
//! `[genesis, latest]` is split into `worker_count` contiguous ranges of
//! `ceil(span / worker_count)` blocks. The last range is open-ended so its
//! worker tracks the chain head; all others are bounded. Adjacent ranges
//! share their boundary (`ranges[i].end == ranges[i+1].start`): no gaps,
//! no overlap.

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointStore, WorkerCheckpoint};
use crate::error::ScanError;

/// One worker's share of the block domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    /// Start of the range. Effective coverage is `(start, end]` since
    /// `last_indexed_block` starts at `start`.
    pub start: u64,
    /// End of the range; `None` = open-ended (track chain head).
    pub end: Option<u64>,
}

/// Partition `[genesis, latest_block]` into `worker_count` ranges.
pub fn partition(genesis: u64, latest_block: u64, worker_count: u32) -> Vec<BlockRange> {
    assert!(worker_count >= 1, "worker_count must be >= 1");

    // A head behind genesis is an empty domain; clamp so every bounded
    // range stays well-formed (start <= end).
    let latest_block = latest_block.max(genesis);
    let span = latest_block.saturating_sub(genesis);
    let size = span.div_ceil(worker_count as u64).max(1);

    let mut ranges = Vec::with_capacity(worker_count as usize);
    let mut start = genesis;
    for i in 0..worker_count {
        if i == worker_count - 1 {
            ranges.push(BlockRange { start, end: None });
        } else {
            let end = (start + size).min(latest_block);
            ranges.push(BlockRange { start, end: Some(end) });
            start = end;
        }
    }
    ranges
}

/// Persist fresh checkpoints for a new partitioning of `stream`.
///
/// Destructive: every worker's `range_start`, `range_end`, and
/// `last_indexed_block` are reset, discarding any prior progress. Used on
/// first start and when the failsafe re-partitions with fewer workers.
pub async fn apply_partitions(
    store: &dyn CheckpointStore,
    stream: &str,
    ranges: &[BlockRange],
) -> Result<(), ScanError> {
    // Drop checkpoints of workers that no longer exist under the new count.
    for stale in store.list(stream).await? {
        if stale.worker_id as usize >= ranges.len() {
            store.delete(stream, stale.worker_id).await?;
        }
    }
    for (worker_id, range) in ranges.iter().enumerate() {
        let cp = WorkerCheckpoint::new(stream, worker_id as u32, range.start, range.end);
        store.save(cp).await?;
    }
    Ok(())
}
