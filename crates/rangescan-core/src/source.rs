//! Event source — the scanner's view of the chain.
//!
//! Implementations wrap a JSON-RPC provider (see `rangescan-evm`). The
//! scanner sub-chunks large ranges itself, so `events` is only ever called
//! with spans of at most the configured chunk size.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// A raw on-chain event as returned by the source, undecoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
}

/// Filter for which events to fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFilter {
    /// Only fetch events from these contract addresses (empty = all).
    pub addresses: Vec<String>,
    /// Only fetch events with this topic[0] (empty = all).
    pub topic0_values: Vec<String>,
}

impl SourceFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }
}

/// Trait for fetching chain data.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Current chain head block number.
    async fn chain_head(&self) -> Result<u64, ScanError>;

    /// Events in `[from_block, to_block]` (both inclusive) matching `filter`.
    async fn events(
        &self,
        filter: &SourceFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>, ScanError>;

    /// Unix timestamp of a block.
    async fn block_timestamp(&self, block_number: u64) -> Result<i64, ScanError>;
}

/// Split `[from, to]` (inclusive) into spans of at most `chunk_size` blocks.
pub fn chunk_spans(from: u64, to: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    assert!(chunk_size >= 1, "chunk_size must be >= 1");
    let mut spans = Vec::new();
    let mut start = from;
    while start <= to {
        let end = (start + chunk_size - 1).min(to);
        spans.push((start, end));
        start = end + 1;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_spans_split() {
        // 100..=2500 with chunk 1000 → three sub-fetches
        assert_eq!(
            chunk_spans(100, 2_500, 1_000),
            vec![(100, 1_099), (1_100, 2_099), (2_100, 2_500)]
        );
    }

    #[test]
    fn chunk_spans_exact_fit() {
        assert_eq!(chunk_spans(0, 1_999, 1_000), vec![(0, 999), (1_000, 1_999)]);
    }

    #[test]
    fn chunk_spans_single_block() {
        assert_eq!(chunk_spans(42, 42, 1_000), vec![(42, 42)]);
    }

    #[test]
    fn chunk_spans_empty_when_inverted() {
        assert!(chunk_spans(10, 9, 1_000).is_empty());
    }

    #[test]
    fn filter_builder() {
        let f = SourceFilter::address("0xabc").topic0("0xddf2");
        assert_eq!(f.addresses, vec!["0xabc"]);
        assert_eq!(f.topic0_values, vec!["0xddf2"]);
    }
}
