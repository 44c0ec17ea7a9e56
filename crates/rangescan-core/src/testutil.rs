//! Mock event source and sink shared by the crate's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::sink::{RecordSink, SinkError};
use crate::source::{EventSource, RawEvent, SourceFilter};
use crate::types::ScanRecord;

/// Deterministic chain mock: one event at every block divisible by
/// `event_every` (0 = no events), optional per-call delay and failure
/// injection.
pub struct MockSource {
    head: AtomicU64,
    event_every: u64,
    delay: Option<Duration>,
    fail_span: Option<(u64, u64)>,
    /// Remaining number of `chain_head` calls that fail.
    fail_head_remaining: AtomicU64,
}

impl MockSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            event_every: 0,
            delay: None,
            fail_span: None,
            fail_head_remaining: AtomicU64::new(0),
        }
    }

    pub fn event_every(mut self, blocks: u64) -> Self {
        self.event_every = blocks;
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    /// Fetches overlapping `[from, to]` fail with an RPC error.
    pub fn fail_span(mut self, from: u64, to: u64) -> Self {
        self.fail_span = Some((from, to));
        self
    }

    /// Every `chain_head` call fails.
    pub fn fail_head(self) -> Self {
        self.fail_head_times(u64::MAX)
    }

    /// The next `n` `chain_head` calls fail, then recover.
    pub fn fail_head_times(self, n: u64) -> Self {
        self.fail_head_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSource for MockSource {
    async fn chain_head(&self) -> Result<u64, ScanError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.fail_head_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u64::MAX {
                self.fail_head_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(ScanError::Rpc("chain head unavailable".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn events(
        &self,
        _filter: &SourceFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>, ScanError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((fail_from, fail_to)) = self.fail_span {
            if from_block <= fail_to && to_block >= fail_from {
                return Err(ScanError::Rpc("log fetch timed out".into()));
            }
        }
        if self.event_every == 0 {
            return Ok(vec![]);
        }
        let mut events = Vec::new();
        let mut block = from_block.div_ceil(self.event_every) * self.event_every;
        while block <= to_block {
            if block > 0 {
                events.push(RawEvent {
                    address: "0xfeed".into(),
                    topics: vec!["0xddf2".into()],
                    data: "0x".into(),
                    block_number: block,
                    tx_hash: format!("0x{block:064x}"),
                    log_index: 0,
                });
            }
            block += self.event_every;
        }
        Ok(events)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64, ScanError> {
        Ok(block_number as i64 * 12)
    }
}

/// In-memory sink that dedupes on the natural key and counts duplicates.
#[derive(Default)]
pub struct MockSink {
    records: Mutex<HashMap<String, ScanRecord>>,
    duplicate_hits: AtomicU64,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn duplicate_hits(&self) -> u64 {
        self.duplicate_hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for MockSink {
    async fn upsert(&self, record: ScanRecord) -> Result<(), SinkError> {
        let key = record.key.to_string();
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&key) {
            self.duplicate_hits.fetch_add(1, Ordering::SeqCst);
            return Err(SinkError::DuplicateKey);
        }
        records.insert(key, record);
        Ok(())
    }
}
