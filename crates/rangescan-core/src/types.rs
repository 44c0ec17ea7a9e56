//! Shared types for the scanning pipeline.

use serde::{Deserialize, Serialize};

// ─── RecordKey ───────────────────────────────────────────────────────────────

/// Natural key of a persisted record — unique per emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Transaction hash (`0x…`).
    pub tx_hash: String,
    /// Log index within the transaction's block.
    pub log_index: u32,
}

impl RecordKey {
    pub fn new(tx_hash: impl Into<String>, log_index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            log_index,
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

// ─── ScanRecord ──────────────────────────────────────────────────────────────

/// A decoded record produced by a batch, handed to the sink.
///
/// The scanner treats the payload as opaque; it only requires the block
/// number (for checkpoint accounting) and the natural key (for idempotent
/// upserts at the sink).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Logical stream this record belongs to (e.g. a pool id).
    pub stream: String,
    /// Block the record was emitted in.
    pub block_number: u64,
    /// Natural key — sinks must dedupe on this.
    pub key: RecordKey,
    /// Typed payload.
    pub payload: RecordPayload,
}

/// Tagged payload variants per logical stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    /// A raw on-chain event (undecoded topics + data).
    Event {
        address: String,
        topics: Vec<String>,
        data: String,
    },
    /// A domain entity derived from one or more events.
    Entity {
        entity_type: String,
        fields: serde_json::Value,
    },
}

impl ScanRecord {
    /// Returns `true` if this record represents a derived entity rather than
    /// a raw event. Entities feed the `total_entities_found` counter.
    pub fn is_entity(&self) -> bool {
        matches!(self.payload, RecordPayload::Entity { .. })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
