//! EVM log fetching primitives.
//!
//! Wire types for `eth_getLogs` / `eth_getBlockByNumber` responses and the
//! [`EvmRpcClient`] trait a JSON-RPC transport must implement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rangescan_core::error::ScanError;
use rangescan_core::source::SourceFilter;

/// A raw EVM log as returned by `eth_getLogs`.
///
/// Numeric fields stay hex-encoded strings as on the wire; use the accessor
/// methods for parsed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(rename = "data")]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Minimal block header, enough for timestamp lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: i64,
}

/// Trait for fetching EVM data from a JSON-RPC provider.
///
/// Implement this over your HTTP transport of choice. Range splitting and
/// retry policy live in the scanner, so implementations can stay thin.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn get_block_number(&self) -> Result<u64, ScanError>;

    /// `eth_getBlockByNumber` (header only).
    async fn get_block_header(&self, number: u64) -> Result<Option<BlockHeader>, ScanError>;

    /// `eth_getLogs` over `[from, to]` inclusive.
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &SourceFilter,
    ) -> Result<Vec<RawLog>, ScanError>;
}

/// Build the `eth_getLogs` params object for a filter and block span.
///
/// Transports can pass this straight as the first JSON-RPC param.
pub fn logs_params(filter: &SourceFilter, from: u64, to: u64) -> Value {
    let mut params = json!({
        "fromBlock": format!("0x{from:x}"),
        "toBlock": format!("0x{to:x}"),
    });
    if !filter.addresses.is_empty() {
        params["address"] = json!(filter.addresses);
    }
    if !filter.topic0_values.is_empty() {
        params["topics"] = json!([filter.topic0_values]);
    }
    params
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

/// Convert a JSON block response to a [`BlockHeader`].
pub fn header_from_json(v: &Value) -> Option<BlockHeader> {
    Some(BlockHeader {
        number: parse_hex_u64(v["number"].as_str()?),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?) as i64,
    })
}
