//! rangescan-evm — EVM JSON-RPC event source.
//!
//! Adapts an `eth_getLogs`-style JSON-RPC provider to the scanner's
//! `EventSource` trait. Bring your own transport: implement [`EvmRpcClient`]
//! over whatever HTTP stack you use and wrap it in [`EvmEventSource`].

pub mod fetcher;
pub mod source;

pub use fetcher::{parse_hex_u64, BlockHeader, EvmRpcClient, RawLog};
pub use source::EvmEventSource;
