//! `EventSource` adapter over an [`EvmRpcClient`].

use async_trait::async_trait;
use tracing::trace;

use rangescan_core::error::ScanError;
use rangescan_core::source::{EventSource, RawEvent, SourceFilter};

use crate::fetcher::{EvmRpcClient, RawLog};

/// Adapts any [`EvmRpcClient`] transport to the scanner's `EventSource`.
///
/// Logs flagged `removed` by the node (reorged out) are dropped here so the
/// scanner never sees them.
pub struct EvmEventSource<C> {
    client: C,
}

impl<C: EvmRpcClient> EvmEventSource<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

fn event_from_log(log: RawLog) -> RawEvent {
    RawEvent {
        block_number: log.block_number_u64(),
        log_index: log.log_index_u32(),
        address: log.address,
        topics: log.topics,
        data: log.data,
        tx_hash: log.tx_hash,
    }
}

#[async_trait]
impl<C: EvmRpcClient> EventSource for EvmEventSource<C> {
    async fn chain_head(&self) -> Result<u64, ScanError> {
        self.client.get_block_number().await
    }

    async fn events(
        &self,
        filter: &SourceFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>, ScanError> {
        let logs = self.client.get_logs(from_block, to_block, filter).await?;
        trace!(from_block, to_block, count = logs.len(), "fetched logs");

        Ok(logs
            .into_iter()
            .filter(|log| !log.is_removed())
            .map(event_from_log)
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64, ScanError> {
        let header = self
            .client
            .get_block_header(block_number)
            .await?
            .ok_or_else(|| ScanError::Rpc(format!("block {block_number} not found")))?;
        Ok(header.timestamp)
    }
}
