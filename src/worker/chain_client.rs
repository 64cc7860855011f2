use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use anyhow::{Context, Result};
use url::Url;

use crate::abis::IERC20;

/// Timeout for individual metadata RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC client for one chain.
///
/// The ingestion loop needs exactly two views of the chain: the current head
/// number and the event logs of a bounded block range. Token metadata is
/// fetched once per contract on first sight.
pub struct ChainClient {
    provider: DynProvider,
}

impl ChainClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = Url::parse(rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);

        Ok(Self {
            provider: DynProvider::new(client),
        })
    }

    pub async fn get_head(&self) -> Result<u64> {
        let head = self
            .provider
            .get_block_number()
            .await
            .context("Failed to fetch chain head")?;
        Ok(head)
    }

    /// Logs emitted by `address` with the given topic0 in `[from, to]`,
    /// inclusive on both ends.
    pub async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(address)
            .event_signature(topic0);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .context("Failed to fetch logs")?;

        Ok(logs)
    }

    /// Fetch ERC-20 metadata for a newly observed contract.
    ///
    /// Metadata never blocks ingestion: `name` and `symbol` fall back to
    /// empty and `decimals` to 18 when a call fails or times out.
    pub async fn token_metadata(&self, address: Address) -> (String, String, u8) {
        let token = IERC20::new(address, &self.provider);

        let decimals = tokio::time::timeout(RPC_CALL_TIMEOUT, token.decimals().call())
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(18);

        let name = tokio::time::timeout(RPC_CALL_TIMEOUT, token.name().call())
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default();

        let symbol = tokio::time::timeout(RPC_CALL_TIMEOUT, token.symbol().call())
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default();

        (name, symbol, decimals)
    }
}
