use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::abis::Transfer;
use crate::config::{ChainSettings, ProcessorSettings};
use crate::db::models::NewBalanceChange;
use crate::utils::{hex_encode, ZERO_ADDRESS};
use crate::worker::chain_client::ChainClient;
use crate::worker::parser::{self, TransferLog};
use crate::Database;

const EVENT_TRANSFER: &str = "transfer";

/// Blockchain indexer worker for a single chain.
///
/// Polls the chain head on a fixed interval and keeps the balance ledger
/// consistent with the canonical chain:
/// - Advances the per-chain cursor through the safe tip in bounded batches
/// - Applies decoded transfers to the ledger in log order
/// - Detects reorgs below the cursor and rolls the ledger back
pub struct ChainWorker {
    chain_id: i64,
    chain_name: String,
    contract_addr: Address,
    contract_id: i64,
    processor: ProcessorSettings,
    client: ChainClient,
    db: Arc<Database>,
}

/// Decision for one sync pass, derived from the cursor and the safe tip.
#[derive(Debug, PartialEq, Eq)]
enum SyncAction {
    /// The safe tip fell below the cursor: the chain reorganized.
    Rollback { safe: u64 },
    /// Nothing new behind the safe tip.
    Idle,
    /// Blocks `from..=to` are final enough to apply.
    Advance { from: u64, to: u64 },
}

fn plan_sync(last_block: i64, head: u64, reorg_threshold: u64) -> SyncAction {
    let safe = head.saturating_sub(reorg_threshold);
    if (safe as i64) < last_block {
        SyncAction::Rollback { safe }
    } else if (safe as i64) <= last_block {
        SyncAction::Idle
    } else {
        SyncAction::Advance {
            from: (last_block + 1) as u64,
            to: safe,
        }
    }
}

/// Split `[from, to]` into inclusive windows of at most `batch_size` blocks.
fn batch_ranges(from: u64, to: u64, batch_size: u64) -> Vec<(u64, u64)> {
    let step = batch_size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = (start + step - 1).min(to);
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

impl ChainWorker {
    /// Build the worker and run per-chain initialization: create the cursor
    /// row if absent, and on first sight of the contract fetch its metadata
    /// over RPC and persist the descriptor.
    pub async fn new(
        config: &ChainSettings,
        processor: ProcessorSettings,
        db: Arc<Database>,
    ) -> Result<Self> {
        let client = ChainClient::new(&config.rpc_url)?;

        let contract_addr: Address = config
            .contract_addr
            .parse()
            .with_context(|| format!("Invalid contract address {:?}", config.contract_addr))?;
        let address = hex_encode(contract_addr.as_slice());

        db.postgres.ensure_chain(config).await?;

        let contract = match db.postgres.get_contract(config.id, &address).await? {
            Some(contract) => contract,
            None => {
                let (name, symbol, decimals) = client.token_metadata(contract_addr).await;
                db.postgres
                    .insert_contract(config.id, &address, &name, &symbol, decimals as i16)
                    .await?
            },
        };

        info!(
            "Chain {} ({}): tracking {} at {} from block {}",
            config.name,
            config.id,
            if contract.symbol.is_empty() {
                "token"
            } else {
                contract.symbol.as_str()
            },
            address,
            config.start_block
        );

        Ok(Self {
            chain_id: config.id,
            chain_name: config.name.clone(),
            contract_addr,
            contract_id: contract.id,
            processor,
            client,
            db,
        })
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.processor.check_interval_seconds);

        loop {
            if cancellation_token.is_cancelled() {
                info!(
                    "Indexer for chain {} received cancellation signal",
                    self.chain_name
                );
                break;
            }

            // Transient failures abort the pass; the next tick retries from
            // the persisted cursor.
            if let Err(e) = self.sync_once().await {
                warn!("Chain {}: sync pass failed: {:#}", self.chain_name, e);
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!(
                        "Indexer for chain {} received cancellation signal",
                        self.chain_name
                    );
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        Ok(())
    }

    async fn sync_once(&self) -> Result<()> {
        let chain = self
            .db
            .postgres
            .get_chain(self.chain_id)
            .await?
            .context("chain cursor row missing")?;

        let head = self.client.get_head().await?;

        match plan_sync(chain.last_block, head, self.processor.reorg_threshold) {
            SyncAction::Rollback { safe } => {
                warn!(
                    "Chain {}: reorg detected (head {}, cursor {}), rolling back to block {}",
                    self.chain_name, head, chain.last_block, safe
                );
                let removed = self
                    .db
                    .postgres
                    .rollback_chain(self.chain_id, safe as i64)
                    .await?;
                info!(
                    "Chain {}: rollback complete, reverted {} ledger rows",
                    self.chain_name, removed
                );
            },
            SyncAction::Idle => {},
            SyncAction::Advance { from, to } => {
                for (start, end) in batch_ranges(from, to, self.processor.block_batch_size) {
                    self.process_window(start, end)
                        .await
                        .with_context(|| format!("blocks {}-{}", start, end))?;
                }
                info!("Chain {}: synced to block {}", self.chain_name, to);
            },
        }

        Ok(())
    }

    /// Fetch, decode, and apply one block window, then advance the cursor.
    /// The cursor only moves after every change in the window is durable;
    /// a crash in between replays the window, and the ledger's idempotent
    /// inserts absorb the duplicates.
    async fn process_window(&self, start: u64, end: u64) -> Result<()> {
        let logs = self
            .client
            .filter_logs(start, end, self.contract_addr, Transfer::SIGNATURE_HASH)
            .await?;

        let transfers = parser::parse_transfers(&logs);
        if !transfers.is_empty() {
            info!(
                "Chain {}: applying {} transfers from blocks {}-{}",
                self.chain_name,
                transfers.len(),
                start,
                end
            );
        }

        for transfer in &transfers {
            self.apply_transfer(transfer).await?;
        }

        self.db
            .postgres
            .set_last_block(self.chain_id, end as i64)
            .await?;

        Ok(())
    }

    /// Post both ledger sides of a transfer. The zero address marks mints
    /// and burns and never gets a ledger entry of its own.
    async fn apply_transfer(&self, transfer: &TransferLog) -> Result<()> {
        if transfer.from != ZERO_ADDRESS {
            let delta = -transfer.value.clone();
            self.db
                .postgres
                .apply_balance_change(&NewBalanceChange {
                    chain_id: self.chain_id,
                    contract_id: self.contract_id,
                    user_addr: &transfer.from,
                    tx_hash: &transfer.tx_hash,
                    block_number: transfer.block_number as i64,
                    log_index: transfer.log_index as i32,
                    from_addr: &transfer.from,
                    to_addr: &transfer.to,
                    delta: &delta,
                    event_type: EVENT_TRANSFER,
                })
                .await
                .context("Failed to debit sender")?;
        }

        if transfer.to != ZERO_ADDRESS {
            self.db
                .postgres
                .apply_balance_change(&NewBalanceChange {
                    chain_id: self.chain_id,
                    contract_id: self.contract_id,
                    user_addr: &transfer.to,
                    tx_hash: &transfer.tx_hash,
                    block_number: transfer.block_number as i64,
                    log_index: transfer.log_index as i32,
                    from_addr: &transfer.from,
                    to_addr: &transfer.to,
                    delta: &transfer.value,
                    event_type: EVENT_TRANSFER,
                })
                .await
                .context("Failed to credit receiver")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_advances_to_safe_tip() {
        assert_eq!(
            plan_sync(9, 15, 2),
            SyncAction::Advance { from: 10, to: 13 }
        );
    }

    #[test]
    fn test_plan_zero_threshold_reaches_head() {
        assert_eq!(
            plan_sync(9, 11, 0),
            SyncAction::Advance { from: 10, to: 11 }
        );
    }

    #[test]
    fn test_plan_idle_at_safe_tip() {
        assert_eq!(plan_sync(13, 15, 2), SyncAction::Idle);
        assert_eq!(plan_sync(13, 14, 1), SyncAction::Idle);
    }

    #[test]
    fn test_plan_rollback_when_safe_tip_recedes() {
        // Cursor at 13, head reorganized to 14 with threshold 2.
        assert_eq!(plan_sync(13, 14, 2), SyncAction::Rollback { safe: 12 });
    }

    #[test]
    fn test_plan_threshold_deeper_than_head_saturates() {
        assert_eq!(plan_sync(-1, 5, 12), SyncAction::Advance { from: 0, to: 0 });
        assert_eq!(plan_sync(0, 5, 12), SyncAction::Idle);
    }

    #[test]
    fn test_plan_fresh_chain_starts_at_block_zero() {
        // start_block = 0 leaves the cursor at -1.
        assert_eq!(plan_sync(-1, 3, 0), SyncAction::Advance { from: 0, to: 3 });
    }

    #[test]
    fn test_batch_ranges_splits_inclusive_windows() {
        assert_eq!(
            batch_ranges(1, 10, 3),
            vec![(1, 3), (4, 6), (7, 9), (10, 10)]
        );
    }

    #[test]
    fn test_batch_ranges_single_window() {
        assert_eq!(batch_ranges(10, 11, 1000), vec![(10, 11)]);
        assert_eq!(batch_ranges(5, 5, 1), vec![(5, 5)]);
    }

    #[test]
    fn test_batch_ranges_zero_size_treated_as_one() {
        assert_eq!(batch_ranges(1, 3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }
}
