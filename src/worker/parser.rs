//! Transfer log decoding.
//!
//! Logs arrive pre-filtered by topic0, but individual entries can still be
//! malformed (ERC-721 transfers share the signature, proxies emit short
//! data). Those are skipped with a log line; they never abort a batch.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use log::warn;
use num_bigint::BigInt;

use crate::abis::Transfer;
use crate::utils::{hex_encode, u256_to_bigint};

/// A decoded ERC-20 Transfer with its log coordinates.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    pub from: String,
    pub to: String,
    pub value: BigInt,
}

/// Decode a batch of logs, dropping malformed entries, in ascending
/// `(block_number, log_index)` order.
pub fn parse_transfers(logs: &[Log]) -> Vec<TransferLog> {
    let mut transfers: Vec<TransferLog> = logs.iter().filter_map(parse_transfer).collect();
    transfers.sort_by_key(|t| (t.block_number, t.log_index));
    transfers
}

fn parse_transfer(log: &Log) -> Option<TransferLog> {
    let topics = log.topics();

    if topics.first() != Some(&Transfer::SIGNATURE_HASH) {
        return None;
    }

    // ERC-20 transfers carry exactly (signature, from, to); a fourth topic
    // means an ERC-721 token id.
    if topics.len() != 3 {
        warn!(
            "Skipping transfer log with {} topics in tx {:?}",
            topics.len(),
            log.transaction_hash
        );
        return None;
    }

    let data = log.data().data.as_ref();
    if data.len() < 32 {
        warn!(
            "Skipping transfer log with short data ({} bytes) in tx {:?}",
            data.len(),
            log.transaction_hash
        );
        return None;
    }

    let (Some(block_number), Some(log_index), Some(tx_hash)) =
        (log.block_number, log.log_index, log.transaction_hash)
    else {
        warn!("Skipping transfer log without block coordinates");
        return None;
    };

    let from = Address::from_word(topics[1]);
    let to = Address::from_word(topics[2]);
    let value = U256::from_be_slice(&data[..32]);

    Some(TransferLog {
        tx_hash: hex_encode(tx_hash.as_slice()),
        block_number,
        log_index: log_index as u32,
        from: hex_encode(from.as_slice()),
        to: hex_encode(to.as_slice()),
        value: u256_to_bigint(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, LogData, B256, U256};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn transfer_log(block: u64, index: u64, from: Address, to: Address, value: U256) -> Log {
        let data = LogData::new_unchecked(
            vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
            Bytes::from(value.to_be_bytes::<32>().to_vec()),
        );

        Log {
            inner: alloy::primitives::Log {
                address: addr(0xcc),
                data,
            },
            block_number: Some(block),
            log_index: Some(index),
            transaction_hash: Some(B256::repeat_byte(0x11)),
            ..Default::default()
        }
    }

    #[test]
    fn test_decodes_transfer_fields() {
        let log = transfer_log(10, 3, addr(0xaa), addr(0xbb), U256::from(1000u64));
        let parsed = parse_transfers(&[log]);

        assert_eq!(parsed.len(), 1);
        let t = &parsed[0];
        assert_eq!(t.block_number, 10);
        assert_eq!(t.log_index, 3);
        assert_eq!(t.from, format!("0x{}", "aa".repeat(20)));
        assert_eq!(t.to, format!("0x{}", "bb".repeat(20)));
        assert_eq!(t.value, BigInt::from(1000));
    }

    #[test]
    fn test_orders_by_block_then_log_index() {
        let logs = vec![
            transfer_log(12, 0, addr(1), addr(2), U256::from(1u64)),
            transfer_log(10, 5, addr(1), addr(2), U256::from(2u64)),
            transfer_log(10, 2, addr(1), addr(2), U256::from(3u64)),
        ];
        let parsed = parse_transfers(&logs);
        let order: Vec<(u64, u32)> = parsed.iter().map(|t| (t.block_number, t.log_index)).collect();
        assert_eq!(order, vec![(10, 2), (10, 5), (12, 0)]);
    }

    #[test]
    fn test_skips_wrong_signature() {
        let mut log = transfer_log(10, 0, addr(1), addr(2), U256::from(1u64));
        log.inner.data = LogData::new_unchecked(
            vec![B256::repeat_byte(0xde), addr(1).into_word(), addr(2).into_word()],
            Bytes::from(U256::from(1u64).to_be_bytes::<32>().to_vec()),
        );
        assert!(parse_transfers(&[log]).is_empty());
    }

    #[test]
    fn test_skips_erc721_style_transfer() {
        let mut log = transfer_log(10, 0, addr(1), addr(2), U256::from(1u64));
        log.inner.data = LogData::new_unchecked(
            vec![
                Transfer::SIGNATURE_HASH,
                addr(1).into_word(),
                addr(2).into_word(),
                B256::repeat_byte(0x07),
            ],
            Bytes::new(),
        );
        assert!(parse_transfers(&[log]).is_empty());
    }

    #[test]
    fn test_skips_short_data() {
        let mut log = transfer_log(10, 0, addr(1), addr(2), U256::from(1u64));
        log.inner.data = LogData::new_unchecked(
            vec![Transfer::SIGNATURE_HASH, addr(1).into_word(), addr(2).into_word()],
            Bytes::from(vec![0u8; 8]),
        );
        assert!(parse_transfers(&[log]).is_empty());
    }

    #[test]
    fn test_skips_pending_log_without_coordinates() {
        let mut log = transfer_log(10, 0, addr(1), addr(2), U256::from(1u64));
        log.block_number = None;
        assert!(parse_transfers(&[log]).is_empty());
    }

    #[test]
    fn test_malformed_entry_does_not_drop_batch() {
        let good = transfer_log(10, 0, addr(1), addr(2), U256::from(5u64));
        let mut bad = transfer_log(10, 1, addr(1), addr(2), U256::from(5u64));
        bad.inner.data = LogData::new_unchecked(vec![Transfer::SIGNATURE_HASH], Bytes::new());

        let parsed = parse_transfers(&[good, bad]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].value, BigInt::from(5));
    }
}
