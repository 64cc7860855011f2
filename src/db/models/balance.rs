use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Current running balance for one user of one contract on one chain.
///
/// Derived state: always equal to the `balance_after` of the user's most
/// recent surviving balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    pub chain_id: i64,
    pub contract_id: i64,
    pub user_addr: String,
    pub balance: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger row recording one signed balance delta at known log
/// coordinates. A single Transfer log produces up to two rows: the debit of
/// the sender and the credit of the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    pub chain_id: i64,
    pub contract_id: i64,
    pub user_addr: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i32,
    pub from_addr: String,
    pub to_addr: String,
    pub amount: String,
    pub event_type: String,
    pub balance_after: String,
    pub created_at: DateTime<Utc>,
}

/// One ledger-side of a parsed transfer, ready to be applied in a store
/// transaction. `delta` is negative for the sender side.
#[derive(Debug)]
pub struct NewBalanceChange<'a> {
    pub chain_id: i64,
    pub contract_id: i64,
    pub user_addr: &'a str,
    pub tx_hash: &'a str,
    pub block_number: i64,
    pub log_index: i32,
    pub from_addr: &'a str,
    pub to_addr: &'a str,
    pub delta: &'a BigInt,
    pub event_type: &'a str,
}
