use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-chain ingestion cursor (PostgreSQL).
///
/// `last_block` is the highest block whose logs are fully applied to the
/// ledger. It only moves backwards through a reorg rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub id: i64,
    pub name: String,
    pub rpc_url: String,
    pub start_block: i64,
    pub last_block: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
