use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token contract descriptor, fetched over RPC on first sight and never
/// refreshed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub chain_id: i64,
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
