use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative holding points for one user of one contract on one chain,
/// stored as a base-10 integer string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPoints {
    pub chain_id: i64,
    pub contract_id: i64,
    pub user_addr: String,
    pub total_points: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit record for one accrual window: how many points a user earned
/// between `period_start` and `period_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsCalculation {
    pub chain_id: i64,
    pub contract_id: i64,
    pub user_addr: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub points_added: String,
}

impl PointsCalculation {
    pub fn new(
        chain_id: i64,
        contract_id: i64,
        user_addr: String,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        points_added: String,
    ) -> Self {
        Self {
            chain_id,
            contract_id,
            user_addr,
            period_start,
            period_end,
            points_added,
        }
    }
}
