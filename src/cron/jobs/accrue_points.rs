//! Job that awards time-weighted holding points once per window.
//!
//! Every user who changed balance during the window, or carried a balance
//! into it, earns points proportional to the integral of balance over time:
//! 5% of the held balance per hour, truncated to an integer at the end.
//! The window is `[now - interval, now]` in wall-clock time, and segment
//! boundaries come from the ledger's insert timestamps.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use num_bigint::BigInt;
use num_traits::Zero;
use tokio_postgres::Row;

use crate::db::models::{BalanceChange, PointsCalculation, UserPoints};
use crate::db::Database;
use crate::utils::parse_bigint;

/// Award rate: 5/100 of held balance per 60 minutes.
const RATE_NUMERATOR: i64 = 5;
const RATE_DENOMINATOR: i64 = 100;
const MINUTES_PER_PERIOD: i64 = 60;
const MICRO_MINUTE_SCALE: i64 = 1_000_000;

/// Points earned by holding `balance` for `duration`.
///
/// Only the minute count passes through floating point; it is scaled to
/// whole micro-minutes before entering the integer arithmetic, so amounts
/// of any magnitude stay exact.
pub fn points_for_holding(balance: &BigInt, duration: Duration) -> BigInt {
    let minutes = duration.num_milliseconds() as f64 / 60_000.0;
    let micro_minutes = BigInt::from((minutes * MICRO_MINUTE_SCALE as f64) as i64);

    let numerator = balance * &BigInt::from(RATE_NUMERATOR) * &micro_minutes;
    let denominator = BigInt::from(RATE_DENOMINATOR * MINUTES_PER_PERIOD * MICRO_MINUTE_SCALE);

    // `/` on BigInt truncates toward zero; the award rule floors. The
    // denominator is positive, so a negative remainder means one more
    // step down.
    let quotient = &numerator / &denominator;
    let remainder = numerator % denominator;
    if remainder < BigInt::zero() {
        quotient - 1
    } else {
        quotient
    }
}

/// Integrate balance over the window: each change closes the segment held at
/// the previous balance, and the final segment runs to the window's end.
/// `changes` must be in ascending `created_at` order.
pub fn integrate_window(
    start_balance: &BigInt,
    changes: &[BalanceChange],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<BigInt> {
    let mut total = BigInt::zero();
    let mut current = start_balance.clone();
    let mut segment_start = period_start;

    for change in changes {
        let held = change.created_at - segment_start;
        if held > Duration::zero() {
            total += points_for_holding(&current, held);
        }
        current = parse_bigint(&change.balance_after)
            .with_context(|| format!("balance_after of change at {}", change.created_at))?;
        segment_start = change.created_at;
    }

    let held = period_end - segment_start;
    if held > Duration::zero() {
        total += points_for_holding(&current, held);
    }

    Ok(total)
}

/// Run one accrual pass over every chain and contract.
pub async fn run(db: &Database, interval_minutes: u64) -> Result<()> {
    info!("Starting point accrual pass...");
    let start = std::time::Instant::now();

    let period_end = Utc::now();
    let period_start = period_end - Duration::minutes(interval_minutes as i64);

    let chains = db.postgres.get_chains().await?;
    for chain in &chains {
        if let Err(e) = accrue_chain(db, chain.id, period_start, period_end).await {
            error!("Chain {}: point accrual failed: {:#}", chain.id, e);
        }
    }

    info!(
        "Completed point accrual for window {} to {} in {:?}",
        period_start,
        period_end,
        start.elapsed()
    );
    Ok(())
}

async fn accrue_chain(
    db: &Database,
    chain_id: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<()> {
    let contracts = db.postgres.get_contracts(chain_id).await?;

    for contract in &contracts {
        if let Err(e) = accrue_contract(db, chain_id, contract.id, period_start, period_end).await {
            error!(
                "Contract {} on chain {}: point accrual failed: {:#}",
                contract.id, chain_id, e
            );
        }
    }

    Ok(())
}

async fn accrue_contract(
    db: &Database,
    chain_id: i64,
    contract_id: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<()> {
    let users = window_users(db, chain_id, contract_id, period_start, period_end).await?;

    for user in &users {
        match accrue_user(db, chain_id, contract_id, user, period_start, period_end).await {
            Ok(Some(points)) => {
                info!(
                    "Awarded {} points to {} (contract {}, chain {})",
                    points, user, contract_id, chain_id
                );
            },
            Ok(None) => {},
            Err(e) => {
                warn!(
                    "User {} on contract {} chain {}: point accrual failed: {:#}",
                    user, contract_id, chain_id, e
                );
            },
        }
    }

    Ok(())
}

/// Users of interest for the window: anyone with a change inside it, plus
/// anyone holding a balance who sat out the whole window.
async fn window_users(
    db: &Database,
    chain_id: i64,
    contract_id: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<Vec<String>> {
    let client = db.postgres.pool.get().await?;

    let changed = client
        .query(
            r#"
            SELECT DISTINCT user_addr
            FROM tally.balance_changes
            WHERE chain_id = $1 AND contract_id = $2
              AND created_at BETWEEN $3 AND $4
            "#,
            &[&chain_id, &contract_id, &period_start, &period_end],
        )
        .await?;

    let carrying = client
        .query(
            r#"
            SELECT DISTINCT user_addr
            FROM tally.user_balances
            WHERE chain_id = $1 AND contract_id = $2
              AND user_addr NOT IN (
                  SELECT user_addr FROM tally.balance_changes
                  WHERE chain_id = $1 AND contract_id = $2
                    AND created_at BETWEEN $3 AND $4
              )
            "#,
            &[&chain_id, &contract_id, &period_start, &period_end],
        )
        .await?;

    Ok(changed
        .iter()
        .chain(carrying.iter())
        .map(|row| row.get("user_addr"))
        .collect())
}

/// Compute and persist one user's window points atomically. Returns `None`
/// without writing anything when the window total is zero or negative.
async fn accrue_user(
    db: &Database,
    chain_id: i64,
    contract_id: i64,
    user_addr: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<Option<BigInt>> {
    let mut client = db.postgres.pool.get().await?;
    let tx = client.transaction().await?;

    // Balance carried into the window: the last change recorded at or
    // before the window opened.
    let before = tx
        .query_opt(
            r#"
            SELECT balance_after
            FROM tally.balance_changes
            WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
              AND created_at <= $4
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            &[&chain_id, &contract_id, &user_addr, &period_start],
        )
        .await?;

    let start_balance = match before {
        Some(row) => parse_bigint(row.get("balance_after"))?,
        None => BigInt::zero(),
    };

    let rows = tx
        .query(
            r#"
            SELECT chain_id, contract_id, user_addr, tx_hash, block_number, log_index,
                   from_addr, to_addr, amount, event_type, balance_after, created_at
            FROM tally.balance_changes
            WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
              AND created_at BETWEEN $4 AND $5
            ORDER BY created_at ASC, id ASC
            "#,
            &[&chain_id, &contract_id, &user_addr, &period_start, &period_end],
        )
        .await?;

    let changes: Vec<BalanceChange> = rows.iter().map(row_to_balance_change).collect();

    let points = integrate_window(&start_balance, &changes, period_start, period_end)?;

    if points <= BigInt::zero() {
        return Ok(None);
    }

    let existing = tx
        .query_opt(
            r#"
            SELECT chain_id, contract_id, user_addr, total_points, created_at, updated_at
            FROM tally.user_points
            WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
            "#,
            &[&chain_id, &contract_id, &user_addr],
        )
        .await?;

    let total = match existing.map(|row| row_to_user_points(&row)) {
        Some(current) => parse_bigint(&current.total_points)? + &points,
        None => points.clone(),
    };

    tx.execute(
        r#"
        INSERT INTO tally.user_points (chain_id, contract_id, user_addr, total_points)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (chain_id, contract_id, user_addr) DO UPDATE SET
            total_points = EXCLUDED.total_points,
            updated_at = NOW()
        "#,
        &[&chain_id, &contract_id, &user_addr, &total.to_string()],
    )
    .await?;

    let calculation = PointsCalculation::new(
        chain_id,
        contract_id,
        user_addr.to_string(),
        period_start,
        period_end,
        points.to_string(),
    );

    tx.execute(
        r#"
        INSERT INTO tally.points_calculations (
            chain_id, contract_id, user_addr, period_start, period_end, points_added
        ) VALUES ($1, $2, $3, $4, $5, $6)
        "#,
        &[
            &calculation.chain_id,
            &calculation.contract_id,
            &calculation.user_addr,
            &calculation.period_start,
            &calculation.period_end,
            &calculation.points_added,
        ],
    )
    .await?;

    tx.commit().await?;
    Ok(Some(points))
}

fn row_to_balance_change(row: &Row) -> BalanceChange {
    BalanceChange {
        chain_id: row.get("chain_id"),
        contract_id: row.get("contract_id"),
        user_addr: row.get("user_addr"),
        tx_hash: row.get("tx_hash"),
        block_number: row.get("block_number"),
        log_index: row.get("log_index"),
        from_addr: row.get("from_addr"),
        to_addr: row.get("to_addr"),
        amount: row.get("amount"),
        event_type: row.get("event_type"),
        balance_after: row.get("balance_after"),
        created_at: row.get("created_at"),
    }
}

fn row_to_user_points(row: &Row) -> UserPoints {
    UserPoints {
        chain_id: row.get("chain_id"),
        contract_id: row.get("contract_id"),
        user_addr: row.get("user_addr"),
        total_points: row.get("total_points"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn change(minutes_in: i64, balance_after: &str) -> BalanceChange {
        BalanceChange {
            chain_id: 1,
            contract_id: 1,
            user_addr: "0xholder".to_string(),
            tx_hash: "0xtx".to_string(),
            block_number: 100 + minutes_in,
            log_index: 0,
            from_addr: "0xsender".to_string(),
            to_addr: "0xholder".to_string(),
            amount: "0".to_string(),
            event_type: "transfer".to_string(),
            balance_after: balance_after.to_string(),
            created_at: t0() + Duration::minutes(minutes_in),
        }
    }

    #[test]
    fn test_full_hour_awards_five_percent() {
        let points = points_for_holding(&BigInt::from(10_000), Duration::minutes(60));
        assert_eq!(points, BigInt::from(500));
    }

    #[test]
    fn test_award_truncates_to_integer() {
        // 10001 * 0.05 = 500.05
        let points = points_for_holding(&BigInt::from(10_001), Duration::minutes(60));
        assert_eq!(points, BigInt::from(500));
    }

    #[test]
    fn test_negative_segment_floors_down() {
        // -10001 * 0.05 = -500.05, floored to -501 (not truncated to -500).
        let points = points_for_holding(&BigInt::from(-10_001), Duration::minutes(60));
        assert_eq!(points, BigInt::from(-501));

        let exact = points_for_holding(&BigInt::from(-10_000), Duration::minutes(60));
        assert_eq!(exact, BigInt::from(-500));
    }

    #[test]
    fn test_sub_minute_durations_count() {
        let points = points_for_holding(&BigInt::from(120_000), Duration::seconds(30));
        assert_eq!(points, BigInt::from(50));
    }

    #[test]
    fn test_huge_balances_stay_exact() {
        // 2^200 held for an hour is exactly 2^200 / 20.
        let balance = BigInt::from(1) << 200;
        let points = points_for_holding(&balance, Duration::minutes(60));
        assert_eq!(points, &balance / BigInt::from(20));
    }

    #[test]
    fn test_quiet_window_integrates_start_balance() {
        let total =
            integrate_window(&BigInt::from(10_000), &[], t0(), t0() + Duration::minutes(60))
                .unwrap();
        assert_eq!(total, BigInt::from(500));
    }

    #[test]
    fn test_mid_window_topup_splits_segments() {
        // 10,000 for 30 minutes, then 20,000 for 30 minutes:
        // floor(10000*0.05*0.5) + floor(20000*0.05*0.5) = 250 + 500
        let changes = vec![change(30, "20000")];
        let total = integrate_window(
            &BigInt::from(10_000),
            &changes,
            t0(),
            t0() + Duration::minutes(60),
        )
        .unwrap();
        assert_eq!(total, BigInt::from(750));
    }

    #[test]
    fn test_noop_change_splits_without_losing_points() {
        let unsplit =
            integrate_window(&BigInt::from(10_000), &[], t0(), t0() + Duration::minutes(60))
                .unwrap();

        let split = integrate_window(
            &BigInt::from(10_000),
            &[change(17, "10000")],
            t0(),
            t0() + Duration::minutes(60),
        )
        .unwrap();

        // Splitting can only lose the sub-unit remainder of each segment.
        let diff = &unsplit - &split;
        assert!(diff >= BigInt::zero() && diff <= BigInt::from(1));
    }

    #[test]
    fn test_change_at_window_open_replaces_start_balance() {
        // A change recorded exactly when the window opens closes a
        // zero-length segment; only the new balance earns.
        let changes = vec![change(0, "6000")];
        let total = integrate_window(
            &BigInt::from(999_999),
            &changes,
            t0(),
            t0() + Duration::minutes(60),
        )
        .unwrap();
        assert_eq!(total, BigInt::from(300));
    }

    #[test]
    fn test_empty_history_earns_nothing() {
        let total =
            integrate_window(&BigInt::zero(), &[], t0(), t0() + Duration::minutes(60)).unwrap();
        assert_eq!(total, BigInt::zero());
    }

    #[test]
    fn test_balance_spent_mid_window_stops_earning() {
        // 10,000 for 30 minutes, then everything transferred away.
        let changes = vec![change(30, "0")];
        let total = integrate_window(
            &BigInt::from(10_000),
            &changes,
            t0(),
            t0() + Duration::minutes(60),
        )
        .unwrap();
        assert_eq!(total, BigInt::from(250));
    }

    #[test]
    fn test_malformed_balance_fails_integration() {
        let changes = vec![change(30, "garbage")];
        assert!(
            integrate_window(&BigInt::zero(), &changes, t0(), t0() + Duration::minutes(60))
                .is_err()
        );
    }

    #[test]
    fn test_negative_start_balance_never_awards() {
        // A ledger opened mid-history can carry a negative running balance.
        let total = integrate_window(
            &BigInt::from(-10_000),
            &[],
            t0(),
            t0() + Duration::minutes(60),
        )
        .unwrap();
        assert!(total <= BigInt::zero());
    }
}
