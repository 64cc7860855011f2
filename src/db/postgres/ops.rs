use anyhow::Context;
use num_bigint::BigInt;
use num_traits::Zero;
use tokio_postgres::Row;

use crate::config::ChainSettings;
use crate::db::models::{Chain, Contract, NewBalanceChange, UserBalance};
use crate::db::postgres::PostgresClient;
use crate::utils::parse_bigint;

impl PostgresClient {
    // ==================== CHAINS ====================

    /// Create the chain cursor row if it does not exist yet. The cursor
    /// starts one block before `start_block` so the first forward pass
    /// begins exactly at `start_block`.
    pub async fn ensure_chain(&self, chain: &ChainSettings) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tally.chains (id, name, rpc_url, start_block, last_block)
            VALUES ($1, $2, $3, $4, $4 - 1)
            ON CONFLICT (id) DO NOTHING
        "#;

        let start_block = chain.start_block as i64;
        client
            .execute(query, &[&chain.id, &chain.name, &chain.rpc_url, &start_block])
            .await?;

        Ok(())
    }

    pub async fn get_chain(&self, chain_id: i64) -> anyhow::Result<Option<Chain>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, name, rpc_url, start_block, last_block, created_at, updated_at
            FROM tally.chains
            WHERE id = $1
        "#;

        let row = client.query_opt(query, &[&chain_id]).await?;
        Ok(row.map(|r| row_to_chain(&r)))
    }

    /// All chains with a cursor row. The point calculator walks this set.
    pub async fn get_chains(&self) -> anyhow::Result<Vec<Chain>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, name, rpc_url, start_block, last_block, created_at, updated_at
            FROM tally.chains
            ORDER BY id
        "#;

        let rows = client.query(query, &[]).await?;
        Ok(rows.iter().map(row_to_chain).collect())
    }

    pub async fn set_last_block(&self, chain_id: i64, block: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE tally.chains SET last_block = $2, updated_at = NOW() WHERE id = $1",
                &[&chain_id, &block],
            )
            .await?;
        Ok(())
    }

    // ==================== CONTRACTS ====================

    pub async fn get_contract(
        &self,
        chain_id: i64,
        address: &str,
    ) -> anyhow::Result<Option<Contract>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, chain_id, address, name, symbol, decimals, created_at, updated_at
            FROM tally.contracts
            WHERE chain_id = $1 AND address = $2
        "#;

        let row = client.query_opt(query, &[&chain_id, &address]).await?;
        Ok(row.map(|r| row_to_contract(&r)))
    }

    pub async fn get_contracts(&self, chain_id: i64) -> anyhow::Result<Vec<Contract>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, chain_id, address, name, symbol, decimals, created_at, updated_at
            FROM tally.contracts
            WHERE chain_id = $1
            ORDER BY id
        "#;

        let rows = client.query(query, &[&chain_id]).await?;
        Ok(rows.iter().map(row_to_contract).collect())
    }

    /// Insert a contract descriptor observed for the first time. Idempotent
    /// under concurrent insertion of the same (chain, address).
    pub async fn insert_contract(
        &self,
        chain_id: i64,
        address: &str,
        name: &str,
        symbol: &str,
        decimals: i16,
    ) -> anyhow::Result<Contract> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tally.contracts (chain_id, address, name, symbol, decimals)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chain_id, address) DO NOTHING
        "#;

        client
            .execute(query, &[&chain_id, &address, &name, &symbol, &decimals])
            .await?;

        self.get_contract(chain_id, address)
            .await?
            .context("contract row missing after insert")
    }

    // ==================== LEDGER ====================

    /// Apply one signed balance delta for one user atomically: read the
    /// current balance, append the change row, upsert the running balance.
    ///
    /// Returns `false` without touching the balance when the change row
    /// already exists: a replayed log is a no-op.
    pub async fn apply_balance_change(
        &self,
        change: &NewBalanceChange<'_>,
    ) -> anyhow::Result<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                r#"
                SELECT chain_id, contract_id, user_addr, balance, created_at, updated_at
                FROM tally.user_balances
                WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
                "#,
                &[&change.chain_id, &change.contract_id, &change.user_addr],
            )
            .await?;

        let current = match row.map(|r| row_to_user_balance(&r)) {
            Some(existing) => parse_bigint(&existing.balance)?,
            None => BigInt::zero(),
        };

        let new_balance = (&current + change.delta).to_string();
        let amount = change.delta.to_string();

        let inserted = tx
            .execute(
                r#"
                INSERT INTO tally.balance_changes (
                    chain_id, contract_id, user_addr, tx_hash, block_number, log_index,
                    from_addr, to_addr, amount, event_type, balance_after
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (chain_id, tx_hash, log_index, user_addr) DO NOTHING
                "#,
                &[
                    &change.chain_id,
                    &change.contract_id,
                    &change.user_addr,
                    &change.tx_hash,
                    &change.block_number,
                    &change.log_index,
                    &change.from_addr,
                    &change.to_addr,
                    &amount,
                    &change.event_type,
                    &new_balance,
                ],
            )
            .await?;

        if inserted == 0 {
            // Already applied; dropping the transaction rolls back the no-op.
            return Ok(false);
        }

        tx.execute(
            r#"
            INSERT INTO tally.user_balances (chain_id, contract_id, user_addr, balance)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id, contract_id, user_addr) DO UPDATE SET
                balance = EXCLUDED.balance,
                updated_at = NOW()
            "#,
            &[
                &change.chain_id,
                &change.contract_id,
                &change.user_addr,
                &new_balance,
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ==================== REORG ROLLBACK ====================

    /// Revert every balance change above `safe_block` in one transaction:
    /// delete the rows, re-derive the running balance of each touched user
    /// from the surviving history, and move the cursor back to `safe_block`.
    ///
    /// Returns the number of ledger rows removed.
    pub async fn rollback_chain(&self, chain_id: i64, safe_block: i64) -> anyhow::Result<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Users touched by the rows being reverted, captured before the delete.
        let touched = tx
            .query(
                r#"
                SELECT DISTINCT contract_id, user_addr
                FROM tally.balance_changes
                WHERE chain_id = $1 AND block_number > $2
                "#,
                &[&chain_id, &safe_block],
            )
            .await?;

        let removed = tx
            .execute(
                "DELETE FROM tally.balance_changes WHERE chain_id = $1 AND block_number > $2",
                &[&chain_id, &safe_block],
            )
            .await?;

        for row in &touched {
            let contract_id: i64 = row.get("contract_id");
            let user_addr: String = row.get("user_addr");

            let last = tx
                .query_opt(
                    r#"
                    SELECT balance_after
                    FROM tally.balance_changes
                    WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
                      AND block_number <= $4
                    ORDER BY block_number DESC, log_index DESC
                    LIMIT 1
                    "#,
                    &[&chain_id, &contract_id, &user_addr, &safe_block],
                )
                .await?;

            match last {
                Some(r) => {
                    let balance: String = r.get("balance_after");
                    tx.execute(
                        r#"
                        UPDATE tally.user_balances
                        SET balance = $4, updated_at = NOW()
                        WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
                        "#,
                        &[&chain_id, &contract_id, &user_addr, &balance],
                    )
                    .await?;
                },
                None => {
                    // No surviving history: the user never existed on the
                    // canonical chain.
                    tx.execute(
                        r#"
                        DELETE FROM tally.user_balances
                        WHERE chain_id = $1 AND contract_id = $2 AND user_addr = $3
                        "#,
                        &[&chain_id, &contract_id, &user_addr],
                    )
                    .await?;
                },
            }
        }

        tx.execute(
            "UPDATE tally.chains SET last_block = $2, updated_at = NOW() WHERE id = $1",
            &[&chain_id, &safe_block],
        )
        .await?;

        tx.commit().await?;
        Ok(removed)
    }
}

fn row_to_chain(row: &Row) -> Chain {
    Chain {
        id: row.get("id"),
        name: row.get("name"),
        rpc_url: row.get("rpc_url"),
        start_block: row.get("start_block"),
        last_block: row.get("last_block"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_user_balance(row: &Row) -> UserBalance {
    UserBalance {
        chain_id: row.get("chain_id"),
        contract_id: row.get("contract_id"),
        user_addr: row.get("user_addr"),
        balance: row.get("balance"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_contract(row: &Row) -> Contract {
    Contract {
        id: row.get("id"),
        chain_id: row.get("chain_id"),
        address: row.get("address"),
        name: row.get("name"),
        symbol: row.get("symbol"),
        decimals: row.get("decimals"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
