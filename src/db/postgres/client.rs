use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::DatabaseSettings;

/// Connectivity probe attempts before startup fails.
const CONNECT_ATTEMPTS: u32 = 5;

/// Split a schema file into statements. A semicolon only terminates a
/// statement outside `$$ ... $$` bodies, so function definitions survive
/// intact.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_quote = false;

    for piece in sql.split_inclusive(';') {
        if piece.matches("$$").count() % 2 == 1 {
            in_dollar_quote = !in_dollar_quote;
        }
        current.push_str(piece);

        if !in_dollar_quote {
            let stmt = current.trim().trim_end_matches(';').trim_end();
            if !stmt.is_empty() {
                statements.push(stmt.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim().trim_end_matches(';').trim_end();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

/// PostgreSQL client with connection pooling.
///
/// All six ledger and points tables live here. Uses `deadpool-postgres` for
/// connection management; multi-row updates run inside `tokio_postgres`
/// transactions on a pooled connection.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: &DatabaseSettings) -> anyhow::Result<Self> {
        if settings.driver != "postgres" {
            anyhow::bail!(
                "unsupported database driver {:?} (only \"postgres\" is available)",
                settings.driver
            );
        }

        let pg_config: tokio_postgres::Config =
            settings.dsn.parse().context("Invalid database DSN")?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(settings.max_open)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let client = Self { pool };
        client.wait_until_reachable().await?;
        info!("Connected to PostgreSQL");

        Ok(client)
    }

    /// Probe the store until it answers. The pool connects lazily, so a
    /// database that is still booting only needs the first checkout to
    /// succeed; the backoff grows linearly per attempt.
    async fn wait_until_reachable(&self) -> anyhow::Result<()> {
        let mut attempt = 1;
        loop {
            match self.health_check().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= CONNECT_ATTEMPTS {
                        return Err(e.context(format!(
                            "PostgreSQL unreachable after {} attempts",
                            CONNECT_ATTEMPTS
                        )));
                    }
                    let delay = Duration::from_millis(250 * attempt as u64);
                    warn!(
                        "PostgreSQL not ready (attempt {}/{}), retrying in {:?}",
                        attempt, CONNECT_ATTEMPTS, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        for stmt in split_sql_statements(&schema) {
            client
                .execute(stmt.as_str(), &[])
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::split_sql_statements;

    #[test]
    fn test_split_plain_statements() {
        let sql = "CREATE TABLE a (x INT);\nCREATE TABLE b (y INT);\n";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("TABLE a"));
        assert!(stmts[1].contains("TABLE b"));
    }

    #[test]
    fn test_split_preserves_dollar_quoted_bodies() {
        let sql =
            "CREATE FUNCTION f() RETURNS void AS $$ BEGIN; END; $$ LANGUAGE plpgsql; SELECT 1";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("BEGIN; END;"));
        assert_eq!(stmts[1], "SELECT 1");
    }

    #[test]
    fn test_split_drops_blank_fragments() {
        let stmts = split_sql_statements("  ;\n;SELECT 1;  \n");
        assert_eq!(stmts, vec!["SELECT 1".to_string()]);
    }
}
