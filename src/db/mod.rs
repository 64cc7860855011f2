use std::sync::Arc;

use log::info;

use crate::config::Settings;

pub mod models;
pub mod postgres;

pub use postgres::PostgresClient;

/// Database facade for the relational store.
///
/// Holds the pooled PostgreSQL client shared by every chain worker and the
/// point calculator.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(&settings.database).await?;

        postgres.migrate().await?;

        info!("Database ready");

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}
