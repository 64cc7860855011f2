use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ChainSettings, Settings};
use crate::worker::ChainWorker;
use crate::Database;

/// Represents a running chain indexer
struct RunningChain {
    name: String,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Supervises one indexer task per configured chain.
///
/// Starts every chain at launch and stops them all gracefully when the
/// shared cancellation token fires. Chains are independent: one chain's
/// worker failing does not stop the others.
pub struct ChainManager {
    settings: Arc<Settings>,
    db: Arc<Database>,
}

impl ChainManager {
    pub fn new(settings: Arc<Settings>, db: Arc<Database>) -> Self {
        Self { settings, db }
    }

    async fn start_chain(&self, config: &ChainSettings) -> Result<RunningChain> {
        info!(
            "Starting indexer for chain {} ({})",
            config.name, config.id
        );

        let worker = ChainWorker::new(config, self.settings.processor, self.db.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to initialize worker for chain {} ({}). Check the RPC URL.",
                    config.name, config.id
                )
            })?;

        let cancel_token = CancellationToken::new();
        let worker_token = cancel_token.clone();
        let chain_name = config.name.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run(worker_token).await {
                error!("Worker for {} failed: {:#}", chain_name, e);
            }
        });

        Ok(RunningChain {
            name: config.name.clone(),
            handle,
            cancel_token,
        })
    }

    /// Stop a chain indexer gracefully
    async fn stop_chain(running: RunningChain) {
        info!("Stopping indexer for chain {}", running.name);

        running.cancel_token.cancel();

        match tokio::time::timeout(Duration::from_secs(10), running.handle).await {
            Ok(_) => {
                info!("Indexer for chain {} stopped gracefully", running.name);
            },
            Err(_) => {
                warn!(
                    "Indexer for chain {} did not stop within timeout, continuing...",
                    running.name
                );
            },
        }
    }

    /// Run until cancellation. Startup is all-or-nothing: if any configured
    /// chain fails to initialize, the already-started workers are stopped
    /// and the error propagates so the process exits non-zero.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        let mut running: Vec<RunningChain> = Vec::new();

        for chain in &self.settings.chains {
            match self.start_chain(chain).await {
                Ok(rc) => running.push(rc),
                Err(e) => {
                    for rc in running {
                        Self::stop_chain(rc).await;
                    }
                    return Err(e);
                },
            }
        }

        if running.is_empty() {
            warn!("ChainManager: no chains configured, nothing to index");
        } else {
            info!("ChainManager: started {} chain indexer(s)", running.len());
        }

        cancellation_token.cancelled().await;
        info!("ChainManager: stopping all chain indexers...");

        for rc in running {
            Self::stop_chain(rc).await;
        }

        info!("ChainManager: shutdown complete");
        Ok(())
    }
}
