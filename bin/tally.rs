use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use tally::{ChainManager, CronScheduler, Database, Settings};

/// Multi-chain transfer indexer with time-weighted holding points
#[derive(Parser, Debug)]
#[command(name = "tally")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    let args = Args::parse();

    // Load configuration
    let settings = Arc::new(Settings::load(&args.config).with_context(|| {
        format!(
            "Failed to load {}. Please ensure it exists and is valid",
            args.config
        )
    })?);

    let db = Arc::new(
        Database::new(&settings)
            .await
            .context("Failed to initialize database connection")?,
    );

    let cancellation_token = CancellationToken::new();

    // One indexer task per configured chain
    let chain_manager = ChainManager::new(settings.clone(), db.clone());

    let chain_manager_token = cancellation_token.child_token();
    let chain_manager_handle = tokio::spawn(async move {
        if let Err(e) = chain_manager.run(chain_manager_token).await {
            error!("Chain manager failed: {:#}", e);
        }
    });

    info!("Chain manager started");

    // Periodic point accrual
    let cron_scheduler = CronScheduler::new(db.clone(), settings.points);

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - points accrue periodically");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    // Cancel all running tasks and wait for them to drain
    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for chain manager to stop...");
    let _ = chain_manager_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("All tasks stopped");
    Ok(())
}
