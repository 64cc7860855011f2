//! Cron scheduler for periodic background tasks.
//!
//! Runs the point accrual job on the configured window cadence. Window
//! boundaries are derived from wall clock at each firing, so a restart
//! simply begins a fresh window.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::PointsSettings;
use crate::db::Database;

use super::jobs;

/// Cron scheduler that manages the periodic point accrual job.
pub struct CronScheduler {
    db: Arc<Database>,
    settings: PointsSettings,
}

impl CronScheduler {
    pub fn new(db: Arc<Database>, settings: PointsSettings) -> Self {
        Self { db, settings }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        // The first window is accrued immediately; the timer covers the rest.
        let interval_minutes = self.settings.calculation_interval_minutes;
        if let Err(e) = jobs::accrue_points::run(&self.db, interval_minutes).await {
            error!("Failed to accrue points: {:#}", e);
        }

        let mut scheduler = JobScheduler::new().await?;

        self.register_accrue_points_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 1);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_accrue_points_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let interval_minutes = self.settings.calculation_interval_minutes;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval_minutes * 60),
            move |_uuid, _lock| {
                let db = db.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::accrue_points::run(&db, interval_minutes).await {
                        error!("Failed to accrue points: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered accrue_points job (every {}m)", interval_minutes);
        Ok(())
    }
}
