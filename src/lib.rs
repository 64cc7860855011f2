pub mod abis;
pub mod config;
pub mod cron;
pub mod db;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use cron::CronScheduler;
pub use db::Database;
pub use worker::{ChainManager, ChainWorker};
