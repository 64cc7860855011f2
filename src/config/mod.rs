mod config;

pub use config::{
    ChainSettings, DatabaseSettings, PointsSettings, ProcessorSettings, Settings,
};
