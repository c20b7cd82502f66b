pub mod config;
pub mod db;
pub mod error;
pub mod measurement;
pub mod scheduler;
pub mod sensors;
mod station;
mod utils;

use std::path::Path;

use anyhow::Context;
use log::info;

pub use config::{MeasurementConfig, SensorConfig, StationConfig};
pub use db::{ColumnData, Store};
pub use error::{ErrorKind, StationError, StationResult};
pub use measurement::{Aggregation, Measurement};
pub use scheduler::{JobId, Scheduler};
pub use sensors::{CachedSensor, DType, Reading, Sensor, Value};
pub use station::Station;

/// Runs the station described by `config_path` until Ctrl+C.
pub async fn run(config_path: &Path, debug: bool) -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    info!("skylog starting up...");
    info!("Loading config from {}", config_path.display());
    let config = StationConfig::load(config_path)?;

    let station = Station::from_config(config)
        .await
        .context("Failed to set up station")?;
    station.start().context("Failed to start scheduler")?;

    info!("Press Ctrl+C to quit!");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    station.shutdown().await;
    Ok(())
}
