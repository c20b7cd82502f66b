use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::{
    config::{MeasurementConfig, SensorConfig, StationConfig},
    db::Store,
    error::{StationError, StationResult},
    measurement::Measurement,
    scheduler::Scheduler,
    sensors::{A100r, AnemometerHandle, CachedSensor, Ds18x20, Dummy},
};

/// Everything one running station owns: the store, the scheduler, the named
/// sensors and the measurements feeding the store.
pub struct Station {
    config: StationConfig,
    store: Store,
    scheduler: Scheduler,
    sensors: BTreeMap<String, Arc<CachedSensor>>,
    anemometers: BTreeMap<String, AnemometerHandle>,
    measurements: Vec<Arc<Measurement>>,
}

impl Station {
    /// Builds sensors, then measurements (creating their tables). Nothing
    /// polls until [`start`](Self::start).
    pub async fn from_config(config: StationConfig) -> StationResult<Self> {
        config.validate()?;

        let store = Store::new(&config.db_url)?;
        let scheduler = Scheduler::new();

        let mut sensors = BTreeMap::new();
        let mut anemometers = BTreeMap::new();
        for (name, sensor_config) in &config.sensors {
            let sensor = match sensor_config {
                SensorConfig::Dummy { .. } => {
                    CachedSensor::new(name, Dummy::new(), sensor_config.cache_window())?
                }
                SensorConfig::Ds18x20 { path, .. } => {
                    CachedSensor::new(name, Ds18x20::new(path.clone()), sensor_config.cache_window())?
                }
                SensorConfig::A100r {
                    sampling_secs,
                    rpm_per_mps,
                    ..
                } => {
                    let driver = A100r::new(*rpm_per_mps);
                    let handle = driver.handle();
                    register_sampling(&scheduler, name, &handle, *sampling_secs)?;
                    anemometers.insert(name.clone(), handle);
                    CachedSensor::new(name, driver, sensor_config.cache_window())?
                }
            };
            info!("Sensor {name} ready ({} field(s))", sensor.dtypes().len());
            sensors.insert(name.clone(), Arc::new(sensor));
        }

        let mut measurements = Vec::with_capacity(config.measurements.len());
        for measurement_config in &config.measurements {
            let measurement =
                build_measurement(measurement_config, &sensors, &store, &scheduler).await?;
            measurements.push(measurement);
        }

        info!(
            "Station '{}' configured: {} sensor(s), {} measurement(s)",
            config.title,
            sensors.len(),
            measurements.len()
        );

        Ok(Self {
            config,
            store,
            scheduler,
            sensors,
            anemometers,
            measurements,
        })
    }

    pub fn start(&self) -> StationResult<()> {
        self.scheduler.start()
    }

    /// Stops the scheduler, waiting for in-flight acquisitions, then marks
    /// every measurement unscheduled.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        for measurement in &self.measurements {
            if let Err(err) = measurement.set_frequency(Duration::ZERO) {
                error!("Failed to unschedule {}: {err}", measurement.table());
            }
        }
        info!("Station '{}' stopped", self.config.title);
    }

    pub fn title(&self) -> &str {
        &self.config.title
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn sensor(&self, name: &str) -> Option<&Arc<CachedSensor>> {
        self.sensors.get(name)
    }

    /// Pulse input of an A100R sensor, for the edge-detect callback.
    pub fn anemometer(&self, name: &str) -> Option<&AnemometerHandle> {
        self.anemometers.get(name)
    }

    pub fn measurement(&self, table: &str) -> Option<&Arc<Measurement>> {
        self.measurements.iter().find(|m| m.table() == table)
    }

    pub fn measurements(&self) -> &[Arc<Measurement>] {
        &self.measurements
    }

    /// Default `since` for dashboard queries.
    pub fn viewport_since(&self) -> DateTime<Utc> {
        self.config.viewport_since()
    }
}

fn register_sampling(
    scheduler: &Scheduler,
    name: &str,
    handle: &AnemometerHandle,
    sampling_secs: f64,
) -> StationResult<()> {
    let every = Duration::try_from_secs_f64(sampling_secs).map_err(|err| {
        StationError::config(format!("sensor '{name}' sampling_secs: {err}"))
    })?;
    let handle = handle.clone();
    scheduler.add_job(format!("sample:{name}"), every, move || {
        let handle = handle.clone();
        async move { handle.sample() }
    })?;
    Ok(())
}

async fn build_measurement(
    config: &MeasurementConfig,
    sensors: &BTreeMap<String, Arc<CachedSensor>>,
    store: &Store,
    scheduler: &Scheduler,
) -> StationResult<Arc<Measurement>> {
    let sensor = sensors.get(&config.sensor).ok_or_else(|| {
        StationError::config(format!(
            "measurement '{}' references unknown sensor '{}'",
            config.table, config.sensor
        ))
    })?;

    let mut builder = Measurement::builder(Arc::clone(sensor), &config.table)
        .frequency(config.frequency())
        .samples(config.samples.unwrap_or(1));
    if let Some(field) = &config.field {
        builder = builder.field(field);
    }
    if let Some(label) = &config.label {
        builder = builder.label(label);
    }
    builder.build(store, scheduler).await
}
