use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StationError, StationResult};

fn default_title() -> String {
    "skylog".into()
}

fn default_db_url() -> String {
    "sqlite:////tmp/skylog.sqlite3".into()
}

fn default_viewport_secs() -> f64 {
    24.0 * 60.0 * 60.0
}

fn default_sampling_secs() -> f64 {
    10.0
}

fn default_rpm_per_mps() -> f64 {
    60.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorConfig {
    Dummy {
        #[serde(default)]
        cache_secs: f64,
    },
    Ds18x20 {
        path: PathBuf,
        #[serde(default)]
        cache_secs: f64,
    },
    A100r {
        #[serde(default = "default_sampling_secs")]
        sampling_secs: f64,
        #[serde(default = "default_rpm_per_mps")]
        rpm_per_mps: f64,
        #[serde(default)]
        cache_secs: f64,
    },
}

impl SensorConfig {
    pub fn cache_window(&self) -> Duration {
        let secs = match self {
            SensorConfig::Dummy { cache_secs }
            | SensorConfig::Ds18x20 { cache_secs, .. }
            | SensorConfig::A100r { cache_secs, .. } => *cache_secs,
        };
        seconds(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub sensor: String,
    pub table: String,
    #[serde(default)]
    pub frequency_secs: f64,
    /// Polls per stored row; absent or 1 stores every poll.
    #[serde(default)]
    pub samples: Option<usize>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl MeasurementConfig {
    pub fn frequency(&self) -> Duration {
        seconds(self.frequency_secs)
    }
}

/// Station definition: which sensors exist and which tables they feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default = "default_viewport_secs")]
    pub viewport_secs: f64,
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorConfig>,
    #[serde(default)]
    pub measurements: Vec<MeasurementConfig>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            db_url: default_db_url(),
            viewport_secs: default_viewport_secs(),
            sensors: BTreeMap::new(),
            measurements: Vec::new(),
        }
    }
}

impl StationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Config file not found at {}", path.display());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: StationConfig =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross references and durations. Nothing is built from a config
    /// that fails here.
    pub fn validate(&self) -> StationResult<()> {
        check_secs("viewport_secs", self.viewport_secs)?;

        for (name, sensor) in &self.sensors {
            match sensor {
                SensorConfig::Dummy { cache_secs } | SensorConfig::Ds18x20 { cache_secs, .. } => {
                    check_secs(&format!("sensor '{name}' cache_secs"), *cache_secs)?;
                }
                SensorConfig::A100r {
                    sampling_secs,
                    rpm_per_mps,
                    cache_secs,
                } => {
                    check_secs(&format!("sensor '{name}' cache_secs"), *cache_secs)?;
                    check_secs(&format!("sensor '{name}' sampling_secs"), *sampling_secs)?;
                    if *sampling_secs == 0.0 {
                        return Err(StationError::config(format!(
                            "sensor '{name}' sampling_secs must be positive"
                        )));
                    }
                    if !rpm_per_mps.is_finite() || *rpm_per_mps <= 0.0 {
                        return Err(StationError::config(format!(
                            "sensor '{name}' rpm_per_mps must be positive"
                        )));
                    }
                }
            }
        }

        let mut tables = HashSet::new();
        for measurement in &self.measurements {
            if !self.sensors.contains_key(&measurement.sensor) {
                return Err(StationError::config(format!(
                    "measurement '{}' references unknown sensor '{}'",
                    measurement.table, measurement.sensor
                )));
            }
            check_secs(
                &format!("measurement '{}' frequency_secs", measurement.table),
                measurement.frequency_secs,
            )?;
            if !tables.insert(measurement.table.as_str()) {
                return Err(StationError::config(format!(
                    "table '{}' is used by more than one measurement",
                    measurement.table
                )));
            }
        }
        Ok(())
    }

    pub fn viewport(&self) -> Duration {
        seconds(self.viewport_secs)
    }

    /// Default lower time bound for dashboard queries.
    pub fn viewport_since(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.viewport())
            .ok()
            .and_then(|viewport| Utc::now().checked_sub_signed(viewport))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Validated configs never hit the zero fallback.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

fn check_secs(what: &str, secs: f64) -> StationResult<()> {
    if Duration::try_from_secs_f64(secs).is_err() {
        return Err(StationError::config(format!(
            "{what} must be a non-negative number of seconds, got {secs}"
        )));
    }
    Ok(())
}
