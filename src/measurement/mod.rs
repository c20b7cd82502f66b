//! Binding of one sensor to one table and one polling cadence.
//!
//! A [`Measurement`] creates its table once, at construction. Each scheduler
//! tick calls [`Measurement::acquire`], which either stores the sensor reading
//! as-is or folds one scalar into a pending window and stores a
//! mean/std/min/max summary once the window is full.

mod statistics;

pub use statistics::{summarize, SUMMARY_FIELDS};

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::db::{Column, ColumnData, Store, TIME_COLUMN};
use crate::error::{StationError, StationResult};
use crate::scheduler::{JobId, Scheduler};
use crate::sensors::{CachedSensor, Reading, Value};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Every poll becomes a row carrying the sensor's own fields.
    Single,
    /// `samples` polls of `field` become one summary row.
    Statistical { samples: usize, field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Unscheduled,
    Scheduled { job: JobId, every: Duration },
}

pub struct MeasurementBuilder {
    sensor: Arc<CachedSensor>,
    table: String,
    frequency: Duration,
    samples: usize,
    field: Option<String>,
    label: String,
}

impl MeasurementBuilder {
    /// Polling interval; zero leaves the measurement unscheduled.
    pub fn frequency(mut self, every: Duration) -> Self {
        self.frequency = every;
        self
    }

    /// Polls per stored row. One or zero stores every poll unaggregated.
    pub fn samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Sensor field to aggregate; defaults to the sensor's only field.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub async fn build(self, store: &Store, scheduler: &Scheduler) -> StationResult<Arc<Measurement>> {
        let aggregation = resolve_aggregation(&self.sensor, self.samples, self.field)?;
        let columns = match &aggregation {
            Aggregation::Single => self.sensor.dtypes().iter().map(Column::from).collect(),
            Aggregation::Statistical { .. } => statistics::summary_columns(),
        };

        store.ensure_table(&self.table, &columns).await?;

        let measurement = Arc::new(Measurement {
            sensor: self.sensor,
            store: store.clone(),
            scheduler: scheduler.clone(),
            table: self.table,
            label: self.label,
            aggregation,
            columns,
            pending: tokio::sync::Mutex::new(Vec::new()),
            last: Mutex::new(None),
            schedule: Mutex::new(Schedule::Unscheduled),
        });
        measurement.set_frequency(self.frequency)?;
        Ok(measurement)
    }
}

fn resolve_aggregation(
    sensor: &CachedSensor,
    samples: usize,
    field: Option<String>,
) -> StationResult<Aggregation> {
    if samples <= 1 {
        return Ok(Aggregation::Single);
    }

    let field = match field {
        Some(name) => sensor.field(&name).ok_or_else(|| {
            StationError::config(format!(
                "sensor '{}' has no field '{name}'",
                sensor.name()
            ))
        })?,
        None => match sensor.dtypes() {
            [only] => *only,
            _ => {
                return Err(StationError::config(format!(
                    "sensor '{}' has several fields; name the one to aggregate",
                    sensor.name()
                )))
            }
        },
    };

    if !field.dtype.is_numeric() {
        return Err(StationError::config(format!(
            "field '{}' of sensor '{}' is not numeric",
            field.name,
            sensor.name()
        )));
    }

    Ok(Aggregation::Statistical {
        samples,
        field: field.name.to_string(),
    })
}

pub struct Measurement {
    sensor: Arc<CachedSensor>,
    store: Store,
    scheduler: Scheduler,
    table: String,
    label: String,
    aggregation: Aggregation,
    columns: Vec<Column>,
    /// Raw samples of the open aggregation window. Held across a whole
    /// acquisition, which serialises acquisitions of this measurement.
    pending: tokio::sync::Mutex<Vec<f64>>,
    last: Mutex<Option<Reading>>,
    schedule: Mutex<Schedule>,
}

impl Measurement {
    pub fn builder(sensor: Arc<CachedSensor>, table: impl Into<String>) -> MeasurementBuilder {
        MeasurementBuilder {
            sensor,
            table: table.into(),
            frequency: Duration::ZERO,
            samples: 1,
            field: None,
            label: String::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sensor(&self) -> &Arc<CachedSensor> {
        &self.sensor
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    /// Stored columns, `time` first.
    pub fn columns(&self) -> Vec<Column> {
        std::iter::once(Column::time())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    /// Most recently stored row.
    pub fn last(&self) -> Option<Reading> {
        lock(&self.last).clone()
    }

    pub async fn pending_samples(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn schedule(&self) -> Schedule {
        *lock(&self.schedule)
    }

    /// Polling interval, zero when unscheduled.
    pub fn frequency(&self) -> Duration {
        match *lock(&self.schedule) {
            Schedule::Unscheduled => Duration::ZERO,
            Schedule::Scheduled { every, .. } => every,
        }
    }

    /// Moves between unscheduled and scheduled. A measurement owns at most one
    /// job: a new nonzero interval reschedules it, zero removes it.
    pub fn set_frequency(self: &Arc<Self>, every: Duration) -> StationResult<()> {
        let mut schedule = lock(&self.schedule);

        match (*schedule, every.is_zero()) {
            (Schedule::Unscheduled, true) => {}
            (Schedule::Unscheduled, false) => {
                let this = Arc::clone(self);
                let job = self.scheduler.add_job(
                    format!("acquire:{}", self.table),
                    every,
                    move || {
                        let this = Arc::clone(&this);
                        async move { this.tick().await }
                    },
                )?;
                *schedule = Schedule::Scheduled { job, every };
                log_info!("measurement {} polling every {every:?}", self.table);
            }
            (Schedule::Scheduled { every: current, .. }, false) if current == every => {}
            (Schedule::Scheduled { job, .. }, false) => {
                self.scheduler.reschedule(job, every)?;
                *schedule = Schedule::Scheduled { job, every };
                log_info!("measurement {} now polling every {every:?}", self.table);
            }
            (Schedule::Scheduled { job, .. }, true) => {
                self.scheduler.remove(job);
                *schedule = Schedule::Unscheduled;
                log_info!("measurement {} unscheduled", self.table);
            }
        }
        Ok(())
    }

    async fn tick(&self) {
        if let Err(err) = self.acquire().await {
            log_error!("acquisition for {} failed: {err}", self.table);
        }
    }

    /// Polls the sensor once and stores a row when one is ready.
    ///
    /// A storage failure while flushing a statistical window keeps the pending
    /// samples; the next poll appends to them and flushes again.
    pub async fn acquire(&self) -> StationResult<()> {
        let mut pending = self.pending.lock().await;

        let sensor = Arc::clone(&self.sensor);
        let reading = tokio::task::spawn_blocking(move || sensor.value())
            .await
            .map_err(|err| StationError::scheduling(format!("sensor read task failed: {err}")))??;

        let row = match &self.aggregation {
            Aggregation::Single => reading,
            Aggregation::Statistical { samples, field } => {
                let sample = reading
                    .get(field)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| StationError::MissingField(field.clone()))?;
                pending.push(sample);

                if pending.len() < *samples {
                    log_debug!(
                        "measurement {}: {}/{samples} samples",
                        self.table,
                        pending.len()
                    );
                    return Ok(());
                }
                summarize(&pending)
            }
        };

        let row = self.store_row(row).await?;
        pending.clear();
        *lock(&self.last) = Some(row);
        Ok(())
    }

    async fn store_row(&self, mut row: Reading) -> StationResult<Reading> {
        row.insert(TIME_COLUMN.to_string(), Value::Timestamp(Utc::now()));
        self.store.insert(&self.table, &row).await?;
        Ok(row)
    }

    /// Stored rows with `time >= since` (all rows when `None`), as one series
    /// per column. `columns: None` selects every column; `time` is always
    /// included and every selected column is present even with no rows.
    pub async fn data(
        &self,
        since: Option<DateTime<Utc>>,
        columns: Option<&[&str]>,
    ) -> StationResult<ColumnData> {
        self.store.query(&self.table, columns, since).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
