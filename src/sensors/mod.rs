//! Sensor capability contract and the read cache that sits in front of it.
//!
//! A driver implements [`Sensor`]: a fixed list of typed fields plus a `read`
//! that may touch hardware. [`CachedSensor`] wraps a driver, validates every
//! fresh reading against the declared fields and reuses the last reading while
//! the cache window is open.

mod a100r;
mod ds18x20;
mod dummy;

pub use a100r::{A100r, AnemometerHandle};
pub use ds18x20::{parse_payload, Ds18x20};
pub use dummy::Dummy;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{StationError, StationResult};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Sentinel for a numeric field whose hardware read failed.
pub const MISSING: f64 = f64::NAN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Integer,
    Float,
    Timestamp,
}

impl DType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            DType::Integer => "INTEGER",
            DType::Float => "REAL",
            DType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn from_sql_type(decl: &str) -> Option<Self> {
        match decl.to_ascii_uppercase().as_str() {
            "INTEGER" => Some(DType::Integer),
            "REAL" => Some(DType::Float),
            "TIMESTAMP" => Some(DType::Timestamp),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Integer | DType::Float)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Integer => "integer",
            DType::Float => "float",
            DType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single typed cell, either read from a sensor or loaded from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    /// Missing-data marker for non-float fields.
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Timestamp(_) => "timestamp",
            Value::Null => "null",
        }
    }

    /// `Null` stands in for any type, so a degraded read still validates.
    pub fn matches(&self, dtype: DType) -> bool {
        matches!(
            (self, dtype),
            (Value::Null, _)
                | (Value::Integer(_), DType::Integer)
                | (Value::Float(_), DType::Float)
                | (Value::Timestamp(_), DType::Timestamp)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Null => Some(MISSING),
            Value::Timestamp(_) => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(v) => v.is_nan(),
            _ => false,
        }
    }
}

/// Field name to value, as produced by a sensor or stored as a row.
pub type Reading = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub dtype: DType,
}

impl Field {
    pub const fn new(name: &'static str, dtype: DType) -> Self {
        Self { name, dtype }
    }
}

/// A concrete sensor driver.
///
/// `read` must not fail for hardware reasons: unreachable devices and garbage
/// payloads come back as [`MISSING`] (or [`Value::Null`]) in the affected
/// fields.
pub trait Sensor: Send + 'static {
    /// The fields every reading carries. Fixed for the lifetime of the driver.
    fn dtypes(&self) -> &'static [Field];

    fn read(&mut self) -> Reading;
}

struct CacheState {
    driver: Box<dyn Sensor>,
    last_value: Option<Reading>,
    last_read_at: Option<Instant>,
}

/// Shared, cache-fronted access to one sensor driver.
pub struct CachedSensor {
    name: String,
    fields: &'static [Field],
    cache_window: Duration,
    state: Mutex<CacheState>,
}

impl fmt::Debug for CachedSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSensor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("cache_window", &self.cache_window)
            .finish()
    }
}

impl CachedSensor {
    pub fn new(
        name: impl Into<String>,
        driver: impl Sensor,
        cache_window: Duration,
    ) -> StationResult<Self> {
        let name = name.into();
        let fields = driver.dtypes();
        if fields.is_empty() {
            return Err(StationError::config(format!(
                "sensor '{name}' declares no fields"
            )));
        }

        Ok(Self {
            name,
            fields,
            cache_window,
            state: Mutex::new(CacheState {
                driver: Box::new(driver),
                last_value: None,
                last_read_at: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtypes(&self) -> &'static [Field] {
        self.fields
    }

    pub fn field(&self, name: &str) -> Option<Field> {
        self.fields.iter().copied().find(|f| f.name == name)
    }

    pub fn cache_window(&self) -> Duration {
        self.cache_window
    }

    /// Last validated reading, without touching the driver.
    pub fn last_value(&self) -> Option<Reading> {
        self.lock().last_value.clone()
    }

    /// Current reading: cached while the window is open, otherwise fresh and
    /// validated against the declared fields.
    pub fn value(&self) -> StationResult<Reading> {
        let mut state = self.lock();

        if let (Some(at), Some(last)) = (state.last_read_at, state.last_value.as_ref()) {
            if !self.cache_window.is_zero() && at.elapsed() <= self.cache_window {
                log_debug!("sensor {}: serving cached reading", self.name);
                return Ok(last.clone());
            }
        }

        let raw = state.driver.read();
        let reading = validate(self.fields, raw)?;

        state.last_value = Some(reading.clone());
        state.last_read_at = Some(Instant::now());
        Ok(reading)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn validate(fields: &[Field], mut raw: Reading) -> StationResult<Reading> {
    let mut reading = Reading::new();
    for field in fields {
        let value = raw
            .remove(field.name)
            .ok_or_else(|| StationError::MissingField(field.name.to_string()))?;
        if !value.matches(field.dtype) {
            return Err(StationError::Type {
                field: field.name.to_string(),
                expected: field.dtype,
                found: value.type_name().to_string(),
            });
        }
        reading.insert(field.name.to_string(), value);
    }
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::error::ErrorKind;

    const RANDOM: &[Field] = &[Field::new("random", DType::Float)];

    /// Counts driver invocations and returns a different value each time.
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl Sensor for Counting {
        fn dtypes(&self) -> &'static [Field] {
            RANDOM
        }

        fn read(&mut self) -> Reading {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Reading::from([("random".to_string(), Value::Float(n as f64))])
        }
    }

    struct Fixed(Reading);

    impl Sensor for Fixed {
        fn dtypes(&self) -> &'static [Field] {
            RANDOM
        }

        fn read(&mut self) -> Reading {
            self.0.clone()
        }
    }

    struct Fieldless;

    impl Sensor for Fieldless {
        fn dtypes(&self) -> &'static [Field] {
            &[]
        }

        fn read(&mut self) -> Reading {
            Reading::new()
        }
    }

    #[test]
    fn zero_cache_window_always_reads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sensor = CachedSensor::new(
            "counting",
            Counting { calls: calls.clone() },
            Duration::ZERO,
        )
        .unwrap();

        let first = sensor.value().unwrap();
        let second = sensor.value().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn cache_window_reuses_last_reading() {
        let sensor =
            CachedSensor::new("dummy", Dummy::new(), Duration::from_millis(100)).unwrap();

        let first = sensor.value().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(first, sensor.value().unwrap());

        std::thread::sleep(Duration::from_millis(100));
        assert_ne!(first, sensor.value().unwrap());
    }

    #[test]
    fn last_value_does_not_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sensor = CachedSensor::new(
            "counting",
            Counting { calls: calls.clone() },
            Duration::ZERO,
        )
        .unwrap();

        assert!(sensor.last_value().is_none());
        let reading = sensor.value().unwrap();
        assert_eq!(sensor.last_value(), Some(reading));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let reading = Reading::from([("random".to_string(), Value::Integer(42))]);
        let sensor = CachedSensor::new("fixed", Fixed(reading), Duration::ZERO).unwrap();
        let err = sensor.value().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn missing_field_is_rejected() {
        let sensor = CachedSensor::new("fixed", Fixed(Reading::new()), Duration::ZERO).unwrap();
        let err = sensor.value().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }

    #[test]
    fn failed_validation_keeps_previous_cache() {
        let sensor = CachedSensor::new("fixed", Fixed(Reading::new()), Duration::ZERO).unwrap();
        assert!(sensor.value().is_err());
        assert!(sensor.last_value().is_none());
    }

    #[test]
    fn sentinel_values_pass_validation() {
        let reading = Reading::from([("random".to_string(), Value::Float(MISSING))]);
        let sensor = CachedSensor::new("fixed", Fixed(reading), Duration::ZERO).unwrap();
        assert!(sensor.value().unwrap()["random"].is_missing());

        let reading = Reading::from([("random".to_string(), Value::Null)]);
        let sensor = CachedSensor::new("fixed", Fixed(reading), Duration::ZERO).unwrap();
        assert!(sensor.value().unwrap()["random"].is_missing());
    }

    #[test]
    fn undeclared_fields_are_dropped() {
        let reading = Reading::from([
            ("random".to_string(), Value::Float(0.5)),
            ("extra".to_string(), Value::Integer(1)),
        ]);
        let sensor = CachedSensor::new("fixed", Fixed(reading), Duration::ZERO).unwrap();
        let value = sensor.value().unwrap();
        assert_eq!(value.len(), 1);
        assert!(value.contains_key("random"));
    }

    #[test]
    fn empty_dtypes_is_configuration_error() {
        let err = CachedSensor::new("fieldless", Fieldless, Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn dummy_reports_declared_types() {
        let sensor = CachedSensor::new("dummy", Dummy::new(), Duration::ZERO).unwrap();
        let field = sensor.field("random").unwrap();
        assert_eq!(field.dtype, DType::Float);

        let value = sensor.value().unwrap();
        for field in sensor.dtypes() {
            assert!(value[field.name].matches(field.dtype));
        }
    }
}
