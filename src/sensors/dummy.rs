use rand::Rng;

use super::{DType, Field, Reading, Sensor, Value};

const FIELDS: &[Field] = &[Field::new("random", DType::Float)];

/// Synthetic sensor producing uniform random numbers in `[0, 1)`.
#[derive(Debug, Default)]
pub struct Dummy;

impl Dummy {
    pub fn new() -> Self {
        Self
    }
}

impl Sensor for Dummy {
    fn dtypes(&self) -> &'static [Field] {
        FIELDS
    }

    fn read(&mut self) -> Reading {
        let value: f64 = rand::thread_rng().gen();
        Reading::from([("random".to_string(), Value::Float(value))])
    }
}
