use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use log::debug;

use super::{DType, Field, Reading, Sensor, Value};

const FIELDS: &[Field] = &[
    Field::new("windspeed_avg", DType::Float),
    Field::new("windspeed_std", DType::Float),
    Field::new("windspeed_min", DType::Float),
    Field::new("windspeed_max", DType::Float),
];

#[derive(Debug, Default, Clone, Copy)]
struct RunningStats {
    n: u64,
    sum: f64,
    sum2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn push(&mut self, x: f64) {
        if self.n == 0 || x < self.min {
            self.min = x;
        }
        if self.n == 0 || x > self.max {
            self.max = x;
        }
        self.sum += x;
        self.sum2 += x * x;
        self.n += 1;
    }

    fn mean(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.sum / self.n as f64
    }

    /// Sample standard deviation (N-1); zero below two samples.
    fn std_dev(&self) -> f64 {
        if self.n <= 1 {
            return 0.0;
        }
        let n = self.n as f64;
        ((self.sum2 - self.sum * self.sum / n) / (n - 1.0)).max(0.0).sqrt()
    }
}

#[derive(Debug)]
struct PulseState {
    counts: u64,
    window_start: Instant,
    stats: RunningStats,
}

/// Shared handle to the anemometer's pulse counter.
///
/// The edge-detect callback calls [`record_pulse`](Self::record_pulse); a
/// recurring job calls [`sample`](Self::sample) to fold the pulse rate into the
/// running statistics that the next `read` reports and resets.
#[derive(Debug, Clone)]
pub struct AnemometerHandle {
    inner: Arc<Mutex<PulseState>>,
}

impl AnemometerHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PulseState {
                counts: 0,
                window_start: Instant::now(),
                stats: RunningStats::default(),
            })),
        }
    }

    pub fn record_pulse(&self) {
        self.lock().counts += 1;
    }

    /// Pulses per second since the window started; `reset` starts a new window.
    pub fn counts_per_second(&self, reset: bool) -> f64 {
        let mut state = self.lock();
        let seconds = state.window_start.elapsed().as_secs_f64();
        let counts = state.counts;
        if reset {
            state.window_start = Instant::now();
            state.counts = 0;
        }
        if seconds > 0.0 {
            counts as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn sample(&self) {
        let cps = self.counts_per_second(true);
        self.record_sample(cps);
    }

    pub fn record_sample(&self, cps: f64) {
        debug!("A100R: sampled {cps:.3} counts/s");
        self.lock().stats.push(cps);
    }

    fn take_stats(&self) -> RunningStats {
        std::mem::take(&mut self.lock().stats)
    }

    fn lock(&self) -> MutexGuard<'_, PulseState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Vector Instruments A100R cup anemometer on a pulse input.
#[derive(Debug)]
pub struct A100r {
    handle: AnemometerHandle,
    calibration: f64,
}

impl A100r {
    /// `rpm_per_mps` is the rotor calibration in rpm per m/s.
    pub fn new(rpm_per_mps: f64) -> Self {
        Self {
            handle: AnemometerHandle::new(),
            calibration: 60.0 / rpm_per_mps,
        }
    }

    pub fn handle(&self) -> AnemometerHandle {
        self.handle.clone()
    }
}

impl Sensor for A100r {
    fn dtypes(&self) -> &'static [Field] {
        FIELDS
    }

    fn read(&mut self) -> Reading {
        let stats = self.handle.take_stats();
        let (min, max) = if stats.n == 0 {
            (0.0, 0.0)
        } else {
            (stats.min, stats.max)
        };
        let k = self.calibration;
        Reading::from([
            ("windspeed_avg".to_string(), Value::Float(k * stats.mean())),
            ("windspeed_std".to_string(), Value::Float(k * stats.std_dev())),
            ("windspeed_min".to_string(), Value::Float(k * min)),
            ("windspeed_max".to_string(), Value::Float(k * max)),
        ])
    }
}
