use statrs::statistics::Statistics;

use crate::db::Column;
use crate::sensors::{DType, Reading, Value};

pub const SUMMARY_FIELDS: [&str; 4] = ["mean", "std", "min", "max"];

pub fn summary_columns() -> Vec<Column> {
    SUMMARY_FIELDS
        .iter()
        .map(|name| Column::new(*name, DType::Float))
        .collect()
}

/// Mean, sample standard deviation (N-1), min and max of `samples`.
///
/// A missing sample (NaN) makes every statistic NaN.
pub fn summarize(samples: &[f64]) -> Reading {
    let mean = Statistics::mean(samples.iter());
    let std = Statistics::std_dev(samples.iter());
    let min = Statistics::min(samples.iter());
    let max = Statistics::max(samples.iter());

    [mean, std, min, max]
        .into_iter()
        .zip(SUMMARY_FIELDS)
        .map(|(value, name)| (name.to_string(), Value::Float(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(summary: &Reading, name: &str) -> f64 {
        summary[name].as_f64().unwrap()
    }

    #[test]
    fn summarizes_samples() {
        let summary = summarize(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stat(&summary, "mean"), 2.5);
        assert!((stat(&summary, "std") - 1.290_994).abs() < 1e-6);
        assert_eq!(stat(&summary, "min"), 1.0);
        assert_eq!(stat(&summary, "max"), 4.0);
    }

    #[test]
    fn std_uses_sample_denominator() {
        let summary = summarize(&[10.0, 20.0]);
        assert!((stat(&summary, "std") - 7.071_068).abs() < 1e-6);
    }

    #[test]
    fn missing_sample_poisons_summary() {
        let summary = summarize(&[1.0, f64::NAN, 3.0]);
        for name in SUMMARY_FIELDS {
            assert!(summary[name].is_missing(), "{name} should be missing");
        }
    }
}
