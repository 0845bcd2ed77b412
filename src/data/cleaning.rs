//! Sensor data cleaning
//!
//! Removes physically impossible readings, orders rows by time, drops rows
//! that follow a sensor outage and derives the soil-humidity slope.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::SensorSample;
use crate::config::CleaningConfig;

/// A sample that survived cleaning, annotated with its gap and slope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CleanedSample {
    pub sample: SensorSample,
    /// Minutes since the previous in-bounds reading (0 for the first)
    pub gap_minutes: f64,
    /// Change in soil humidity since the previous surviving row
    pub soil_delta: f64,
}

/// Row counts after each cleaning step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub input_rows: usize,
    pub after_bounds: usize,
    pub dropped_after_gaps: usize,
    pub output_rows: usize,
    /// Rows whose `soil_delta` was reset because of a long gap
    pub delta_resets: usize,
}

/// Clean raw samples.
///
/// The output never has more rows than the input and is ordered by
/// non-decreasing timestamp. An empty output is a valid result.
pub fn clean(samples: &[SensorSample], config: &CleaningConfig) -> (Vec<CleanedSample>, CleaningReport) {
    let mut report = CleaningReport {
        input_rows: samples.len(),
        ..Default::default()
    };

    let mut kept: Vec<SensorSample> = samples
        .iter()
        .filter(|s| within_bounds(s, config))
        .copied()
        .collect();
    report.after_bounds = kept.len();

    // Vec::sort_by_key is stable, so duplicate timestamps keep input order.
    kept.sort_by_key(|s| s.timestamp);

    let gaps: Vec<f64> = kept
        .iter()
        .enumerate()
        .map(|(i, s)| match i {
            0 => 0.0,
            _ => minutes_between(&kept[i - 1], s),
        })
        .collect();

    let survivors: Vec<(SensorSample, f64)> = kept
        .into_iter()
        .zip(gaps)
        .filter(|(_, gap)| *gap <= config.gap_drop_threshold_minutes)
        .collect();
    report.dropped_after_gaps = report.after_bounds - survivors.len();

    let mut cleaned = Vec::with_capacity(survivors.len());
    let mut previous_soil: Option<f64> = None;
    for (sample, gap_minutes) in survivors {
        let raw_delta = previous_soil.map_or(0.0, |prev| sample.soil_humidity - prev);
        previous_soil = Some(sample.soil_humidity);

        let soil_delta = if gap_minutes > config.expected_interval_minutes {
            report.delta_resets += 1;
            0.0
        } else {
            raw_delta
        };

        cleaned.push(CleanedSample {
            sample,
            gap_minutes,
            soil_delta,
        });
    }
    report.output_rows = cleaned.len();

    info!(
        input = report.input_rows,
        after_bounds = report.after_bounds,
        dropped_after_gaps = report.dropped_after_gaps,
        delta_resets = report.delta_resets,
        output = report.output_rows,
        "Sensor data cleaned"
    );

    (cleaned, report)
}

fn within_bounds(sample: &SensorSample, config: &CleaningConfig) -> bool {
    config.soil_humidity.contains(sample.soil_humidity)
        && config.air_humidity.contains(sample.air_humidity)
        && config.temperature.contains(sample.temperature)
        && config.light.contains(sample.light)
}

fn minutes_between(earlier: &SensorSample, later: &SensorSample) -> f64 {
    let delta = later.timestamp - earlier.timestamp;
    delta.num_milliseconds() as f64 / 60_000.0
}
