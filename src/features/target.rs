//! Regression target derivation
//!
//! `minutes_to_dry` is the number of whole minutes from a reading until soil
//! humidity is next observed below the watering threshold.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::CleanedSample;

/// Record of a threshold replaced because no reading ever fell below it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAdjustment {
    pub requested: f64,
    pub applied: f64,
    pub min_observed: f64,
}

/// A cleaned row with its (possibly undefined) target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub row: CleanedSample,
    pub minutes_to_dry: Option<f64>,
}

/// Output of target derivation
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDerivation {
    /// Threshold actually used, after any repair
    pub threshold: f64,
    pub adjustment: Option<ThresholdAdjustment>,
    /// Rows with a defined target, in time order
    pub rows: Vec<LabeledSample>,
    /// Number of cleaned rows strictly below the threshold
    pub rows_below_threshold: usize,
}

/// Linear-interpolation quantile (closest-ranks), `q` in `[0, 1]`.
///
/// Returns `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Replace an unreachable threshold with a low quantile of observed soil humidity.
///
/// A threshold is unreachable when every reading is at or above it.
pub fn repair_threshold(
    rows: &[CleanedSample],
    threshold: f64,
    fallback_quantile: f64,
) -> (f64, Option<ThresholdAdjustment>) {
    let soil: Vec<f64> = rows.iter().map(|r| r.sample.soil_humidity).collect();
    let min_observed = soil.iter().copied().fold(f64::INFINITY, f64::min);
    if soil.is_empty() || min_observed < threshold {
        return (threshold, None);
    }

    let Some(applied) = quantile(&soil, fallback_quantile) else {
        return (threshold, None);
    };
    warn!(
        requested = threshold,
        min_observed,
        applied,
        "Threshold is never reached by observed soil humidity, using fallback quantile"
    );
    (
        applied,
        Some(ThresholdAdjustment {
            requested: threshold,
            applied,
            min_observed,
        }),
    )
}

/// Whole minutes since the Unix epoch, floored
fn epoch_minutes(row: &CleanedSample) -> i64 {
    row.sample.timestamp.and_utc().timestamp().div_euclid(60)
}

/// Compute `minutes_to_dry` for every row.
///
/// The target is the minute distance to the first *later* row whose soil
/// humidity is below `threshold`. Rows with no such later row, the last row
/// included, have no target.
pub fn label_rows(rows: &[CleanedSample], threshold: f64) -> Vec<LabeledSample> {
    let n = rows.len();
    let mut labeled = vec![None; n];
    let mut next_below: Option<i64> = None;

    for i in (0..n).rev() {
        let minute = epoch_minutes(&rows[i]);
        labeled[i] = next_below.map(|j| (j - minute) as f64);
        if rows[i].sample.soil_humidity < threshold {
            next_below = Some(minute);
        }
    }

    rows.iter()
        .zip(labeled)
        .map(|(row, minutes_to_dry)| LabeledSample {
            row: *row,
            minutes_to_dry,
        })
        .collect()
}

/// Repair the threshold, label every row and keep only rows with a target
pub fn derive_targets(
    rows: &[CleanedSample],
    threshold: f64,
    fallback_quantile: f64,
) -> TargetDerivation {
    let (threshold, adjustment) = repair_threshold(rows, threshold, fallback_quantile);

    let rows_below_threshold = rows
        .iter()
        .filter(|r| r.sample.soil_humidity < threshold)
        .count();
    if rows_below_threshold == 0 {
        warn!(threshold, "No samples below threshold, minutes_to_dry cannot be derived");
    }

    let labeled: Vec<LabeledSample> = label_rows(rows, threshold)
        .into_iter()
        .filter(|l| l.minutes_to_dry.is_some())
        .collect();

    info!(
        threshold,
        rows_below_threshold,
        labeled = labeled.len(),
        dropped = rows.len() - labeled.len(),
        "Derived minutes_to_dry"
    );

    TargetDerivation {
        threshold,
        adjustment,
        rows: labeled,
        rows_below_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SensorSample;
    use chrono::NaiveDate;

    fn row(minute: i64, soil: f64) -> CleanedSample {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        CleanedSample {
            sample: SensorSample {
                timestamp: base + chrono::Duration::minutes(minute),
                soil_humidity: soil,
                air_humidity: 50.0,
                temperature: 20.0,
                light: 100.0,
            },
            gap_minutes: 10.0,
            soil_delta: 0.0,
        }
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let values = [95.0, 80.0, 90.0, 82.0, 85.0];
        assert!((quantile(&values, 0.10).unwrap() - 80.8).abs() < 1e-9);
        assert_eq!(quantile(&values, 0.0), Some(80.0));
        assert_eq!(quantile(&values, 1.0), Some(95.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_labels_point_at_next_later_crossing() {
        let rows = vec![row(0, 30.0), row(10, 10.0), row(20, 5.0)];
        let labels: Vec<_> = label_rows(&rows, 20.0)
            .iter()
            .map(|l| l.minutes_to_dry)
            .collect();
        // a row already below waits for the next later reading below
        assert_eq!(labels, vec![Some(10.0), Some(10.0), None]);
    }

    #[test]
    fn test_rows_after_last_crossing_are_undefined() {
        let rows = vec![row(0, 30.0), row(10, 10.0), row(20, 40.0), row(30, 45.0)];
        let labels: Vec<_> = label_rows(&rows, 20.0)
            .iter()
            .map(|l| l.minutes_to_dry)
            .collect();
        assert_eq!(labels, vec![Some(10.0), None, None, None]);
    }

    #[test]
    fn test_seconds_are_truncated() {
        let mut first = row(0, 30.0);
        first.sample.timestamp += chrono::Duration::seconds(59);
        let rows = vec![first, row(10, 10.0), row(20, 5.0)];
        assert_eq!(label_rows(&rows, 20.0)[0].minutes_to_dry, Some(10.0));
    }

    #[test]
    fn test_repair_fires_only_when_unreachable() {
        let rows: Vec<_> = [80.0, 82.0, 85.0, 90.0, 95.0]
            .iter()
            .enumerate()
            .map(|(i, s)| row(i as i64 * 10, *s))
            .collect();

        let (applied, adjustment) = repair_threshold(&rows, 50.0, 0.10);
        assert!((applied - 80.8).abs() < 1e-9);
        let adjustment = adjustment.unwrap();
        assert_eq!(adjustment.requested, 50.0);
        assert_eq!(adjustment.min_observed, 80.0);

        let (applied, adjustment) = repair_threshold(&rows, 81.0, 0.10);
        assert_eq!(applied, 81.0);
        assert!(adjustment.is_none());
    }

    #[test]
    fn test_single_crossing_at_start_leaves_no_targets() {
        let rows: Vec<_> = [80.0, 82.0, 85.0, 90.0, 95.0]
            .iter()
            .enumerate()
            .map(|(i, s)| row(i as i64 * 10, *s))
            .collect();
        let derivation = derive_targets(&rows, 50.0, 0.10);
        // only the first reading is below the repaired threshold, nothing follows it
        assert_eq!(derivation.rows_below_threshold, 1);
        assert!(derivation.rows.is_empty());
        assert!(derivation.adjustment.is_some());
    }

    #[test]
    fn test_no_row_below_threshold_after_repair() {
        // equal readings: p10 equals the minimum, still nothing strictly below
        let rows = vec![row(0, 60.0), row(10, 60.0), row(20, 60.0)];
        let derivation = derive_targets(&rows, 50.0, 0.10);
        assert_eq!(derivation.rows_below_threshold, 0);
        assert!(derivation.rows.is_empty());
    }
}
