//! Feature matrix assembly

use chrono::Timelike;
use ndarray::{Array1, Array2};
use std::f64::consts::PI;

use super::target::LabeledSample;
use crate::error::{DrytimeError, Result};

/// Feature columns in the order the exported model expects them
pub const FEATURE_NAMES: [&str; 8] = [
    "soil_humidity",
    "soil_delta",
    "air_humidity",
    "temperature",
    "light",
    "hour_sin",
    "hour_cos",
    "threshold",
];

pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// Design matrix and target vector ready for fitting
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub feature_names: Vec<String>,
}

impl FeatureSet {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }
}

/// Cyclical encoding of the hour of day
pub fn hour_encoding(hour: u32) -> (f64, f64) {
    let angle = 2.0 * PI * hour as f64 / 24.0;
    (angle.sin(), angle.cos())
}

/// One feature row for a labeled sample
pub fn feature_row(row: &LabeledSample, threshold: f64) -> [f64; N_FEATURES] {
    let sample = &row.row.sample;
    let (hour_sin, hour_cos) = hour_encoding(sample.timestamp.hour());
    [
        sample.soil_humidity,
        row.row.soil_delta,
        sample.air_humidity,
        sample.temperature,
        sample.light,
        hour_sin,
        hour_cos,
        threshold,
    ]
}

/// Build the feature matrix from labeled rows.
///
/// # Errors
///
/// Returns `DrytimeError::Fit` if a row has no target.
pub fn build_features(rows: &[LabeledSample], threshold: f64) -> Result<FeatureSet> {
    let mut x = Array2::zeros((rows.len(), N_FEATURES));
    let mut y = Array1::zeros(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let target = row.minutes_to_dry.ok_or_else(|| {
            DrytimeError::Fit(format!("row {} has no minutes_to_dry target", i))
        })?;
        for (j, value) in feature_row(row, threshold).into_iter().enumerate() {
            x[[i, j]] = value;
        }
        y[i] = target;
    }

    Ok(FeatureSet {
        x,
        y,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
    })
}
