//! Timestamped model artifacts
//!
//! Writes the ONNX graph and its JSON metadata record side by side as
//! `<basename>_<YYYYMMDDHHMMSS>.onnx` and `<basename>_<YYYYMMDDHHMMSS>.metadata.json`.
//! The encoded graph is decoded and checked against the in-process model first;
//! a graph that predicts differently is an export error and nothing is written.

use chrono::{DateTime, Duration, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::evaluator::OnnxModel;
use super::onnx::{ONNXConfig, ONNXExporter};
use crate::config::ModelVariant;
use crate::error::{DrytimeError, Result};
use crate::features::ThresholdAdjustment;
use crate::training::{FitReport, FittedPipeline, Hyperparameters};

/// JSON record written next to every model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub model_type: String,
    pub target: String,
    pub feature_names: Vec<String>,
    /// Best grid point, flattened (`alpha` or `n_estimators` + `max_depth`)
    #[serde(flatten)]
    pub hyperparameters: Hyperparameters,
    pub cross_val_splits: usize,
    pub training_timestamp_utc: DateTime<Utc>,
    pub rmse_cv: f64,
    pub r2_insample: f64,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_adjustment: Option<ThresholdAdjustment>,
    pub n_training_rows: usize,
}

impl TrainingMetadata {
    pub fn from_report(
        report: &FitReport,
        feature_names: &[String],
        threshold: f64,
        threshold_adjustment: Option<ThresholdAdjustment>,
        trained_at: DateTime<Utc>,
    ) -> Self {
        Self {
            model_type: report.best_params.variant().model_type().to_string(),
            target: format!("minutes_to_dry (<{}% soil humidity)", threshold),
            feature_names: feature_names.to_vec(),
            hyperparameters: report.best_params,
            cross_val_splits: report.n_splits,
            training_timestamp_utc: trained_at,
            rmse_cv: report.rmse_cv,
            r2_insample: report.r2_insample,
            threshold,
            threshold_adjustment,
            n_training_rows: report.n_training_rows,
        }
    }

    pub fn variant(&self) -> ModelVariant {
        self.hyperparameters.variant()
    }

    /// Key/value pairs embedded in the ONNX model
    fn onnx_properties(&self) -> Vec<(String, String)> {
        vec![
            ("feature_names".to_string(), self.feature_names.join(",")),
            ("threshold".to_string(), self.threshold.to_string()),
            ("model_type".to_string(), self.model_type.clone()),
            ("target".to_string(), self.target.clone()),
        ]
    }
}

/// Largest gap between the decoded graph and the fitted pipeline on the training rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub max_abs_diff: f64,
}

/// Files produced by one training run
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
    pub model_file: String,
    pub metadata_file: String,
    pub metadata: TrainingMetadata,
    pub verification: Verification,
}

/// Artifact file names for a basename and instant
pub fn artifact_names(basename: &str, at: DateTime<Utc>) -> (String, String) {
    let stamp = at.format("%Y%m%d%H%M%S");
    (
        format!("{}_{}.onnx", basename, stamp),
        format!("{}_{}.metadata.json", basename, stamp),
    )
}

/// Writes model artifacts into a directory
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    models_dir: PathBuf,
    exporter: ONNXExporter,
    /// Relative tolerance for the decoded-graph check
    tolerance: f64,
}

impl ArtifactBuilder {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            exporter: ONNXExporter::with_config(ONNXConfig {
                description: "Minutes until soil humidity drops below the watering threshold"
                    .to_string(),
                ..Default::default()
            }),
            tolerance: 1e-3,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// First stamp at or after `at` whose file names are both free
    fn free_names(&self, basename: &str, at: DateTime<Utc>) -> (String, String) {
        let mut at = at;
        loop {
            let (model, meta) = artifact_names(basename, at);
            if !self.models_dir.join(&model).exists() && !self.models_dir.join(&meta).exists() {
                return (model, meta);
            }
            at += Duration::seconds(1);
        }
    }

    /// Export `pipeline`, verify the encoded graph on `x` and write both files.
    pub fn write(
        &self,
        pipeline: &FittedPipeline,
        metadata: TrainingMetadata,
        x: &Array2<f64>,
    ) -> Result<ModelArtifact> {
        fs::create_dir_all(&self.models_dir)?;

        let bytes = self
            .exporter
            .export_bytes(pipeline, &metadata.onnx_properties())?;

        let verification = self.verify(&bytes, pipeline, x)?;

        let basename = metadata.variant().artifact_basename();
        let (model_file, metadata_file) =
            self.free_names(basename, metadata.training_timestamp_utc);
        let model_path = self.models_dir.join(&model_file);
        let metadata_path = self.models_dir.join(&metadata_file);

        let mut file = BufWriter::new(File::create(&model_path)?);
        file.write_all(&bytes)?;
        file.flush()?;

        let mut writer = BufWriter::new(File::create(&metadata_path)?);
        serde_json::to_writer_pretty(&mut writer, &metadata)?;
        writer.flush()?;

        info!(
            model = %model_file,
            metadata = %metadata_file,
            bytes = bytes.len(),
            "Wrote model artifact"
        );

        Ok(ModelArtifact {
            model_path,
            metadata_path,
            model_file,
            metadata_file,
            metadata,
            verification,
        })
    }

    fn verify(&self, bytes: &[u8], pipeline: &FittedPipeline, x: &Array2<f64>) -> Result<Verification> {
        let decoded = OnnxModel::from_bytes(bytes)?.predict(x)?;
        let expected = pipeline.predict(x)?;

        let mut max_abs_diff = 0.0f64;
        for (row, (a, b)) in decoded.iter().zip(expected.iter()).enumerate() {
            let diff = (a - b).abs();
            max_abs_diff = max_abs_diff.max(diff);
            if diff > self.tolerance * b.abs().max(1.0) {
                return Err(DrytimeError::Export(format!(
                    "exported graph predicts {:.3} for row {} where the pipeline predicts {:.3}",
                    a, row, b
                )));
            }
        }
        debug!(max_abs_diff, rows = x.nrows(), "Exported graph matches pipeline");
        Ok(Verification { max_abs_diff })
    }
}

/// Load a metadata record written by [`ArtifactBuilder`]
pub fn read_metadata(path: impl AsRef<Path>) -> Result<TrainingMetadata> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
