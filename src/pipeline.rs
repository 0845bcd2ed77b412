//! End-to-end training pipeline
//!
//! Runs the stages in order: schema normalization, cleaning, target
//! derivation, feature engineering, grid search and artifact writing.
//! Any stage may end the run early with [`PipelineOutcome::NoTrainableData`],
//! which is a normal outcome rather than an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data::{clean, normalize_samples, parse_threshold, CleaningReport};
use crate::error::Result;
use crate::export::{ArtifactBuilder, ModelArtifact, TrainingMetadata};
use crate::features::{build_features, derive_targets, FeatureSet, ThresholdAdjustment};
use crate::training::{FitReport, GridSearch};

/// Why a run produced no model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoDataReason {
    /// Every sample was removed by the cleaner
    EmptyAfterCleaning,
    /// No row has a defined `minutes_to_dry`
    NoTargetAfterDerivation { rows_below_threshold: usize },
}

impl NoDataReason {
    pub fn message(&self) -> &'static str {
        match self {
            NoDataReason::EmptyAfterCleaning => "No valid training samples found after cleaning.",
            NoDataReason::NoTargetAfterDerivation { .. } => {
                "No valid training samples found after threshold filtering."
            }
        }
    }
}

impl fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoDataReason::EmptyAfterCleaning => write!(f, "no rows survived cleaning"),
            NoDataReason::NoTargetAfterDerivation {
                rows_below_threshold,
            } => write!(
                f,
                "no row has a target ({} rows below threshold)",
                rows_below_threshold
            ),
        }
    }
}

/// Feature matrix and target ready for fitting
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub features: FeatureSet,
    /// Threshold after any repair
    pub threshold: f64,
    pub threshold_adjustment: Option<ThresholdAdjustment>,
    pub cleaning: CleaningReport,
}

/// Result of the data stages
#[derive(Debug, Clone)]
pub enum Preparation {
    Ready(PreparedData),
    NoData(NoDataReason),
}

/// A successful run
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub artifact: ModelArtifact,
    pub fit: FitReport,
    pub cleaning: CleaningReport,
    pub threshold: f64,
    pub threshold_adjustment: Option<ThresholdAdjustment>,
}

/// Outcome of one pipeline invocation
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Trained(Box<TrainingRun>),
    NoTrainableData { reason: NoDataReason },
}

impl PipelineOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, PipelineOutcome::Trained(_))
    }

    pub fn run(&self) -> Option<&TrainingRun> {
        match self {
            PipelineOutcome::Trained(run) => Some(run),
            PipelineOutcome::NoTrainableData { .. } => None,
        }
    }
}

/// Caller-facing summary of a run; all optional fields are null when no model was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub message: String,
    pub model_file: Option<String>,
    pub metadata_file: Option<String>,
    pub rmse_cv: Option<f64>,
    pub r2_insample: Option<f64>,
}

impl TrainingResult {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl From<&PipelineOutcome> for TrainingResult {
    fn from(outcome: &PipelineOutcome) -> Self {
        match outcome {
            PipelineOutcome::Trained(run) => Self {
                message: "Model and metadata saved successfully.".to_string(),
                model_file: Some(run.artifact.model_file.clone()),
                metadata_file: Some(run.artifact.metadata_file.clone()),
                rmse_cv: Some(run.fit.rmse_cv),
                r2_insample: Some(run.fit.r2_insample),
            },
            PipelineOutcome::NoTrainableData { reason } => Self {
                message: reason.message().to_string(),
                model_file: None,
                metadata_file: None,
                rmse_cv: None,
                r2_insample: None,
            },
        }
    }
}

/// The training pipeline for one model variant
#[derive(Debug, Clone, Default)]
pub struct TrainingPipeline {
    config: PipelineConfig,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Train on raw sample and threshold payloads, stamping artifacts with the current time.
    ///
    /// # Errors
    ///
    /// Schema errors for malformed payloads, fit errors from the trainer
    /// (including too few labelled rows for the splitter), export and I/O
    /// errors while writing artifacts.
    pub fn run(&self, samples: &Value, threshold: &Value) -> Result<PipelineOutcome> {
        self.run_at(samples, threshold, Utc::now())
    }

    /// Normalize, clean, label and featurize the payloads without training.
    pub fn prepare(&self, samples: &Value, threshold: &Value) -> Result<Preparation> {
        let samples = normalize_samples(samples)?;
        let requested_threshold = parse_threshold(threshold)?;
        info!(
            samples = samples.len(),
            threshold = requested_threshold,
            variant = %self.config.variant,
            "Preparing training data"
        );

        let (cleaned, cleaning) = clean(&samples, &self.config.cleaning);
        if cleaned.is_empty() {
            return Ok(Preparation::NoData(NoDataReason::EmptyAfterCleaning));
        }

        let derivation = derive_targets(
            &cleaned,
            requested_threshold,
            self.config.threshold_fallback_quantile,
        );
        if derivation.rows.is_empty() {
            return Ok(Preparation::NoData(NoDataReason::NoTargetAfterDerivation {
                rows_below_threshold: derivation.rows_below_threshold,
            }));
        }

        let features = build_features(&derivation.rows, derivation.threshold)?;
        Ok(Preparation::Ready(PreparedData {
            features,
            threshold: derivation.threshold,
            threshold_adjustment: derivation.adjustment,
            cleaning,
        }))
    }

    /// Like [`run`](Self::run) with an explicit training instant
    pub fn run_at(
        &self,
        samples: &Value,
        threshold: &Value,
        trained_at: DateTime<Utc>,
    ) -> Result<PipelineOutcome> {
        let start = Instant::now();
        self.config.validate()?;

        let data = match self.prepare(samples, threshold)? {
            Preparation::Ready(data) => data,
            Preparation::NoData(reason) => return Ok(Self::no_data(reason)),
        };

        let features = &data.features;
        let fit = GridSearch::from_config(self.config.variant, &self.config.search)
            .fit(&features.x, &features.y)?;

        let metadata = TrainingMetadata::from_report(
            &fit,
            &features.feature_names,
            data.threshold,
            data.threshold_adjustment,
            trained_at,
        );
        let artifact = ArtifactBuilder::new(&self.config.models_dir).write(
            &fit.pipeline,
            metadata,
            &features.x,
        )?;

        info!(
            model = %artifact.model_file,
            rmse_cv = fit.rmse_cv,
            r2_insample = fit.r2_insample,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Training run complete"
        );

        Ok(PipelineOutcome::Trained(Box::new(TrainingRun {
            artifact,
            fit,
            cleaning: data.cleaning,
            threshold: data.threshold,
            threshold_adjustment: data.threshold_adjustment,
        })))
    }

    fn no_data(reason: NoDataReason) -> PipelineOutcome {
        warn!(%reason, "No trainable data, skipping model training");
        PipelineOutcome::NoTrainableData { reason }
    }
}
