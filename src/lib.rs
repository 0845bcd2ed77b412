//! drytime - minutes-until-dry model training for irrigation sensors
//!
//! This crate turns raw soil/air sensor time series into a regressor that
//! predicts how many minutes remain until soil humidity falls below the
//! watering threshold, and exports it as an ONNX artifact with metadata.
//!
//! # Modules
//!
//! ## Training Pipeline
//! - [`data`] - Payload normalization and cleaning
//! - [`features`] - Target derivation and feature engineering
//! - [`training`] - Scaling, ridge and random forest, time-series grid search
//! - [`export`] - ONNX encoding, reference evaluator, artifact files
//! - [`pipeline`] - The stages wired end to end
//!
//! ## Services
//! - [`client`] - Sensor API fetch
//! - [`storage`] - Artifact upload to object storage
//! - [`service`] - One fetch/train/upload cycle
//! - [`scheduler`] - Cron-style periodic runs
//! - [`server`] - Health endpoint
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;
pub mod config;

// Training pipeline
pub mod data;
pub mod features;
pub mod training;
pub mod export;
pub mod pipeline;

// Services
pub mod client;
pub mod storage;
pub mod service;
pub mod scheduler;
pub mod server;
pub mod cli;

pub use error::{DrytimeError, Result};
pub use pipeline::{NoDataReason, PipelineOutcome, TrainingPipeline, TrainingResult};

/// Prelude for convenient imports
pub mod prelude {
    // Error handling
    pub use crate::error::{DrytimeError, Result};

    // Configuration
    pub use crate::config::{AppConfig, CleaningConfig, ModelVariant, PipelineConfig, SearchConfig};

    // Pipeline stages
    pub use crate::data::{clean, normalize_samples, parse_threshold, SensorSample};
    pub use crate::features::{build_features, derive_targets, FeatureSet, FEATURE_NAMES};
    pub use crate::training::{FittedPipeline, GridSearch, Hyperparameters, Regressor};
    pub use crate::export::{ArtifactBuilder, OnnxModel, TrainingMetadata};
    pub use crate::pipeline::{
        NoDataReason, PipelineOutcome, Preparation, TrainingPipeline, TrainingResult,
    };

    // Services
    pub use crate::service::Service;
}
