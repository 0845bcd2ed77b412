//! Target derivation and feature engineering

pub mod engineering;
pub mod target;

pub use engineering::{build_features, feature_row, hour_encoding, FeatureSet, FEATURE_NAMES, N_FEATURES};
pub use target::{derive_targets, label_rows, quantile, LabeledSample, TargetDerivation, ThresholdAdjustment};
