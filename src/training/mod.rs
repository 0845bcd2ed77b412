//! Model training module
//!
//! Provides the estimators and model selection used to fit the
//! minutes-to-dry regressor:
//! - Standard scaling
//! - Ridge regression
//! - Regression trees and Random Forests
//! - Time-series cross-validation and grid search

pub mod cross_validation;
pub mod decision_tree;
pub mod grid_search;
pub mod linear_models;
pub mod metrics;
pub mod random_forest;
pub mod scaler;

pub use cross_validation::{CVResults, CVSplit, TimeSeriesSplit};
pub use decision_tree::{DecisionTree, TreeNode};
pub use grid_search::{CandidateResult, FitReport, GridSearch};
pub use linear_models::RidgeRegression;
pub use metrics::{r2_score, rmse};
pub use random_forest::RandomForest;
pub use scaler::StandardScaler;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::ModelVariant;
use crate::error::Result;

/// Common interface of the supervised regressors
pub trait Regressor {
    /// Fit the model to training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Make predictions
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;
}

/// One point of the hyperparameter grid.
///
/// Serialized untagged so the fields land flat in the metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hyperparameters {
    Forest {
        n_estimators: usize,
        max_depth: Option<usize>,
    },
    Ridge {
        alpha: f64,
    },
}

impl Hyperparameters {
    pub fn variant(&self) -> ModelVariant {
        match self {
            Hyperparameters::Ridge { .. } => ModelVariant::Ridge,
            Hyperparameters::Forest { .. } => ModelVariant::RandomForest,
        }
    }

    /// Unfitted estimator for this grid point
    pub fn build(&self, random_state: u64) -> Estimator {
        match *self {
            Hyperparameters::Ridge { alpha } => Estimator::Ridge(RidgeRegression::new(alpha)),
            Hyperparameters::Forest {
                n_estimators,
                max_depth,
            } => Estimator::Forest(
                RandomForest::new(n_estimators)
                    .with_max_depth(max_depth)
                    .with_random_state(random_state),
            ),
        }
    }
}

/// The estimator families the trainer can fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    Ridge(RidgeRegression),
    Forest(RandomForest),
}

impl Regressor for Estimator {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        match self {
            Estimator::Ridge(model) => model.fit(x, y),
            Estimator::Forest(model) => model.fit(x, y),
        }
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            Estimator::Ridge(model) => model.predict(x),
            Estimator::Forest(model) => model.predict(x),
        }
    }
}

/// Scaler followed by an estimator, fitted and applied as one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub scaler: StandardScaler,
    pub estimator: Estimator,
}

impl FittedPipeline {
    /// Fit a fresh scaler and the given estimator on `(x, y)`
    pub fn fit(mut estimator: Estimator, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        let mut scaler = StandardScaler::new();
        let x_scaled = scaler.fit_transform(x)?;
        estimator.fit(&x_scaled, y)?;
        Ok(Self { scaler, estimator })
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let x_scaled = self.scaler.transform(x)?;
        self.estimator.predict(&x_scaled)
    }
}
