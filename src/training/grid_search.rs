//! Hyperparameter grid search under time-series cross-validation

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cross_validation::{CVResults, TimeSeriesSplit};
use super::metrics::{r2_score, rmse};
use super::{FittedPipeline, Hyperparameters, Regressor, StandardScaler};
use crate::config::{ModelVariant, SearchConfig};
use crate::error::{DrytimeError, Result};

/// Cross-validation outcome of one grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub params: Hyperparameters,
    /// Fold scores are negative RMSE
    pub cv: CVResults,
}

impl CandidateResult {
    /// Mean validation RMSE (positive)
    pub fn mean_rmse(&self) -> f64 {
        -self.cv.mean_score
    }
}

/// Everything the trainer learned about one run
#[derive(Debug, Clone)]
pub struct FitReport {
    /// Best candidate refit on all rows
    pub pipeline: FittedPipeline,
    pub best_params: Hyperparameters,
    /// Mean validation RMSE of the best candidate
    pub rmse_cv: f64,
    /// R² of the refit pipeline on its own training rows
    pub r2_insample: f64,
    pub n_splits: usize,
    /// All candidates in grid order
    pub cv_results: Vec<CandidateResult>,
    pub n_training_rows: usize,
}

/// Exhaustive search over a hyperparameter grid
#[derive(Debug, Clone)]
pub struct GridSearch {
    candidates: Vec<Hyperparameters>,
    splitter: TimeSeriesSplit,
    random_state: u64,
}

impl GridSearch {
    pub fn new(candidates: Vec<Hyperparameters>, splitter: TimeSeriesSplit) -> Self {
        Self {
            candidates,
            splitter,
            random_state: 42,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Grid for the configured variant.
    ///
    /// Forest candidates vary `n_estimators` fastest within each `max_depth`.
    pub fn from_config(variant: ModelVariant, search: &SearchConfig) -> Self {
        let candidates = match variant {
            ModelVariant::Ridge => search
                .ridge_alphas
                .iter()
                .map(|&alpha| Hyperparameters::Ridge { alpha })
                .collect(),
            ModelVariant::RandomForest => search
                .forest_max_depths
                .iter()
                .flat_map(|&max_depth| {
                    search
                        .forest_n_estimators
                        .iter()
                        .map(move |&n_estimators| Hyperparameters::Forest {
                            n_estimators,
                            max_depth,
                        })
                })
                .collect(),
        };
        Self::new(candidates, TimeSeriesSplit::new(search.n_splits))
            .with_random_state(search.random_state)
    }

    pub fn candidates(&self) -> &[Hyperparameters] {
        &self.candidates
    }

    /// Score every candidate on every fold, pick the best and refit it on all rows.
    ///
    /// # Errors
    ///
    /// Returns `DrytimeError::Fit` on non-finite inputs, too few rows for the
    /// splitter, an empty grid, or any estimator failure.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<FitReport> {
        if x.nrows() != y.len() {
            return Err(DrytimeError::Shape {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(DrytimeError::Fit("training data contains non-finite values".to_string()));
        }
        if self.candidates.is_empty() {
            return Err(DrytimeError::Fit("hyperparameter grid is empty".to_string()));
        }

        let splits = self.splitter.split(x.nrows())?;
        let n_folds = splits.len();

        // candidate-major order; rayon's collect preserves it
        let jobs: Vec<(usize, usize)> = (0..self.candidates.len())
            .flat_map(|c| (0..n_folds).map(move |f| (c, f)))
            .collect();
        let fold_rmse: Vec<f64> = jobs
            .par_iter()
            .map(|&(c, f)| {
                let split = &splits[f];
                self.score_fold(
                    &self.candidates[c],
                    &x.select(Axis(0), &split.train_indices),
                    &y.select(Axis(0), &split.train_indices),
                    &x.select(Axis(0), &split.test_indices),
                    &y.select(Axis(0), &split.test_indices),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let cv_results: Vec<CandidateResult> = self
            .candidates
            .iter()
            .zip(fold_rmse.chunks(n_folds))
            .map(|(params, chunk)| CandidateResult {
                params: *params,
                cv: CVResults::from_scores(chunk.iter().map(|r| -r).collect()),
            })
            .collect();

        let mut best = 0;
        for (idx, candidate) in cv_results.iter().enumerate() {
            debug!(
                params = ?candidate.params,
                mean_rmse = candidate.mean_rmse(),
                std = candidate.cv.std_score,
                "Scored candidate"
            );
            if !candidate.cv.mean_score.is_finite() {
                return Err(DrytimeError::Fit(format!(
                    "candidate {:?} produced a non-finite score",
                    candidate.params
                )));
            }
            if candidate.cv.mean_score > cv_results[best].cv.mean_score {
                best = idx;
            }
        }

        let best_params = cv_results[best].params;
        let rmse_cv = cv_results[best].mean_rmse();

        let pipeline = FittedPipeline::fit(best_params.build(self.random_state), x, y)?;
        let r2_insample = r2_score(y, &pipeline.predict(x)?);

        info!(
            params = ?best_params,
            rmse_cv,
            r2_insample,
            candidates = cv_results.len(),
            folds = n_folds,
            rows = x.nrows(),
            "Grid search complete"
        );

        Ok(FitReport {
            pipeline,
            best_params,
            rmse_cv,
            r2_insample,
            n_splits: n_folds,
            cv_results,
            n_training_rows: x.nrows(),
        })
    }

    fn score_fold(
        &self,
        params: &Hyperparameters,
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        x_test: &Array2<f64>,
        y_test: &Array1<f64>,
    ) -> Result<f64> {
        let mut scaler = StandardScaler::new();
        let x_train = scaler.fit_transform(x_train)?;
        let x_test = scaler.transform(x_test)?;

        let mut estimator = params.build(self.random_state);
        estimator.fit(&x_train, y_train)?;
        Ok(rmse(y_test, &estimator.predict(&x_test)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => i as f64,
            1 => ((i * 7) % 5) as f64,
            _ => 1.0,
        });
        let y = x.column(0).mapv(|v| 3.0 * v + 2.0);
        (x, y)
    }

    #[test]
    fn test_ridge_grid_prefers_small_alpha_on_linear_data() {
        let (x, y) = linear_data(30);
        let search = GridSearch::new(
            vec![
                Hyperparameters::Ridge { alpha: 1000.0 },
                Hyperparameters::Ridge { alpha: 1e-4 },
            ],
            TimeSeriesSplit::new(3),
        );
        let report = search.fit(&x, &y).unwrap();
        assert_eq!(report.best_params, Hyperparameters::Ridge { alpha: 1e-4 });
        assert_eq!(report.cv_results.len(), 2);
        assert!(report.rmse_cv < 0.1);
        assert!(report.r2_insample > 0.999);
        assert_eq!(report.n_splits, 3);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let (x, y) = linear_data(20);
        let search = GridSearch::new(
            vec![
                Hyperparameters::Ridge { alpha: 0.5 },
                Hyperparameters::Ridge { alpha: 0.5 },
            ],
            TimeSeriesSplit::new(2),
        );
        let report = search.fit(&x, &y).unwrap();
        assert_eq!(report.cv_results[0].cv, report.cv_results[1].cv);
        assert_eq!(report.best_params, Hyperparameters::Ridge { alpha: 0.5 });
    }

    #[test]
    fn test_forest_grid_order() {
        let search = GridSearch::from_config(ModelVariant::RandomForest, &SearchConfig::default());
        let grid = search.candidates();
        assert_eq!(grid.len(), 12);
        assert_eq!(
            grid[0],
            Hyperparameters::Forest {
                n_estimators: 50,
                max_depth: None
            }
        );
        assert_eq!(
            grid[1],
            Hyperparameters::Forest {
                n_estimators: 100,
                max_depth: None
            }
        );
        assert_eq!(
            grid[3],
            Hyperparameters::Forest {
                n_estimators: 50,
                max_depth: Some(5)
            }
        );
    }

    #[test]
    fn test_forest_search_runs() {
        let (x, y) = linear_data(24);
        let search = GridSearch::new(
            vec![
                Hyperparameters::Forest {
                    n_estimators: 5,
                    max_depth: Some(2),
                },
                Hyperparameters::Forest {
                    n_estimators: 5,
                    max_depth: None,
                },
            ],
            TimeSeriesSplit::new(3),
        );
        let report = search.fit(&x, &y).unwrap();
        assert!(report.rmse_cv.is_finite() && report.rmse_cv > 0.0);
        assert!(report.r2_insample > 0.5);
    }

    #[test]
    fn test_rejects_non_finite_and_short_inputs() {
        let search = GridSearch::from_config(ModelVariant::Ridge, &SearchConfig::default());
        let (mut x, y) = linear_data(30);
        x[[3, 1]] = f64::NAN;
        assert!(matches!(search.fit(&x, &y), Err(DrytimeError::Fit(_))));

        let (x, y) = linear_data(5);
        assert!(matches!(search.fit(&x, &y), Err(DrytimeError::Fit(_))));
    }
}
