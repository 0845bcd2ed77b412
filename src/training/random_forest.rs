//! Random forest regressor

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::decision_tree::DecisionTree;
use super::Regressor;
use crate::error::{DrytimeError, Result};

/// Bootstrap-aggregated regression trees, averaged at prediction time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: Option<usize>,
    /// Bootstrap sampling
    pub bootstrap: bool,
    /// Base seed; tree `i` uses `random_state + i`
    pub random_state: u64,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            bootstrap: true,
            random_state: 42,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fitted trees, in seed order
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();

        if n_samples != y.len() {
            return Err(DrytimeError::Shape {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 || self.n_estimators == 0 {
            return Err(DrytimeError::Fit(format!(
                "cannot fit {} trees on {} rows",
                self.n_estimators, n_samples
            )));
        }

        let base_seed = self.random_state;

        // Build trees in parallel
        let trees: Vec<DecisionTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| -> Result<DecisionTree> {
                let seed = base_seed.wrapping_add(tree_idx as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                let mut tree = DecisionTree::new().with_max_depth(self.max_depth);

                if self.bootstrap {
                    let sample_indices: Vec<usize> =
                        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let x_boot = x.select(Axis(0), &sample_indices);
                    let y_boot = y.select(Axis(0), &sample_indices);
                    tree.fit(&x_boot, &y_boot)?;
                } else {
                    tree.fit(x, y)?;
                }
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(DrytimeError::ModelNotFitted);
        }

        let per_tree = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;

        // accumulate in tree order
        let mut sum = Array1::<f64>::zeros(x.nrows());
        for predictions in &per_tree {
            sum += predictions;
        }
        Ok(sum / self.trees.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y = Array1::from_shape_fn(40, |i| 2.0 * i as f64);
        (x, y)
    }

    #[test]
    fn test_regressor_fits_ramp() {
        let (x, y) = ramp();
        let mut rf = RandomForest::new(20).with_random_state(42);
        rf.fit(&x, &y).unwrap();

        let predictions = rf.predict(&x).unwrap();
        let mse: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 10.0, "MSE too high: {}", mse);
        assert_eq!(rf.trees().len(), 20);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = ramp();
        let mut a = RandomForest::new(10).with_max_depth(Some(3));
        let mut b = RandomForest::new(10).with_max_depth(Some(3));
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_without_bootstrap_matches_single_tree() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let mut rf = RandomForest::new(3).with_bootstrap(false);
        rf.fit(&x, &y).unwrap();
        assert_eq!(rf.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_unfitted_predict() {
        let rf = RandomForest::new(5);
        assert!(matches!(rf.predict(&array![[1.0]]), Err(DrytimeError::ModelNotFitted)));
    }
}
