//! Regression tree (CART, squared-error criterion)
//!
//! Feature values are compared in single precision, the precision of the
//! exported `TreeEnsembleRegressor`, and every threshold is an `f32`.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::error::{DrytimeError, Result};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf { value: f64, n_samples: usize },
    /// Internal node; samples with `x[feature_idx] as f32 <= threshold` go left
    Split {
        feature_idx: usize,
        threshold: f32,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

impl TreeNode {
    fn predict_row(&self, row: &ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if row[*feature_idx] as f32 <= *threshold { left } else { right };
                }
            }
        }
    }

    /// Number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Cut between neighbouring values `lo < hi`: their midpoint rounded to `f32`,
/// or `lo` itself when rounding lands on `hi`.
fn split_threshold(lo: f32, hi: f32) -> f32 {
    let mid = ((f64::from(lo) + f64::from(hi)) / 2.0) as f32;
    if mid < hi {
        mid
    } else {
        lo
    }
}

/// Best split found for one node
struct SplitCandidate {
    feature_idx: usize,
    threshold: f32,
    gain: f64,
}

/// Regression tree model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    /// Maximum depth (`None` grows until leaves are pure)
    pub max_depth: Option<usize>,
    n_features: usize,
}

impl DecisionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Root of the fitted tree
    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    /// Get tree depth
    pub fn get_depth(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::depth)
    }

    fn build_tree(&self, x: &Array2<f64>, y: &Array1<f64>, indices: &[usize], depth: usize) -> TreeNode {
        let n_samples = indices.len();
        let (sum, sq_sum) = indices
            .iter()
            .fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]));
        let mean = sum / n_samples as f64;
        let impurity = (sq_sum / n_samples as f64 - mean * mean).max(0.0);

        let should_stop = n_samples < 2
            || self.max_depth.map_or(false, |d| depth >= d)
            || impurity <= f64::EPSILON * mean.abs().max(1.0);

        let best = if should_stop {
            None
        } else {
            self.find_best_split(x, y, indices, impurity)
        };
        let Some(best) = best else {
            return TreeNode::Leaf {
                value: mean,
                n_samples,
            };
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, best.feature_idx]] as f32 <= best.threshold);

        let left = Box::new(self.build_tree(x, y, &left_indices, depth + 1));
        let right = Box::new(self.build_tree(x, y, &right_indices, depth + 1));

        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: best.threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    /// Sort once per feature, then sweep with prefix sums
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let n_f = n as f64;
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f32, f64)> = Vec::with_capacity(n);

        for feature_idx in 0..x.ncols() {
            pairs.clear();
            pairs.extend(indices.iter().map(|&i| (x[[i, feature_idx]] as f32, y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..n {
                let (value, target) = pairs[k - 1];
                left_sum += target;
                left_sq += target * target;

                let next = pairs[k].0;
                if value == next {
                    continue;
                }

                let left_n = k as f64;
                let right_n = (n - k) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / left_n;
                let right_sse = right_sq - right_sum * right_sum / right_n;
                let gain = parent_impurity - (left_sse + right_sse) / n_f;

                if gain > best.as_ref().map_or(0.0, |b| b.gain) {
                    best = Some(SplitCandidate {
                        feature_idx,
                        threshold: split_threshold(value, next),
                        gain,
                    });
                }
            }
        }

        best
    }
}

impl Regressor for DecisionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();

        if n_samples != y.len() {
            return Err(DrytimeError::Shape {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(DrytimeError::Fit("cannot grow a tree on zero rows".to_string()));
        }

        self.n_features = x.ncols();
        let indices: Vec<usize> = (0..n_samples).collect();
        self.root = Some(self.build_tree(x, y, &indices, 0));
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(DrytimeError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(DrytimeError::Shape {
                expected: format!("{} columns", self.n_features),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(x.rows().into_iter().map(|row| root.predict_row(&row)).collect())
    }
}
