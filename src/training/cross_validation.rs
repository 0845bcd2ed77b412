//! Time-ordered cross-validation

use serde::{Deserialize, Serialize};

use crate::error::{DrytimeError, Result};

/// A single train/test split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Expanding-window splitter that never validates on the past.
///
/// With `n` samples, `test_size = n / (n_splits + 1)` and the test windows
/// are the last `n_splits * test_size` samples cut into consecutive blocks.
/// Each fold trains on every sample before its test block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesSplit {
    pub n_splits: usize,
}

impl Default for TimeSeriesSplit {
    fn default() -> Self {
        Self { n_splits: 5 }
    }
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    /// Smallest sample count that yields a non-empty test block per fold
    pub fn min_samples(&self) -> usize {
        self.n_splits + 1
    }

    /// Generate train/test splits
    pub fn split(&self, n_samples: usize) -> Result<Vec<CVSplit>> {
        if self.n_splits < 2 {
            return Err(DrytimeError::Fit(format!(
                "n_splits must be at least 2, got {}",
                self.n_splits
            )));
        }
        if n_samples < self.min_samples() {
            return Err(DrytimeError::Fit(format!(
                "cannot make {} time-series folds from {} samples (need at least {})",
                self.n_splits,
                n_samples,
                self.min_samples()
            )));
        }

        let test_size = n_samples / (self.n_splits + 1);
        let first_test = n_samples - self.n_splits * test_size;

        Ok((0..self.n_splits)
            .map(|fold_idx| {
                let test_start = first_test + fold_idx * test_size;
                CVSplit {
                    train_indices: (0..test_start).collect(),
                    test_indices: (test_start..test_start + test_size).collect(),
                    fold_idx,
                }
            })
            .collect())
    }
}

/// Per-fold scores for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVResults {
    /// Scores for each fold
    pub scores: Vec<f64>,
    /// Mean score across folds
    pub mean_score: f64,
    /// Standard deviation of scores
    pub std_score: f64,
    /// Number of folds
    pub n_folds: usize,
}

impl CVResults {
    /// Create CV results from fold scores
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n_folds = scores.len();
        let mean_score = scores.iter().sum::<f64>() / n_folds as f64;
        let variance =
            scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n_folds as f64;

        Self {
            scores,
            mean_score,
            std_score: variance.sqrt(),
            n_folds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let splits = TimeSeriesSplit::new(5).split(12).unwrap();
        assert_eq!(splits.len(), 5);
        assert_eq!(splits[0].train_indices, vec![0, 1]);
        assert_eq!(splits[0].test_indices, vec![2, 3]);
        assert_eq!(splits[4].train_indices.len(), 10);
        assert_eq!(splits[4].test_indices, vec![10, 11]);
    }

    #[test]
    fn test_remainder_goes_to_first_train_window() {
        // n = 14, test_size = 2, first test block starts at 4
        let splits = TimeSeriesSplit::new(5).split(14).unwrap();
        assert_eq!(splits[0].train_indices, (0..4).collect::<Vec<_>>());
        assert_eq!(splits[0].test_indices, vec![4, 5]);
        assert_eq!(splits[4].test_indices, vec![12, 13]);
    }

    #[test]
    fn test_train_always_precedes_test() {
        for split in TimeSeriesSplit::new(3).split(23).unwrap() {
            let last_train = *split.train_indices.last().unwrap();
            assert!(split.test_indices.iter().all(|&t| t > last_train));
        }
    }

    #[test]
    fn test_minimum_sample_count() {
        let splitter = TimeSeriesSplit::new(5);
        assert!(splitter.split(6).is_ok());
        assert!(matches!(splitter.split(5), Err(DrytimeError::Fit(_))));
        assert!(TimeSeriesSplit::new(1).split(100).is_err());
    }

    #[test]
    fn test_cv_results() {
        let results = CVResults::from_scores(vec![-1.0, -3.0]);
        assert_eq!(results.mean_score, -2.0);
        assert_eq!(results.std_score, 1.0);
        assert_eq!(results.n_folds, 2);
    }
}
