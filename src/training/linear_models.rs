//! Ridge regression

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::error::{DrytimeError, Result};

/// Solve the symmetric positive-definite system `A x = b` by Cholesky factorization.
///
/// Returns `None` if `A` is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Gaussian elimination with partial pivoting, used when Cholesky fails
fn gauss_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            aug[[r1, col]].abs().total_cmp(&aug[[r2, col]].abs())
        })?;
        if aug[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }
        for row in (col + 1)..n {
            let factor = aug[[row, col]] / aug[[col, col]];
            for j in col..=n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| aug[[i, j]] * x[j]).sum();
        x[i] = (aug[[i, n]] - sum) / aug[[i, i]];
    }
    Some(x)
}

/// L2-regularized linear regression with an unpenalized intercept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    /// Fitted coefficients
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept
    pub intercept: Option<f64>,
    /// Regularization strength
    pub alpha: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            coefficients: None,
            intercept: None,
            alpha,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Fitted `(coefficients, intercept)`
    pub fn params(&self) -> Result<(&Array1<f64>, f64)> {
        match (&self.coefficients, self.intercept) {
            (Some(coef), Some(intercept)) => Ok((coef, intercept)),
            _ => Err(DrytimeError::ModelNotFitted),
        }
    }
}

impl Regressor for RidgeRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(DrytimeError::Shape {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(DrytimeError::Fit("cannot fit ridge on zero rows".to_string()));
        }

        // Centre so the intercept stays out of the penalty
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| DrytimeError::Fit("empty feature matrix".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let x_centered = x - &x_mean.view().insert_axis(Axis(0));
        let y_centered = y - y_mean;

        // (X^T X + alpha I) w = X^T y
        let mut xtx = x_centered.t().dot(&x_centered);
        for i in 0..n_features {
            xtx[[i, i]] += self.alpha;
        }
        let xty = x_centered.t().dot(&y_centered);

        let coefficients = cholesky_solve(&xtx, &xty)
            .or_else(|| gauss_solve(&xtx, &xty))
            .ok_or_else(|| {
                DrytimeError::Fit(format!(
                    "ridge normal equations are singular (alpha = {})",
                    self.alpha
                ))
            })?;

        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(DrytimeError::Fit("ridge solution is not finite".to_string()));
        }

        self.intercept = Some(y_mean - coefficients.dot(&x_mean));
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (coefficients, intercept) = self.params()?;
        if x.ncols() != coefficients.len() {
            return Err(DrytimeError::Shape {
                expected: format!("{} columns", coefficients.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(x.dot(coefficients) + intercept)
    }
}
