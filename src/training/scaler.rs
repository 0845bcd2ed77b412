//! Standard (z-score) feature scaling

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DrytimeError, Result};

/// Column-wise `(x - mean) / std` with population standard deviation.
///
/// Columns with zero variance get a scale of 1, so they pass through centred.
/// The transform runs in `f32` with the offsets and reciprocal scales from
/// [`StandardScaler::single_precision_params`], the arithmetic of an ONNX
/// `Scaler` node, so scaled values are identical in and out of process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit column statistics
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(DrytimeError::Fit("cannot fit scaler on zero rows".to_string()));
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| DrytimeError::Fit("empty feature matrix".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });

        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(self)
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.params()?;
        if x.ncols() != mean.len() {
            return Err(DrytimeError::Shape {
                expected: format!("{} columns", mean.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        let (offset, factor) = self.single_precision_params()?;
        let mut scaled = x.clone();
        for mut row in scaled.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = f64::from((*v as f32 - offset[j]) * factor[j]);
            }
        }
        Ok(scaled)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Fitted column means and scales
    pub fn params(&self) -> Result<(&Array1<f64>, &Array1<f64>)> {
        match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => Ok((mean, scale)),
            _ => Err(DrytimeError::ModelNotFitted),
        }
    }

    /// Offsets and reciprocal scales as `f32`
    pub fn single_precision_params(&self) -> Result<(Vec<f32>, Vec<f32>)> {
        let (mean, scale) = self.params()?;
        let offset = mean.iter().map(|m| *m as f32).collect();
        let factor = scale.iter().map(|s| (1.0 / s) as f32).collect();
        Ok((offset, factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_population_std() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();

        let (mean, scale) = scaler.params().unwrap();
        assert_eq!(mean[0], 2.0);
        assert_eq!(scale[0], 1.0);
        assert_eq!(scaled[[0, 0]], -1.0);
        assert_eq!(scaled[[1, 0]], 1.0);
    }

    #[test]
    fn test_constant_column_scale_one() {
        let x = array![[2.0, 7.0], [4.0, 7.0], [6.0, 7.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();
        assert_eq!(scaler.params().unwrap().1[1], 1.0);
        assert!(scaled.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_transform_rounds_like_single_precision() {
        let x = array![[0.1, 10.0], [0.7, 30.0], [1.3, 50.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();
        let (offset, factor) = scaler.single_precision_params().unwrap();

        for ((i, j), v) in scaled.indexed_iter() {
            let expected = (x[[i, j]] as f32 - offset[j]) * factor[j];
            assert_eq!(*v, f64::from(expected));
            assert_eq!(*v as f32, expected);
        }
    }

    #[test]
    fn test_unfitted_and_shape_errors() {
        let scaler = StandardScaler::new();
        assert!(matches!(
            scaler.transform(&array![[1.0]]),
            Err(DrytimeError::ModelNotFitted)
        ));

        let mut scaler = StandardScaler::new();
        scaler.fit(&array![[1.0, 2.0]]).unwrap();
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }
}
