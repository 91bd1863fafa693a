//! Per-series standardization of the raw panel.
//!
//! Means and standard deviations are computed over the observed entries
//! only; missing entries stay `NaN` through the transform. The fitted
//! moments are retained so loadings and fitted values can be mapped back
//! to the original scale.

use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

/// Errors raised while fitting the standardizer.
#[derive(Debug, Error)]
pub enum StandardizeError {
    /// A series has no observed entries to standardize against.
    #[error("series {series} has no observed entries")]
    EmptySeries {
        /// Column index of the empty series.
        series: usize,
    },

    /// A series is constant over its observed entries.
    #[error("series {series} is constant; cannot scale to unit variance")]
    ConstantSeries {
        /// Column index of the constant series.
        series: usize,
    },
}

/// Per-series location/scale transform fitted on observed entries.
#[derive(Debug, Clone)]
pub struct Standardizer {
    /// Observed-entry mean per series.
    pub means: Array1<f64>,
    /// Observed-entry standard deviation per series.
    pub scales: Array1<f64>,
}

impl Standardizer {
    /// Fit means and scales from the panel (NaN = missing).
    pub fn fit(panel: ArrayView2<'_, f64>) -> Result<Self, StandardizeError> {
        let p = panel.ncols();
        let mut means = Array1::<f64>::zeros(p);
        let mut scales = Array1::<f64>::zeros(p);

        for j in 0..p {
            let observed: Vec<f64> = panel
                .column(j)
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .collect();
            if observed.is_empty() {
                return Err(StandardizeError::EmptySeries { series: j });
            }
            let n = observed.len() as f64;
            let mean = observed.iter().sum::<f64>() / n;
            let var = observed.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
            if var <= 0.0 {
                return Err(StandardizeError::ConstantSeries { series: j });
            }
            means[j] = mean;
            scales[j] = var.sqrt();
        }
        Ok(Self { means, scales })
    }

    /// Standardize a panel, preserving missing markers.
    pub fn transform(&self, panel: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = panel.to_owned();
        for j in 0..out.ncols() {
            let mean = self.means[j];
            let scale = self.scales[j];
            for v in out.column_mut(j).iter_mut() {
                if !v.is_nan() {
                    *v = (*v - mean) / scale;
                }
            }
        }
        out
    }

    /// Map a standardized-scale fitted panel back to the original scale.
    pub fn inverse_transform(&self, fitted: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = fitted.to_owned();
        for j in 0..out.ncols() {
            let mean = self.means[j];
            let scale = self.scales[j];
            for v in out.column_mut(j).iter_mut() {
                *v = *v * scale + mean;
            }
        }
        out
    }

    /// Rescale standardized-scale loadings rows to the original data scale.
    pub fn rescale_loadings(&self, loadings: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = loadings.to_owned();
        for (i, mut row) in out.rows_mut().into_iter().enumerate() {
            let scale = self.scales[i];
            row.mapv_inplace(|v| v * scale);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_transform_centers_and_scales() {
        let panel = array![[1.0, 10.0], [3.0, 30.0], [5.0, 50.0]];
        let standardizer = Standardizer::fit(panel.view()).unwrap();
        let out = standardizer.transform(panel.view());
        for j in 0..2 {
            let mean: f64 = out.column(j).sum() / 3.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            let var: f64 = out.column(j).iter().map(|&v| v * v).sum::<f64>() / 3.0;
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_missing_entries_ignored_and_preserved() {
        let panel = array![[1.0, f64::NAN], [3.0, 30.0], [5.0, 50.0]];
        let standardizer = Standardizer::fit(panel.view()).unwrap();
        let out = standardizer.transform(panel.view());
        assert!(out[[0, 1]].is_nan());
        assert_abs_diff_eq!(standardizer.means[1], 40.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_transform_round_trips() {
        let panel = array![[1.0, 10.0], [3.0, 30.0], [5.0, 55.0]];
        let standardizer = Standardizer::fit(panel.view()).unwrap();
        let out = standardizer.transform(panel.view());
        let back = standardizer.inverse_transform(out.view());
        for t in 0..3 {
            for j in 0..2 {
                assert_abs_diff_eq!(back[[t, j]], panel[[t, j]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_rejects_constant_series() {
        let panel = array![[1.0, 2.0], [1.0, 3.0], [1.0, 4.0]];
        assert!(matches!(
            Standardizer::fit(panel.view()),
            Err(StandardizeError::ConstantSeries { series: 0 })
        ));
    }

    #[test]
    fn test_rejects_empty_series() {
        let panel = array![[f64::NAN, 2.0], [f64::NAN, 3.0]];
        assert!(matches!(
            Standardizer::fit(panel.view()),
            Err(StandardizeError::EmptySeries { series: 0 })
        ));
    }
}
