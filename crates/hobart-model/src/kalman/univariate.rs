//! Univariate (per-series) forward pass.
//!
//! Decomposes each step's multivariate update into one scalar update per
//! non-missing series, processed in series order. The posterior after the
//! last scalar update equals the joint posterior when Ση is diagonal, and
//! the per-series innovation variances multiply out to the same Gaussian
//! likelihood. No matrix inversion is required, so the pass is preferred
//! when the cross-section is large or riddled with missing values.

use super::{
    FilterError, FilterFormulation, FilterPass, LN_2PI, observed_indices, predict,
};
use crate::state_space::StateSpace;
use hobart_math::symmetrize_inplace;
use ndarray::{Array2, ArrayView2};

/// Innovation variances at or below this are treated as singular.
const MIN_INNOVATION_VARIANCE: f64 = 1e-12;

/// Sequential scalar update over the observed series.
///
/// Reads only the diagonal of Ση; callers with a non-diagonal observation
/// covariance must use [`super::JointFilter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnivariateFilter;

impl FilterFormulation for UnivariateFilter {
    fn forward(
        &self,
        panel: ArrayView2<'_, f64>,
        model: &StateSpace,
    ) -> Result<FilterPass, FilterError> {
        let (n, p) = panel.dim();
        if p != model.n_series() {
            return Err(FilterError::PanelWidth {
                expected: model.n_series(),
                actual: p,
            });
        }
        let k = model.state_dim();

        let mut pass = FilterPass {
            predicted_means: Array2::zeros((n, k)),
            predicted_covs: Vec::with_capacity(n),
            filtered_means: Array2::zeros((n, k)),
            filtered_covs: Vec::with_capacity(n),
            log_likelihood: 0.0,
        };

        let mut mean = model.initial_mean.clone();
        let mut cov = model.initial_cov.clone();

        for t in 0..n {
            let (pred_mean, pred_cov) = predict(model, &mean, &cov);
            pass.predicted_means.row_mut(t).assign(&pred_mean);
            pass.predicted_covs.push(pred_cov.clone());

            mean = pred_mean;
            cov = pred_cov;
            for i in observed_indices(panel.row(t)) {
                let lambda_i = model.loadings.row(i);
                let cov_lambda = cov.dot(&lambda_i); // P λᵢ
                let innov_var = lambda_i.dot(&cov_lambda) + model.obs_noise[[i, i]];
                if !(innov_var > MIN_INNOVATION_VARIANCE) {
                    return Err(FilterError::Singular { t });
                }

                let innovation = panel[[t, i]] - lambda_i.dot(&mean);
                let scale = 1.0 / innov_var;
                for j in 0..k {
                    mean[j] += cov_lambda[j] * scale * innovation;
                }
                for a in 0..k {
                    for b in 0..k {
                        cov[[a, b]] -= cov_lambda[a] * cov_lambda[b] * scale;
                    }
                }

                pass.log_likelihood -=
                    0.5 * (LN_2PI + innov_var.ln() + innovation * innovation * scale);
            }
            symmetrize_inplace(&mut cov);

            pass.filtered_means.row_mut(t).assign(&mean);
            pass.filtered_covs.push(cov.clone());
        }

        Ok(pass)
    }
}
