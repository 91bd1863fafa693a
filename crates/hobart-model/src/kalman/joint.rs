//! Joint (multivariate) forward pass.
//!
//! At each step the observation equation is restricted to the non-missing
//! series: Λ and Ση lose the missing rows/columns, the innovation covariance
//! S = Λₒ P Λₒᵀ + Σηₒ is factored once, and the gain, posterior, and
//! log-likelihood contribution all reuse that factorization.

use super::{
    FilterError, FilterFormulation, FilterPass, LN_2PI, observed_indices, predict,
};
use crate::state_space::StateSpace;
use hobart_math::{CholeskyFactor, symmetrize_inplace};
use ndarray::{Array1, Array2, ArrayView2};

/// Multivariate per-step update over the observed subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct JointFilter;

impl FilterFormulation for JointFilter {
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

            let obs = observed_indices(panel.row(t));
            if obs.is_empty() {
                mean = pred_mean;
                cov = pred_cov.clone();
            } else {
                let m = obs.len();
                // Restrict Λ and Ση to the observed rows/columns.
                let mut lambda_o = Array2::<f64>::zeros((m, k));
                let mut noise_o = Array2::<f64>::zeros((m, m));
                let mut innovation = Array1::<f64>::zeros(m);
                for (a, &i) in obs.iter().enumerate() {
                    lambda_o.row_mut(a).assign(&model.loadings.row(i));
                    for (b, &j) in obs.iter().enumerate() {
                        noise_o[[a, b]] = model.obs_noise[[i, j]];
                    }
                    innovation[a] = panel[[t, i]] - model.loadings.row(i).dot(&pred_mean);
                }

                let cross = lambda_o.dot(&pred_cov); // m × k
                let mut innov_cov = cross.dot(&lambda_o.t()) + &noise_o;
                symmetrize_inplace(&mut innov_cov);
                let factor = CholeskyFactor::decompose(&innov_cov)
                    .map_err(|e| FilterError::from_math(e, t))?;

                let weighted_innov = factor
                    .solve_vec(&innovation)
                    .map_err(|e| FilterError::from_math(e, t))?;
                // K = P Λₒᵀ S⁻¹ = (S⁻¹ Λₒ P)ᵀ.
                let gain = factor
                    .solve_mat(&cross)
                    .map_err(|e| FilterError::from_math(e, t))?
                    .t()
                    .to_owned();

                mean = &pred_mean + &gain.dot(&innovation);
                let mut updated = &pred_cov - &gain.dot(&cross);
                symmetrize_inplace(&mut updated);
                cov = updated;

                pass.log_likelihood -= 0.5
                    * (m as f64 * LN_2PI + factor.log_det() + innovation.dot(&weighted_innov));
            }

            pass.filtered_means.row_mut(t).assign(&mean);
            pass.filtered_covs.push(cov.clone());
            pass.predicted_covs.push(pred_cov);
        }

        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_space::ErrorModel;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Scalar state, scalar observation: hand-checkable recursion.
    #[test]
    fn test_scalar_kalman_step() {
        let model = StateSpace {
            transition: array![[1.0]],
            loadings: array![[1.0]],
            state_noise: array![[0.0]],
            obs_noise: array![[1.0]],
            initial_mean: Array1::zeros(1),
            initial_cov: array![[1.0]],
            n_factors: 1,
            error_model: ErrorModel::Independent,
        };
        let panel = array![[1.0]];
        let pass = JointFilter.forward(panel.view(), &model).unwrap();

        // Predicted: mean 0, var 1. Gain = 1/(1+1) = 0.5.
        assert_abs_diff_eq!(pass.predicted_means[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pass.filtered_means[[0, 0]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(pass.filtered_covs[0][[0, 0]], 0.5, epsilon = 1e-12);

        // loglik = -0.5 (ln 2π + ln 2 + 1²/2).
        let expected = -0.5 * (LN_2PI + 2.0_f64.ln() + 0.5);
        assert_abs_diff_eq!(pass.log_likelihood, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_innovation_reported() {
        // Zero observation noise, zero state noise, zero initial variance:
        // the innovation covariance collapses to zero.
        let model = StateSpace {
            transition: array![[1.0]],
            loadings: array![[1.0]],
            state_noise: array![[0.0]],
            obs_noise: array![[0.0]],
            initial_mean: Array1::zeros(1),
            initial_cov: array![[0.0]],
            n_factors: 1,
            error_model: ErrorModel::Independent,
        };
        let panel = array![[1.0]];
        assert!(matches!(
            JointFilter.forward(panel.view(), &model),
            Err(FilterError::Singular { t: 0 })
        ));
    }
}
