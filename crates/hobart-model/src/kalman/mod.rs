//! Kalman filter/smoother engine.
//!
//! Two interchangeable forward-pass formulations implement the
//! [`FilterFormulation`] strategy:
//!
//! - [`JointFilter`] runs the textbook multivariate update, restricting the
//!   observation equation to the non-missing series at each step;
//! - [`UnivariateFilter`] processes the non-missing series one scalar update
//!   at a time (Koopman-Durbin sequential treatment), which avoids inverting
//!   a per-step innovation covariance and degrades gracefully when most of
//!   the panel is missing. It reads only the diagonal of Ση.
//!
//! Both produce the same posterior up to floating-point tolerance on panels
//! where Ση is diagonal. The shared backward pass ([`smooth`]) adds smoothed
//! moments and the lag-one cross-covariances the EM M-step needs.
//!
//! Missing entries are `f64::NAN`; a step with no observed series is a pure
//! prediction.

mod joint;
mod univariate;

pub use joint::JointFilter;
pub use univariate::UnivariateFilter;

use crate::state_space::StateSpace;
use hobart_math::{CholeskyFactor, MathError, symmetrize_inplace};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ln(2π), the per-observation constant in the Gaussian log-density.
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Errors raised by the filter/smoother engine.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Panel width disagrees with the model's series count.
    #[error("panel has {actual} series but the model expects {expected}")]
    PanelWidth {
        /// Series count implied by Λ.
        expected: usize,
        /// Series count of the panel.
        actual: usize,
    },

    /// A covariance restricted to the observed series was not invertible.
    #[error("singular innovation or predicted covariance at time step {t}")]
    Singular {
        /// Time index (0-based) at which the recursion failed.
        t: usize,
    },
}

impl FilterError {
    pub(crate) fn from_math(err: MathError, t: usize) -> Self {
        let _ = err;
        Self::Singular { t }
    }
}

/// Forward-pass formulation choice, selectable per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMethod {
    /// Multivariate update over the observed subset at each step.
    Joint,
    /// Sequential scalar updates, one per observed series.
    Univariate,
}

/// A forward-pass strategy: given Θ and a panel, produce predicted and
/// filtered moments plus the observed-data log-likelihood.
pub trait FilterFormulation {
    /// Run the forward recursion over the full panel.
    fn forward(&self, panel: ArrayView2<'_, f64>, model: &StateSpace)
    -> Result<FilterPass, FilterError>;
}

/// Output of a forward pass. Row `t` of the mean arrays holds a\[t|t-1\]
/// (predicted) and a\[t|t\] (filtered); the covariance vectors are indexed
/// the same way.
#[derive(Debug, Clone)]
pub struct FilterPass {
    /// Predicted state means a\[t|t-1\] (n × k).
    pub predicted_means: Array2<f64>,
    /// Predicted state covariances P\[t|t-1\].
    pub predicted_covs: Vec<Array2<f64>>,
    /// Filtered state means a\[t|t\] (n × k).
    pub filtered_means: Array2<f64>,
    /// Filtered state covariances P\[t|t\].
    pub filtered_covs: Vec<Array2<f64>>,
    /// Total Gaussian log-likelihood over non-missing observations.
    pub log_likelihood: f64,
}

/// Output of the backward pass.
///
/// `lag_one[t]` holds P\[t,t-1|n\], the smoothed cross-covariance between
/// the states at `t` and `t-1`; for `t = 0` the partner is the initial
/// state, whose smoothed moments are reported separately.
#[derive(Debug, Clone)]
pub struct SmoothedMoments {
    /// Smoothed state means a\[t|n\] (n × k).
    pub means: Array2<f64>,
    /// Smoothed state covariances P\[t|n\].
    pub covs: Vec<Array2<f64>>,
    /// Smoothed lag-one cross-covariances P\[t,t-1|n\].
    pub lag_one: Vec<Array2<f64>>,
    /// Smoothed initial state mean a\[0|n\].
    pub initial_mean: Array1<f64>,
    /// Smoothed initial state covariance P\[0|n\].
    pub initial_cov: Array2<f64>,
}

impl FilterMethod {
    /// The strategy implementing this formulation.
    pub fn formulation(self) -> &'static dyn FilterFormulation {
        match self {
            Self::Joint => &JointFilter,
            Self::Univariate => &UnivariateFilter,
        }
    }
}

/// Run the selected forward pass followed by the shared backward pass.
pub fn filter_smooth(
    method: FilterMethod,
    panel: ArrayView2<'_, f64>,
    model: &StateSpace,
) -> Result<(FilterPass, SmoothedMoments), FilterError> {
    let pass = method.formulation().forward(panel, model)?;
    let smoothed = smooth(model, &pass)?;
    Ok((pass, smoothed))
}

/// Indices of the non-missing series in one panel row.
pub(crate) fn observed_indices(row: ndarray::ArrayView1<'_, f64>) -> Vec<usize> {
    row.iter()
        .enumerate()
        .filter_map(|(i, v)| (!v.is_nan()).then_some(i))
        .collect()
}

/// Shared prediction step: a\[t|t-1\] = A a, P\[t|t-1\] = A P Aᵀ + Σu.
pub(crate) fn predict(
    model: &StateSpace,
    mean: &Array1<f64>,
    cov: &Array2<f64>,
) -> (Array1<f64>, Array2<f64>) {
    let a = &model.transition;
    let mut pred_cov = a.dot(cov).dot(&a.t()) + &model.state_noise;
    symmetrize_inplace(&mut pred_cov);
    (a.dot(mean), pred_cov)
}

/// Fixed-interval (RTS) backward pass.
///
/// Uses the filtered and predicted moments from the forward pass; the gain
/// J\[t\] = P\[t|t\] Aᵀ P\[t+1|t\]⁻¹ also yields the lag-one
/// cross-covariance P\[t+1,t|n\] = P\[t+1|n\] J\[t\]ᵀ.
pub fn smooth(model: &StateSpace, pass: &FilterPass) -> Result<SmoothedMoments, FilterError> {
    let n = pass.filtered_means.nrows();
    let k = model.state_dim();

    let mut means = Array2::<f64>::zeros((n, k));
    let mut covs = vec![Array2::<f64>::zeros((k, k)); n];
    let mut lag_one = vec![Array2::<f64>::zeros((k, k)); n];

    if n == 0 {
        return Ok(SmoothedMoments {
            means,
            covs,
            lag_one,
            initial_mean: model.initial_mean.clone(),
            initial_cov: model.initial_cov.clone(),
        });
    }

    means
        .row_mut(n - 1)
        .assign(&pass.filtered_means.row(n - 1));
    covs[n - 1] = pass.filtered_covs[n - 1].clone();

    for t in (0..n - 1).rev() {
        let gain = smoother_gain(model, &pass.filtered_covs[t], &pass.predicted_covs[t + 1], t)?;

        let innovation = &means.row(t + 1).to_owned() - &pass.predicted_means.row(t + 1);
        let mean = &pass.filtered_means.row(t).to_owned() + &gain.dot(&innovation);
        means.row_mut(t).assign(&mean);

        let cov_gap = &covs[t + 1] - &pass.predicted_covs[t + 1];
        let mut cov = &pass.filtered_covs[t] + &gain.dot(&cov_gap).dot(&gain.t());
        symmetrize_inplace(&mut cov);
        covs[t] = cov;

        lag_one[t + 1] = covs[t + 1].dot(&gain.t());
    }

    // One more step back onto the initial state so the M-step can treat
    // t = 0 like every other transition.
    let gain = smoother_gain(model, &model.initial_cov, &pass.predicted_covs[0], 0)?;
    let innovation = &means.row(0).to_owned() - &pass.predicted_means.row(0);
    let initial_mean = &model.initial_mean + &gain.dot(&innovation);
    let cov_gap = &covs[0] - &pass.predicted_covs[0];
    let mut initial_cov = &model.initial_cov + &gain.dot(&cov_gap).dot(&gain.t());
    symmetrize_inplace(&mut initial_cov);
    lag_one[0] = covs[0].dot(&gain.t());

    Ok(SmoothedMoments {
        means,
        covs,
        lag_one,
        initial_mean,
        initial_cov,
    })
}

/// J = P_f Aᵀ P_pred⁻¹, computed by solving against the SPD predicted
/// covariance rather than forming its inverse.
fn smoother_gain(
    model: &StateSpace,
    filtered_cov: &Array2<f64>,
    predicted_cov: &Array2<f64>,
    t: usize,
) -> Result<Array2<f64>, FilterError> {
    let factor =
        CholeskyFactor::decompose(predicted_cov).map_err(|e| FilterError::from_math(e, t))?;
    // Solve P_pred X = A P_f, then J = Xᵀ (P_f symmetric).
    let rhs = model.transition.dot(filtered_cov);
    let x = factor
        .solve_mat(&rhs)
        .map_err(|e| FilterError::from_math(e, t))?;
    Ok(x.t().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_space::ErrorModel;
    use approx::assert_abs_diff_eq;
    use hobart_math::eigh;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_model() -> StateSpace {
        StateSpace {
            transition: array![[0.8]],
            loadings: array![[1.0], [0.5]],
            state_noise: array![[0.5]],
            obs_noise: Array2::eye(2) * 0.2,
            initial_mean: Array1::zeros(1),
            initial_cov: array![[1.0]],
            n_factors: 1,
            error_model: ErrorModel::Independent,
        }
    }

    #[test]
    fn test_joint_and_univariate_agree_complete_panel() {
        let model = small_model();
        let mut rng = StdRng::seed_from_u64(11);
        let (panel, _) = model.simulate(60, &mut rng);

        let joint = JointFilter.forward(panel.view(), &model).unwrap();
        let uni = UnivariateFilter.forward(panel.view(), &model).unwrap();

        assert_abs_diff_eq!(
            joint.log_likelihood,
            uni.log_likelihood,
            epsilon = 1e-8 * joint.log_likelihood.abs()
        );
        for t in 0..60 {
            assert_abs_diff_eq!(
                joint.filtered_means[[t, 0]],
                uni.filtered_means[[t, 0]],
                epsilon = 1e-8
            );
            assert_abs_diff_eq!(
                joint.filtered_covs[t][[0, 0]],
                uni.filtered_covs[t][[0, 0]],
                epsilon = 1e-8
            );
        }
    }

    #[test]
    fn test_joint_and_univariate_agree_with_missing() {
        let model = small_model();
        let mut rng = StdRng::seed_from_u64(5);
        let (mut panel, _) = model.simulate(40, &mut rng);
        panel[[3, 0]] = f64::NAN;
        panel[[3, 1]] = f64::NAN;
        panel[[10, 1]] = f64::NAN;
        panel[[25, 0]] = f64::NAN;

        let joint = JointFilter.forward(panel.view(), &model).unwrap();
        let uni = UnivariateFilter.forward(panel.view(), &model).unwrap();
        for t in 0..40 {
            assert_abs_diff_eq!(
                joint.filtered_means[[t, 0]],
                uni.filtered_means[[t, 0]],
                epsilon = 1e-8
            );
        }
        assert_abs_diff_eq!(joint.log_likelihood, uni.log_likelihood, epsilon = 1e-6);
    }

    #[test]
    fn test_all_missing_step_is_pure_prediction() {
        let model = small_model();
        let panel = Array2::<f64>::from_elem((5, 2), f64::NAN);
        let pass = JointFilter.forward(panel.view(), &model).unwrap();
        for t in 0..5 {
            assert_abs_diff_eq!(
                pass.filtered_means[[t, 0]],
                pass.predicted_means[[t, 0]],
                epsilon = 0.0
            );
            assert_abs_diff_eq!(
                pass.filtered_covs[t][[0, 0]],
                pass.predicted_covs[t][[0, 0]],
                epsilon = 0.0
            );
        }
        assert_abs_diff_eq!(pass.log_likelihood, 0.0, epsilon = 0.0);
    }

    #[test]
    fn test_smoothing_never_inflates_uncertainty() {
        let model = small_model();
        let mut rng = StdRng::seed_from_u64(3);
        let (panel, _) = model.simulate(80, &mut rng);
        let (pass, smoothed) = filter_smooth(FilterMethod::Joint, panel.view(), &model).unwrap();
        for t in 0..80 {
            let gap = &pass.filtered_covs[t] - &smoothed.covs[t];
            let pairs = eigh(&gap).unwrap();
            for &v in pairs.values.iter() {
                assert!(v >= -1e-10, "smoothed cov exceeds filtered at t={t}: {v}");
            }
        }
    }

    #[test]
    fn test_panel_width_mismatch_rejected() {
        let model = small_model();
        let panel = Array2::<f64>::zeros((4, 3));
        assert!(matches!(
            JointFilter.forward(panel.view(), &model),
            Err(FilterError::PanelWidth { expected: 2, actual: 3 })
        ));
    }
}
