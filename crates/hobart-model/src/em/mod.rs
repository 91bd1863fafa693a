//! Expectation-Maximization estimation of the state-space parameters.
//!
//! Each iteration runs the filter/smoother engine as the E-step, then
//! re-estimates every parameter block in closed form from the smoothed
//! second moments (M-step). With a penalty matrix supplied, the loadings
//! rows carrying positive penalties are re-estimated by L1 coordinate
//! descent instead of plain least squares. Iteration stops when the
//! log-likelihood gain falls below the threshold (converged) or the
//! iteration cap is hit (not converged, which is reported, not an error).

pub mod mstep;
pub mod sparse;

use crate::kalman::{FilterError, FilterMethod, SmoothedMoments, filter_smooth};
use crate::state_space::StateSpace;
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Errors raised by an EM run.
#[derive(Debug, Error)]
pub enum EmError {
    /// The E-step's filter/smoother failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// An M-step update produced a covariance that is not positive
    /// semi-definite (or an unidentifiable loadings row).
    #[error("degenerate M-step estimate: {0}")]
    DegenerateEstimate(String),

    /// The penalty matrix does not match the factor-loadings block.
    #[error("penalty matrix is {actual:?} but the factor loadings are {expected:?}")]
    PenaltyShape {
        /// Expected (p, r).
        expected: (usize, usize),
        /// Supplied shape.
        actual: (usize, usize),
    },
}

/// EM configuration.
#[derive(Debug, Clone)]
pub struct EmConfig {
    /// Iteration cap; reaching it is reported via the convergence flag.
    pub max_iter: usize,
    /// Convergence threshold on the (relative or absolute) log-likelihood
    /// gain between successive iterations.
    pub threshold: f64,
    /// Forward-pass formulation used by the E-step.
    pub formulation: FilterMethod,
    /// Per-entry L1 penalties on the factor-loadings block (p × r); `None`
    /// runs the closed-form unpenalized update everywhere. Rows that are
    /// entirely zero are estimated by plain least squares.
    pub penalties: Option<Array2<f64>>,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            threshold: 1e-4,
            formulation: FilterMethod::Joint,
            penalties: None,
        }
    }
}

/// Record of one EM run.
#[derive(Debug, Clone)]
pub struct EmRun {
    /// Final parameter set (including the updated initial state).
    pub model: StateSpace,
    /// Log-likelihood per iteration, in iteration order.
    pub log_likelihood: Vec<f64>,
    /// Whether the threshold was met before the cap.
    pub converged: bool,
    /// Number of E-steps performed.
    pub iterations: usize,
    /// Smoothed moments from the final E-step.
    pub smoothed: SmoothedMoments,
}

/// Run EM from `initial` until convergence or the iteration cap.
///
/// The engine underneath is invoked fresh each iteration; nothing is
/// carried between iterations except the parameter snapshot itself.
pub fn estimate(
    panel: ArrayView2<'_, f64>,
    initial: &StateSpace,
    config: &EmConfig,
) -> Result<EmRun, EmError> {
    if let Some(pen) = &config.penalties {
        let expected = (initial.n_series(), initial.n_factors);
        if pen.dim() != expected {
            return Err(EmError::PenaltyShape {
                expected,
                actual: pen.dim(),
            });
        }
    }

    let mut model = initial.clone();
    let mut trace: Vec<f64> = Vec::new();
    let mut converged = false;

    let (mut pass, mut smoothed) = filter_smooth(config.formulation, panel, &model)?;
    trace.push(pass.log_likelihood);

    // A diagonal-only filter must see a diagonal Ση, so the M-step is
    // restricted to match.
    let diagonal_obs_noise = config.formulation == FilterMethod::Univariate;

    for _ in 1..=config.max_iter {
        model = mstep::update(
            panel,
            &smoothed,
            &model,
            config.penalties.as_ref(),
            diagonal_obs_noise,
        )?;
        (pass, smoothed) = filter_smooth(config.formulation, panel, &model)?;

        let prev = *trace.last().unwrap_or(&f64::NEG_INFINITY);
        let current = pass.log_likelihood;
        trace.push(current);

        let gain = current - prev;
        let scale = (0.5 * (current.abs() + prev.abs())).max(1e-12);
        if gain.abs() < config.threshold || (gain / scale).abs() < config.threshold {
            converged = true;
            break;
        }
    }

    let iterations = trace.len();
    Ok(EmRun {
        model,
        log_likelihood: trace,
        converged,
        iterations,
        smoothed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize::initialize;
    use crate::state_space::ErrorModel;
    use ndarray::{Array1, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn simulated_model() -> StateSpace {
        StateSpace {
            transition: array![[0.7, 0.1], [0.0, 0.5]],
            loadings: array![
                [0.9, 0.0],
                [0.7, 0.3],
                [0.1, 0.8],
                [-0.4, 0.6],
                [0.5, -0.5]
            ],
            state_noise: Array2::eye(2),
            obs_noise: Array2::eye(5) * 0.3,
            initial_mean: Array1::zeros(2),
            initial_cov: Array2::eye(2) * 2.0,
            n_factors: 2,
            error_model: ErrorModel::Independent,
        }
    }

    #[test]
    fn test_log_likelihood_is_monotone() {
        let truth = simulated_model();
        let mut rng = StdRng::seed_from_u64(42);
        let (panel, _) = truth.simulate(120, &mut rng);

        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();
        let config = EmConfig {
            max_iter: 25,
            threshold: 1e-10, // force the full iteration budget
            ..EmConfig::default()
        };
        let run = estimate(panel.view(), &init.model, &config).unwrap();

        for w in run.log_likelihood.windows(2) {
            assert!(
                w[1] >= w[0] - 1e-6,
                "log-likelihood decreased: {} -> {}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn test_univariate_formulation_is_monotone_with_independent_errors() {
        let truth = simulated_model();
        let mut rng = StdRng::seed_from_u64(77);
        let (panel, _) = truth.simulate(120, &mut rng);

        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();
        let config = EmConfig {
            max_iter: 25,
            threshold: 1e-10,
            formulation: FilterMethod::Univariate,
            ..EmConfig::default()
        };
        let run = estimate(panel.view(), &init.model, &config).unwrap();

        // The M-step keeps Ση diagonal, the only shape the sequential
        // filter evaluates exactly, so ascent must hold here too.
        for w in run.log_likelihood.windows(2) {
            assert!(
                w[1] >= w[0] - 1e-6,
                "log-likelihood decreased: {} -> {}",
                w[0],
                w[1]
            );
        }
        let p = run.model.n_series();
        for i in 0..p {
            for j in 0..p {
                if i != j {
                    assert_eq!(run.model.obs_noise[[i, j]], 0.0);
                }
            }
        }
    }

    #[test]
    fn test_converges_and_improves() {
        let truth = simulated_model();
        let mut rng = StdRng::seed_from_u64(9);
        let (panel, _) = truth.simulate(200, &mut rng);

        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();
        let config = EmConfig::default();
        let run = estimate(panel.view(), &init.model, &config).unwrap();

        assert!(run.converged, "EM did not converge within the cap");
        assert!(run.iterations < 100);
        let first = run.log_likelihood[0];
        let last = *run.log_likelihood.last().unwrap();
        assert!(last > first, "no improvement: {first} -> {last}");
    }

    #[test]
    fn test_penalty_shape_is_checked() {
        let truth = simulated_model();
        let mut rng = StdRng::seed_from_u64(1);
        let (panel, _) = truth.simulate(60, &mut rng);
        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();
        let config = EmConfig {
            penalties: Some(Array2::zeros((3, 2))),
            ..EmConfig::default()
        };
        assert!(matches!(
            estimate(panel.view(), &init.model, &config),
            Err(EmError::PenaltyShape { .. })
        ));
    }

    #[test]
    fn test_cap_reported_as_not_converged() {
        let truth = simulated_model();
        let mut rng = StdRng::seed_from_u64(2);
        let (panel, _) = truth.simulate(80, &mut rng);
        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();
        let config = EmConfig {
            max_iter: 2,
            threshold: 1e-12,
            ..EmConfig::default()
        };
        let run = estimate(panel.view(), &init.model, &config).unwrap();
        assert!(!run.converged);
        assert_eq!(run.iterations, 3); // initial evaluation + two updates
    }
}
