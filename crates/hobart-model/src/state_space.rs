//! State-space representation of the dynamic factor model.
//!
//! Observation: x_t = Λ s_t + η_t,  η_t ~ N(0, Ση)
//! State:       s_t = A s_{t-1} + u_t,  u_t ~ N(0, Σu)
//!
//! Under [`ErrorModel::Independent`] the state holds the r factors only.
//! Under [`ErrorModel::AutoCorrelated`] the state is augmented with the p
//! idiosyncratic errors, Λ carries an identity block on the augmented
//! columns, each error follows its own AR(1) in the transition, and Ση is a
//! small diagonal floor.

use hobart_math::{eigh, is_positive_semidefinite};
use ndarray::{Array1, Array2, s};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Diagonal floor applied to observation-noise variances.
pub const OBS_NOISE_FLOOR: f64 = 1e-4;

/// Tolerance used when checking covariance matrices for positive
/// semi-definiteness.
pub const PSD_TOLERANCE: f64 = 1e-8;

/// Idiosyncratic-error model for the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorModel {
    /// Errors are serially independent; the state holds factors only.
    Independent,
    /// Errors follow per-series AR(1) processes folded into the state.
    AutoCorrelated,
}

/// Errors raised when a parameter set is malformed.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Two parameter blocks disagree on a dimension.
    #[error("shape mismatch in {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Parameter block at fault.
        name: &'static str,
        /// Expected (rows, cols).
        expected: (usize, usize),
        /// Actual (rows, cols).
        actual: (usize, usize),
    },

    /// A covariance matrix is not positive semi-definite.
    #[error("{name} is not positive semi-definite")]
    NotPositiveSemiDefinite {
        /// Covariance block at fault.
        name: &'static str,
    },
}

/// Full parameter set Θ plus the initial state distribution.
#[derive(Debug, Clone)]
pub struct StateSpace {
    /// State transition A (k × k).
    pub transition: Array2<f64>,
    /// Loadings Λ (p × k); includes the identity block on the idiosyncratic
    /// columns under [`ErrorModel::AutoCorrelated`].
    pub loadings: Array2<f64>,
    /// State-noise covariance Σu (k × k).
    pub state_noise: Array2<f64>,
    /// Observation-noise covariance Ση (p × p); diagonal under
    /// [`ErrorModel::AutoCorrelated`].
    pub obs_noise: Array2<f64>,
    /// Initial state mean a0 (k).
    pub initial_mean: Array1<f64>,
    /// Initial state covariance P0 (k × k).
    pub initial_cov: Array2<f64>,
    /// Number of latent factors r (first r state entries).
    pub n_factors: usize,
    /// Idiosyncratic-error model.
    pub error_model: ErrorModel,
}

impl StateSpace {
    /// State dimension k (r, or r + p when errors are autocorrelated).
    pub fn state_dim(&self) -> usize {
        self.transition.nrows()
    }

    /// Number of observed series p.
    pub fn n_series(&self) -> usize {
        self.loadings.nrows()
    }

    /// The factor block of the loadings (p × r view).
    pub fn factor_loadings(&self) -> ndarray::ArrayView2<'_, f64> {
        self.loadings.slice(s![.., ..self.n_factors])
    }

    /// Mutable factor block of the loadings.
    pub fn factor_loadings_mut(&mut self) -> ndarray::ArrayViewMut2<'_, f64> {
        let r = self.n_factors;
        self.loadings.slice_mut(s![.., ..r])
    }

    /// Validate shapes and covariance definiteness.
    ///
    /// Shape violations and non-PSD covariances are numerical failures, not
    /// conditions to tolerate silently.
    pub fn validate(&self) -> Result<(), ModelError> {
        let k = self.state_dim();
        let p = self.n_series();
        let expected_k = match self.error_model {
            ErrorModel::Independent => self.n_factors,
            ErrorModel::AutoCorrelated => self.n_factors + p,
        };
        if k != expected_k {
            return Err(ModelError::ShapeMismatch {
                name: "transition",
                expected: (expected_k, expected_k),
                actual: self.transition.dim(),
            });
        }
        check_shape("transition", &self.transition, (k, k))?;
        check_shape("loadings", &self.loadings, (p, k))?;
        check_shape("state_noise", &self.state_noise, (k, k))?;
        check_shape("obs_noise", &self.obs_noise, (p, p))?;
        check_shape("initial_cov", &self.initial_cov, (k, k))?;
        if self.initial_mean.len() != k {
            return Err(ModelError::ShapeMismatch {
                name: "initial_mean",
                expected: (k, 1),
                actual: (self.initial_mean.len(), 1),
            });
        }

        for (name, cov) in [
            ("state_noise", &self.state_noise),
            ("obs_noise", &self.obs_noise),
            ("initial_cov", &self.initial_cov),
        ] {
            if !is_positive_semidefinite(cov, PSD_TOLERANCE) {
                return Err(ModelError::NotPositiveSemiDefinite { name });
            }
        }
        Ok(())
    }

    /// Simulate `n` observations (and the latent state path) from Θ.
    ///
    /// Returns `(panel, states)` with shapes (n × p) and (n × k). Intended
    /// for fixtures and round-trip checks; sampling uses an eigenvalue
    /// square root so semi-definite covariances are accepted.
    pub fn simulate<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> (Array2<f64>, Array2<f64>) {
        let k = self.state_dim();
        let p = self.n_series();
        let state_root = covariance_root(&self.state_noise);
        let obs_root = covariance_root(&self.obs_noise);
        let init_root = covariance_root(&self.initial_cov);

        let mut state = &self.initial_mean + &draw(&init_root, rng);
        let mut states = Array2::<f64>::zeros((n, k));
        let mut panel = Array2::<f64>::zeros((n, p));
        for t in 0..n {
            state = self.transition.dot(&state) + draw(&state_root, rng);
            states.row_mut(t).assign(&state);
            let obs = self.loadings.dot(&state) + draw(&obs_root, rng);
            panel.row_mut(t).assign(&obs);
        }
        (panel, states)
    }
}

fn check_shape(
    name: &'static str,
    m: &Array2<f64>,
    expected: (usize, usize),
) -> Result<(), ModelError> {
    if m.dim() != expected {
        return Err(ModelError::ShapeMismatch {
            name,
            expected,
            actual: m.dim(),
        });
    }
    Ok(())
}

/// Square root of a PSD covariance via eigendecomposition, with negative
/// round-off eigenvalues clipped to zero.
fn covariance_root(cov: &Array2<f64>) -> Array2<f64> {
    let n = cov.nrows();
    match eigh(cov) {
        Ok(pairs) => {
            let mut root = pairs.vectors;
            for j in 0..n {
                let scale = pairs.values[j].max(0.0).sqrt();
                root.column_mut(j).mapv_inplace(|v| v * scale);
            }
            root
        }
        Err(_) => Array2::zeros((n, n)),
    }
}

fn draw<R: Rng + ?Sized>(root: &Array2<f64>, rng: &mut R) -> Array1<f64> {
    let n = root.nrows();
    let z = Array1::from_iter((0..n).map(|_| StandardNormal.sample(rng)));
    root.dot(&z)
}
