//! Estimation configuration.
//!
//! [`DfmConfig`] gathers everything the orchestrator needs to drive the
//! core: factor count, estimation method, error model, filter formulation,
//! EM convergence settings, and (for the sparse path) the protected-row
//! count and the regularization-strength grid.

use hobart_model::{ErrorModel, FilterMethod};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The model needs at least one factor.
    #[error("n_factors must be positive")]
    ZeroFactors,

    /// Convergence threshold must be a positive real.
    #[error("invalid convergence threshold: {0}")]
    InvalidThreshold(f64),

    /// Iteration cap must be positive.
    #[error("max_iter must be positive")]
    ZeroMaxIter,

    /// Strength grid bounds are unusable.
    #[error("invalid alpha grid: {0}")]
    InvalidAlphaGrid(&'static str),
}

/// Which estimator to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMethod {
    /// Principal-component initialization only.
    Pca,
    /// Initialization plus a single filter/smoother pass.
    TwoStep,
    /// Initialization plus EM to convergence.
    Em,
    /// Initialization plus the sparse EM regularization path.
    SparseEm,
}

/// Logarithmically-spaced regularization-strength grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlphaGrid {
    /// Smallest strength (> 0).
    pub min: f64,
    /// Largest strength (> min).
    pub max: f64,
    /// Number of grid points.
    pub count: usize,
}

impl Default for AlphaGrid {
    fn default() -> Self {
        Self {
            min: 1e-2,
            max: 10.0,
            count: 20,
        }
    }
}

/// Full estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DfmConfig {
    /// Number of latent factors r.
    pub n_factors: usize,
    /// Estimator to run.
    pub method: FitMethod,
    /// Idiosyncratic-error model.
    pub error_model: ErrorModel,
    /// Filter formulation used by every filter/smoother invocation.
    pub formulation: FilterMethod,
    /// EM convergence threshold on the log-likelihood gain.
    pub threshold: f64,
    /// EM iteration cap.
    pub max_iter: usize,
    /// Leading series whose loadings the sparse path never penalizes.
    pub protected_rows: usize,
    /// Strength grid for the sparse path.
    pub alpha_grid: AlphaGrid,
}

impl DfmConfig {
    /// Default configuration for `n_factors` factors (EM, independent
    /// errors, joint filter, threshold 1e-4, 100 iterations).
    pub fn new(n_factors: usize) -> Self {
        Self {
            n_factors,
            method: FitMethod::Em,
            error_model: ErrorModel::Independent,
            formulation: FilterMethod::Joint,
            threshold: 1e-4,
            max_iter: 100,
            protected_rows: 0,
            alpha_grid: AlphaGrid::default(),
        }
    }

    /// Replace the estimation method.
    pub fn with_method(mut self, method: FitMethod) -> Self {
        self.method = method;
        self
    }

    /// Replace the error model.
    pub fn with_error_model(mut self, error_model: ErrorModel) -> Self {
        self.error_model = error_model;
        self
    }

    /// Replace the filter formulation.
    pub fn with_formulation(mut self, formulation: FilterMethod) -> Self {
        self.formulation = formulation;
        self
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_factors == 0 {
            return Err(ConfigError::ZeroFactors);
        }
        if !(self.threshold > 0.0) || !self.threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.max_iter == 0 {
            return Err(ConfigError::ZeroMaxIter);
        }
        if self.method == FitMethod::SparseEm {
            let grid = &self.alpha_grid;
            if !(grid.min > 0.0) {
                return Err(ConfigError::InvalidAlphaGrid("min must be positive"));
            }
            if grid.max <= grid.min {
                return Err(ConfigError::InvalidAlphaGrid("max must exceed min"));
            }
            if grid.count == 0 {
                return Err(ConfigError::InvalidAlphaGrid("count must be positive"));
            }
        }
        Ok(())
    }
}
