//! Top-level estimation entry point.
//!
//! Validates the configuration, standardizes the panel, seeds the state
//! space from principal components, dispatches to the selected estimator,
//! and assembles the result bundle. Everything numerical happens in the
//! core crates; this layer only wires them together and maps outputs back
//! to the original data scale.

use crate::config::{ConfigError, DfmConfig, FitMethod};
use crate::grid::log_space;
use crate::standardize::{StandardizeError, Standardizer};
use hobart_model::em::{self, EmConfig, EmError};
use hobart_model::kalman::{FilterError, SmoothedMoments, filter_smooth};
use hobart_model::path::{PathConfig, PathError, PathStep, search_path};
use hobart_model::state_space::{ModelError, StateSpace};
use hobart_model::{InitError, initialize};
use ndarray::{Array2, ArrayView2, s};
use thiserror::Error;

/// Errors surfaced by [`fit`].
#[derive(Debug, Error)]
pub enum DfmError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standardization failed.
    #[error(transparent)]
    Standardize(#[from] StandardizeError),

    /// Initialization failed.
    #[error(transparent)]
    Init(#[from] InitError),

    /// The seeded model is malformed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The filter/smoother engine failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// EM estimation failed.
    #[error(transparent)]
    Em(#[from] EmError),

    /// The sparse path search failed.
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Summary of a sparse-path run retained in the result bundle.
#[derive(Debug, Clone)]
pub struct PathSummary {
    /// Per-strength records for the evaluated (possibly truncated) grid.
    pub steps: Vec<PathStep>,
    /// Index of the selected strength within `steps`.
    pub best_index: usize,
    /// Selected strength.
    pub best_alpha: f64,
    /// Whether the path stopped before exhausting the grid.
    pub stopped_early: bool,
}

/// Result bundle from [`fit`].
#[derive(Debug, Clone)]
pub struct DfmFit {
    /// Fitted state space on the standardized scale.
    pub model: StateSpace,
    /// The fitted standardization transform.
    pub standardizer: Standardizer,
    /// Factor estimates (n × r): smoothed means, or PCA projections under
    /// [`FitMethod::Pca`].
    pub factors: Array2<f64>,
    /// Smoothed moments for every time point (absent under
    /// [`FitMethod::Pca`]).
    pub smoothed: Option<SmoothedMoments>,
    /// Log-likelihood trace, one entry per EM iteration (a single entry
    /// for [`FitMethod::TwoStep`]).
    pub log_likelihood: Vec<f64>,
    /// Whether the estimator converged (vacuously true outside EM).
    pub converged: bool,
    /// EM iterations performed.
    pub iterations: usize,
    /// Sparse-path summary when [`FitMethod::SparseEm`] ran.
    pub path: Option<PathSummary>,
}

impl DfmFit {
    /// Factor loadings mapped back to the original data scale (p × r).
    pub fn loadings(&self) -> Array2<f64> {
        self.standardizer
            .rescale_loadings(self.model.factor_loadings())
    }

    /// Model-implied values Λ·F̂ on the original scale (n × p); useful as
    /// imputations for the missing entries.
    pub fn fitted_values(&self) -> Array2<f64> {
        let standardized = self
            .factors
            .dot(&self.model.factor_loadings().t());
        self.standardizer.inverse_transform(standardized.view())
    }
}

/// Estimate a dynamic factor model from the raw panel (NaN = missing).
pub fn fit(panel: ArrayView2<'_, f64>, config: &DfmConfig) -> Result<DfmFit, DfmError> {
    config.validate()?;

    let standardizer = Standardizer::fit(panel)?;
    let standardized = standardizer.transform(panel);

    let init = initialize(
        standardized.view(),
        config.n_factors,
        config.error_model,
    )?;
    init.model.validate()?;

    let r = config.n_factors;
    match config.method {
        FitMethod::Pca => Ok(DfmFit {
            factors: init.factors.clone(),
            model: init.model,
            standardizer,
            smoothed: None,
            log_likelihood: Vec::new(),
            converged: true,
            iterations: 0,
            path: None,
        }),
        FitMethod::TwoStep => {
            let (pass, smoothed) =
                filter_smooth(config.formulation, standardized.view(), &init.model)?;
            Ok(DfmFit {
                factors: smoothed.means.slice(s![.., ..r]).to_owned(),
                model: init.model,
                standardizer,
                smoothed: Some(smoothed),
                log_likelihood: vec![pass.log_likelihood],
                converged: true,
                iterations: 1,
                path: None,
            })
        }
        FitMethod::Em => {
            let run = em::estimate(standardized.view(), &init.model, &em_config(config))?;
            Ok(DfmFit {
                factors: run.smoothed.means.slice(s![.., ..r]).to_owned(),
                model: run.model,
                standardizer,
                smoothed: Some(run.smoothed),
                log_likelihood: run.log_likelihood,
                converged: run.converged,
                iterations: run.iterations,
                path: None,
            })
        }
        FitMethod::SparseEm => {
            let grid = &config.alpha_grid;
            let path_config = PathConfig {
                alphas: log_space(grid.min, grid.max, grid.count),
                protected_rows: config.protected_rows,
                em: em_config(config),
            };
            let result = search_path(standardized.view(), &init.model, &path_config)?;
            let best = result.best;
            Ok(DfmFit {
                factors: best.smoothed.means.slice(s![.., ..r]).to_owned(),
                model: best.model,
                standardizer,
                smoothed: Some(best.smoothed),
                log_likelihood: best.log_likelihood,
                converged: best.converged,
                iterations: best.iterations,
                path: Some(PathSummary {
                    best_alpha: result.steps[result.best_index].alpha,
                    best_index: result.best_index,
                    stopped_early: result.stopped_early,
                    steps: result.steps,
                }),
            })
        }
    }
}

fn em_config(config: &DfmConfig) -> EmConfig {
    EmConfig {
        max_iter: config.max_iter,
        threshold: config.threshold,
        formulation: config.formulation,
        penalties: None,
    }
}
