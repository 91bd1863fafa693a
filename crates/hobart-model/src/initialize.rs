//! Principal-component initialization of the state space.
//!
//! Seeds Θ from a balanced (missing-filled) copy of the panel: the top-r
//! eigenpairs of the cross-product give initial factors and loadings, an
//! OLS VAR(1) on the extracted factors gives the factor transition block,
//! and (under autocorrelated errors) a per-series AR(1) on the
//! factor-explained residuals gives the idiosyncratic block. The initial
//! state covariance is the stationary covariance implied by the fitted
//! transition, falling back to a diffuse identity prior when that solve is
//! numerically unstable.

use crate::state_space::{ErrorModel, OBS_NOISE_FLOOR, StateSpace};
use hobart_math::{MathError, eigh, solve_spd, stationary_covariance, symmetrize};
use ndarray::{Array1, Array2, ArrayView2, s};
use thiserror::Error;

/// Variance of the diffuse identity prior used when the implied stationary
/// covariance does not exist or is numerically unstable. Affects only the
/// early-sample filtering transient on a standardized panel.
pub const DIFFUSE_PRIOR_VARIANCE: f64 = 10.0;

/// AR(1) coefficients are clamped inside the unit circle so the augmented
/// transition stays stationary.
const MAX_AR_COEFF: f64 = 0.99;

/// Errors raised during initialization.
#[derive(Debug, Error)]
pub enum InitError {
    /// The panel is too short for the requested decomposition or AR fit.
    #[error("panel has {rows} rows but initialization needs at least {required}")]
    InsufficientRows {
        /// Rows required.
        required: usize,
        /// Rows available.
        rows: usize,
    },

    /// Requested more factors than the panel can support.
    #[error("requested {requested} factors from a panel with {limit} usable dimensions")]
    TooManyFactors {
        /// Requested factor count.
        requested: usize,
        /// min(rows, series).
        limit: usize,
    },

    /// A series has no observed entries at all.
    #[error("series {series} has no observed entries")]
    EmptySeries {
        /// Column index of the empty series.
        series: usize,
    },

    /// A dense kernel failed (rank-deficient cross-product, etc.).
    #[error("linear algebra failure during initialization: {0}")]
    Math(#[from] MathError),
}

/// Initialization output: the seeded model plus the PCA diagnostics that
/// produced it.
#[derive(Debug, Clone)]
pub struct Initialization {
    /// Seeded state-space parameter set.
    pub model: StateSpace,
    /// Principal-component factor estimates (n × r).
    pub factors: Array2<f64>,
    /// Principal-component loadings (p × r).
    pub pc_loadings: Array2<f64>,
    /// All eigenvalues of the panel cross-product, descending.
    pub eigenvalues: Array1<f64>,
}

impl Initialization {
    /// Fraction of total panel variance explained by each retained factor.
    pub fn explained_variance(&self) -> Array1<f64> {
        let total: f64 = self.eigenvalues.iter().sum();
        let r = self.model.n_factors;
        if total <= 0.0 {
            return Array1::zeros(r);
        }
        self.eigenvalues.slice(s![..r]).mapv(|v| v / total)
    }
}

/// Build the initial Θ, a0, and P0 from the panel.
///
/// `panel` is n × p with `NaN` marking missing entries; it is balanced once
/// (missing entries replaced by the series mean over observed rows) and the
/// balanced copy drives every fit below.
pub fn initialize(
    panel: ArrayView2<'_, f64>,
    n_factors: usize,
    error_model: ErrorModel,
) -> Result<Initialization, InitError> {
    let (n, p) = panel.dim();
    let required = 3;
    if n < required {
        return Err(InitError::InsufficientRows { required, rows: n });
    }
    if n_factors == 0 || n_factors > p || n_factors + 1 >= n {
        return Err(InitError::TooManyFactors {
            requested: n_factors,
            limit: p.min(n.saturating_sub(2)),
        });
    }

    let balanced = balance(panel)?;

    // Cross-product eigendecomposition: S = Xᵀ X / n, loadings are the
    // top-r eigenvectors, factors their projections.
    let cross = symmetrize(&(balanced.t().dot(&balanced) / n as f64));
    let pairs = eigh(&cross)?;
    let pc_loadings = pairs.vectors.slice(s![.., ..n_factors]).to_owned();
    let factors = balanced.dot(&pc_loadings);

    let (factor_transition, factor_noise) = fit_var1(&factors)?;

    let residuals = &balanced - &factors.dot(&pc_loadings.t());
    let model = match error_model {
        ErrorModel::Independent => {
            let mut obs_noise = Array2::<f64>::zeros((p, p));
            for i in 0..p {
                let col = residuals.column(i);
                let var = col.iter().map(|&e| e * e).sum::<f64>() / n as f64;
                obs_noise[[i, i]] = var.max(OBS_NOISE_FLOOR);
            }
            assemble(
                factor_transition,
                pc_loadings.clone(),
                factor_noise,
                obs_noise,
                n_factors,
                ErrorModel::Independent,
            )
        }
        ErrorModel::AutoCorrelated => {
            let k = n_factors + p;
            let mut transition = Array2::<f64>::zeros((k, k));
            transition
                .slice_mut(s![..n_factors, ..n_factors])
                .assign(&factor_transition);
            let mut state_noise = Array2::<f64>::zeros((k, k));
            state_noise
                .slice_mut(s![..n_factors, ..n_factors])
                .assign(&factor_noise);

            for i in 0..p {
                let (phi, var) = fit_ar1(residuals.column(i));
                transition[[n_factors + i, n_factors + i]] = phi;
                state_noise[[n_factors + i, n_factors + i]] = var.max(OBS_NOISE_FLOOR);
            }

            let mut loadings = Array2::<f64>::zeros((p, k));
            loadings
                .slice_mut(s![.., ..n_factors])
                .assign(&pc_loadings);
            for i in 0..p {
                loadings[[i, n_factors + i]] = 1.0;
            }

            let obs_noise = Array2::<f64>::eye(p) * OBS_NOISE_FLOOR;
            assemble(
                transition,
                loadings,
                state_noise,
                obs_noise,
                n_factors,
                ErrorModel::AutoCorrelated,
            )
        }
    };

    Ok(Initialization {
        model,
        factors,
        pc_loadings,
        eigenvalues: pairs.values,
    })
}

/// Replace missing entries by the series mean over observed rows.
fn balance(panel: ArrayView2<'_, f64>) -> Result<Array2<f64>, InitError> {
    let (n, p) = panel.dim();
    let mut balanced = panel.to_owned();
    for j in 0..p {
        let observed: Vec<f64> = panel
            .column(j)
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if observed.is_empty() {
            return Err(InitError::EmptySeries { series: j });
        }
        let mean = observed.iter().sum::<f64>() / observed.len() as f64;
        for t in 0..n {
            if balanced[[t, j]].is_nan() {
                balanced[[t, j]] = mean;
            }
        }
    }
    Ok(balanced)
}

/// OLS VAR(1) on the extracted factors: A = (F₁ᵀF₀)(F₀ᵀF₀)⁻¹ with the
/// innovation covariance from the fit residuals.
fn fit_var1(factors: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), MathError> {
    let n = factors.nrows();
    let current = factors.slice(s![1.., ..]);
    let lagged = factors.slice(s![..n - 1, ..]);

    let gram = symmetrize(&lagged.t().dot(&lagged));
    let cross = current.t().dot(&lagged); // r × r
    // A = cross · gram⁻¹, via gram Xᵀ = crossᵀ.
    let transition = solve_spd(&gram, &cross.t().to_owned())?.t().to_owned();

    let fitted = lagged.dot(&transition.t());
    let resid = &current - &fitted;
    let noise = symmetrize(&(resid.t().dot(&resid) / (n - 1) as f64));
    Ok((transition, noise))
}

/// OLS AR(1) on a single residual series; the coefficient is clamped inside
/// the unit circle.
fn fit_ar1(series: ndarray::ArrayView1<'_, f64>) -> (f64, f64) {
    let n = series.len();
    let mut num = 0.0;
    let mut den = 0.0;
    for t in 1..n {
        num += series[t] * series[t - 1];
        den += series[t - 1] * series[t - 1];
    }
    let phi = if den > 0.0 {
        (num / den).clamp(-MAX_AR_COEFF, MAX_AR_COEFF)
    } else {
        0.0
    };
    let mut sse = 0.0;
    for t in 1..n {
        let e = series[t] - phi * series[t - 1];
        sse += e * e;
    }
    (phi, sse / (n - 1) as f64)
}

/// Attach the initial state distribution and package the model.
fn assemble(
    transition: Array2<f64>,
    loadings: Array2<f64>,
    state_noise: Array2<f64>,
    obs_noise: Array2<f64>,
    n_factors: usize,
    error_model: ErrorModel,
) -> StateSpace {
    let k = transition.nrows();
    let initial_cov = stationary_covariance(&transition, &state_noise)
        .unwrap_or_else(|_| Array2::<f64>::eye(k) * DIFFUSE_PRIOR_VARIANCE);
    StateSpace {
        transition,
        loadings,
        state_noise,
        obs_noise,
        initial_mean: Array1::zeros(k),
        initial_cov,
        n_factors,
        error_model,
    }
}
