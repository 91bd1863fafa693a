//! Warm-started regularization-path search over loading penalties.
//!
//! The ascending strength grid is folded left to right: each strength runs
//! sparse EM warm-started from the previous strength's converged Θ, scores
//! the fit with BIC (degrees of freedom = non-zero loading entries), and
//! the incumbent best is replaced only on strict improvement, so ties keep
//! the smallest strength. The path stops early, without recording the
//! offending strength, when a factor's loadings vanish on every
//! unprotected row (saturation) or when the M-step turns degenerate;
//! both are expected terminations, not failures of the search.

use crate::em::{self, EmConfig, EmError, EmRun};
use crate::state_space::StateSpace;
use ndarray::{Array2, ArrayView2, s};
use thiserror::Error;

/// Errors raised by the path search.
#[derive(Debug, Error)]
pub enum PathError {
    /// The strength grid is empty, non-positive, or not ascending.
    #[error("invalid strength grid: {0}")]
    InvalidGrid(&'static str),

    /// More protected rows than series.
    #[error("protected row count {protected} exceeds series count {series}")]
    ProtectedRows {
        /// Requested protected-row count q.
        protected: usize,
        /// Series count p.
        series: usize,
    },

    /// The very first strength saturated or degenerated; nothing was
    /// evaluated.
    #[error("no strength on the grid produced a usable fit")]
    NoViableStrength,

    /// A non-degenerate EM failure (filter singularity, shape error).
    #[error(transparent)]
    Em(#[from] EmError),
}

/// Path-search configuration.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Ascending, positive regularization strengths.
    pub alphas: Vec<f64>,
    /// Number of leading series whose loadings are never penalized.
    pub protected_rows: usize,
    /// EM settings reused at every strength; its `penalties` field is
    /// overwritten per strength.
    pub em: EmConfig,
}

/// Summary of one evaluated strength.
#[derive(Debug, Clone)]
pub struct PathStep {
    /// Regularization strength α.
    pub alpha: f64,
    /// BIC of the converged fit at this strength.
    pub bic: f64,
    /// EM iterations spent at this strength.
    pub iterations: usize,
    /// Whether EM converged within its cap.
    pub converged: bool,
    /// Non-zero entries in the factor-loadings block.
    pub nonzero_loadings: usize,
}

/// Outcome of the path search.
#[derive(Debug, Clone)]
pub struct PathResult {
    /// The strengths actually evaluated, in grid order (possibly truncated
    /// by the early stop).
    pub steps: Vec<PathStep>,
    /// Index into `steps` of the selected strength.
    pub best_index: usize,
    /// The EM run (Θ, trace, smoothed moments) at the selected strength.
    pub best: EmRun,
    /// Whether the path stopped before exhausting the grid.
    pub stopped_early: bool,
}

impl PathResult {
    /// The selected strength.
    pub fn best_alpha(&self) -> f64 {
        self.steps[self.best_index].alpha
    }
}

/// Sweep the strength grid, warm-starting each run from the previous
/// converged Θ (the first from `initial`).
pub fn search_path(
    panel: ArrayView2<'_, f64>,
    initial: &StateSpace,
    config: &PathConfig,
) -> Result<PathResult, PathError> {
    validate_grid(&config.alphas)?;
    let p = initial.n_series();
    let r = initial.n_factors;
    if config.protected_rows > p {
        return Err(PathError::ProtectedRows {
            protected: config.protected_rows,
            series: p,
        });
    }

    let mut warm = initial.clone();
    let mut steps: Vec<PathStep> = Vec::with_capacity(config.alphas.len());
    let mut best: Option<(usize, f64, EmRun)> = None;
    let mut stopped_early = false;

    for &alpha in &config.alphas {
        let mut penalties = Array2::<f64>::from_elem((p, r), alpha);
        penalties
            .slice_mut(s![..config.protected_rows, ..])
            .fill(0.0);
        let em_config = EmConfig {
            penalties: Some(penalties),
            ..config.em.clone()
        };

        let run = match em::estimate(panel, &warm, &em_config) {
            Ok(run) => run,
            // Further regularization only amplifies the instability.
            Err(EmError::DegenerateEstimate(_)) => {
                stopped_early = true;
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if factor_collapsed(&run.model, config.protected_rows) {
            stopped_early = true;
            break;
        }

        let bic = bic_score(panel, &run);
        steps.push(PathStep {
            alpha,
            bic,
            iterations: run.iterations,
            converged: run.converged,
            nonzero_loadings: nonzero_count(&run.model),
        });
        warm = run.model.clone();

        let improves = best.as_ref().is_none_or(|(_, incumbent, _)| bic < *incumbent);
        if improves {
            best = Some((steps.len() - 1, bic, run));
        }
    }

    let (best_index, _, best) = best.ok_or(PathError::NoViableStrength)?;
    Ok(PathResult {
        steps,
        best_index,
        best,
        stopped_early,
    })
}

fn validate_grid(alphas: &[f64]) -> Result<(), PathError> {
    if alphas.is_empty() {
        return Err(PathError::InvalidGrid("grid is empty"));
    }
    if alphas.iter().any(|&a| !(a > 0.0)) {
        return Err(PathError::InvalidGrid("strengths must be positive"));
    }
    if alphas.windows(2).any(|w| w[1] <= w[0]) {
        return Err(PathError::InvalidGrid("strengths must be strictly ascending"));
    }
    Ok(())
}

/// A factor has saturated when its loadings are zero on every unprotected
/// row; beyond that point more regularization only destroys factors.
fn factor_collapsed(model: &StateSpace, protected_rows: usize) -> bool {
    let loadings = model.factor_loadings();
    let p = loadings.nrows();
    if protected_rows >= p {
        return false;
    }
    (0..loadings.ncols()).any(|j| {
        (protected_rows..p).all(|i| loadings[[i, j]] == 0.0)
    })
}

fn nonzero_count(model: &StateSpace) -> usize {
    model.factor_loadings().iter().filter(|&&v| v != 0.0).count()
}

/// BIC over the observed entries: m·ln(RSS/m) + df·ln(m) with
/// df = non-zero loading entries, residuals taken against the smoothed
/// factor estimates.
fn bic_score(panel: ArrayView2<'_, f64>, run: &EmRun) -> f64 {
    let r = run.model.n_factors;
    let loadings = run.model.factor_loadings();
    let factors = run.smoothed.means.slice(s![.., ..r]);

    let mut rss = 0.0;
    let mut observed = 0usize;
    for t in 0..panel.nrows() {
        let f_t = factors.row(t);
        for i in 0..panel.ncols() {
            let x = panel[[t, i]];
            if x.is_nan() {
                continue;
            }
            let e = x - loadings.row(i).dot(&f_t);
            rss += e * e;
            observed += 1;
        }
    }

    let m = observed as f64;
    let df = nonzero_count(&run.model) as f64;
    m * (rss.max(1e-12) / m).ln() + df * m.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize::initialize;
    use crate::state_space::ErrorModel;
    use ndarray::{Array1, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Two factors with disjoint loading blocks: series 0-2 load on the
    /// first factor only, series 3-5 on the second.
    fn sparse_truth() -> StateSpace {
        StateSpace {
            transition: array![[0.6, 0.0], [0.0, 0.6]],
            loadings: array![
                [1.0, 0.0],
                [0.8, 0.0],
                [0.9, 0.0],
                [0.0, 1.0],
                [0.0, 0.8],
                [0.0, 0.9]
            ],
            state_noise: Array2::eye(2),
            obs_noise: Array2::eye(6) * 0.2,
            initial_mean: Array1::zeros(2),
            initial_cov: Array2::eye(2) * 1.5,
            n_factors: 2,
            error_model: ErrorModel::Independent,
        }
    }

    fn path_config(alphas: Vec<f64>, protected_rows: usize) -> PathConfig {
        PathConfig {
            alphas,
            protected_rows,
            em: EmConfig {
                max_iter: 50,
                threshold: 1e-4,
                ..EmConfig::default()
            },
        }
    }

    #[test]
    fn test_best_bic_is_minimal_and_protected_rows_survive() {
        let truth = sparse_truth();
        let mut rng = StdRng::seed_from_u64(17);
        let (panel, _) = truth.simulate(250, &mut rng);
        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();

        let config = path_config(vec![0.01, 0.05, 0.2, 1.0, 4.0], 2);
        let result = search_path(panel.view(), &init.model, &config).unwrap();

        let best_bic = result.steps[result.best_index].bic;
        for step in &result.steps {
            assert!(best_bic <= step.bic);
        }
        // Protected rows keep at least one non-zero loading per row.
        let loadings = result.best.model.factor_loadings().to_owned();
        for i in 0..2 {
            assert!(loadings.row(i).iter().any(|&v| v != 0.0));
        }
    }

    #[test]
    fn test_sparsity_is_monotone_along_path() {
        let truth = sparse_truth();
        let mut rng = StdRng::seed_from_u64(23);
        let (panel, _) = truth.simulate(250, &mut rng);
        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();

        let config = path_config(vec![0.05, 0.2, 0.8, 3.0], 0);
        let result = search_path(panel.view(), &init.model, &config).unwrap();
        for w in result.steps.windows(2) {
            assert!(
                w[1].nonzero_loadings <= w[0].nonzero_loadings,
                "zero count shrank along the path: {} then {}",
                w[0].nonzero_loadings,
                w[1].nonzero_loadings
            );
        }
    }

    #[test]
    fn test_huge_strengths_trigger_early_stop() {
        let truth = sparse_truth();
        let mut rng = StdRng::seed_from_u64(29);
        let (panel, _) = truth.simulate(200, &mut rng);
        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();

        let config = path_config(vec![0.01, 1e4, 1e5], 0);
        let result = search_path(panel.view(), &init.model, &config).unwrap();
        assert!(result.stopped_early);
        assert!(result.steps.len() < 3);
    }

    #[test]
    fn test_grid_validation() {
        let truth = sparse_truth();
        let mut rng = StdRng::seed_from_u64(31);
        let (panel, _) = truth.simulate(100, &mut rng);
        let init = initialize(panel.view(), 2, ErrorModel::Independent).unwrap();

        for bad in [vec![], vec![-1.0, 1.0], vec![1.0, 0.5]] {
            let config = path_config(bad, 0);
            assert!(matches!(
                search_path(panel.view(), &init.model, &config),
                Err(PathError::InvalidGrid(_))
            ));
        }
    }
}
