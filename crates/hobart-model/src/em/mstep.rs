//! Closed-form M-step updates.
//!
//! All updates are weighted least squares in the smoothed second moments
//! E\[s_t s_tᵀ\], E\[s_t s_{t-1}ᵀ\] (means plus smoothed covariances and
//! lag-one cross-covariances). The factor VAR block and, when present, the
//! diagonal idiosyncratic AR block are fit independently; the loadings
//! update is missing-aware, using only the observed rows per series.

use super::{EmError, sparse};
use crate::kalman::SmoothedMoments;
use crate::state_space::{ErrorModel, OBS_NOISE_FLOOR, PSD_TOLERANCE, StateSpace};
use hobart_math::{is_positive_semidefinite, solve_spd, symmetrize, symmetrize_inplace};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use rayon::prelude::*;

/// Variance floor for the idiosyncratic AR innovation estimates.
const MIN_STATE_VARIANCE: f64 = 1e-10;

/// Negative variance / eigenvalue slack attributed to round-off; anything
/// below this is a degenerate estimate, not noise.
const DEGENERACY_TOLERANCE: f64 = 1e-8;

/// One full M-step: re-estimate A, Σu, Λ, Ση, a0, and P0 from the smoothed
/// moments. `penalties` switches the loadings rows with positive entries to
/// L1 coordinate descent. With `diagonal_obs_noise` set, Ση is restricted
/// to its diagonal so the update maximizes the same likelihood a
/// diagonal-only filter evaluates.
pub fn update(
    panel: ArrayView2<'_, f64>,
    smoothed: &SmoothedMoments,
    model: &StateSpace,
    penalties: Option<&Array2<f64>>,
    diagonal_obs_noise: bool,
) -> Result<StateSpace, EmError> {
    let n = panel.nrows();
    let k = model.state_dim();
    let r = model.n_factors;

    // Sufficient statistics over the full sample; the t = 0 transition
    // pairs with the smoothed initial state.
    let mut e_curr = Array2::<f64>::zeros((k, k));
    let mut e_prev = Array2::<f64>::zeros((k, k));
    let mut e_cross = Array2::<f64>::zeros((k, k));
    for t in 0..n {
        let m_t = smoothed.means.row(t);
        let (m_prev, p_prev) = if t == 0 {
            (smoothed.initial_mean.view(), &smoothed.initial_cov)
        } else {
            (smoothed.means.row(t - 1), &smoothed.covs[t - 1])
        };
        e_curr += &smoothed.covs[t];
        add_outer(&mut e_curr, m_t, m_t);
        e_prev += p_prev;
        add_outer(&mut e_prev, m_prev, m_prev);
        e_cross += &smoothed.lag_one[t];
        add_outer(&mut e_cross, m_t, m_prev);
    }

    let (transition, state_noise) =
        update_dynamics(&e_curr, &e_prev, &e_cross, model, n)?;
    let loadings = update_loadings(panel, smoothed, model, penalties)?;
    let obs_noise = update_obs_noise(panel, smoothed, model, &loadings, diagonal_obs_noise)?;

    Ok(StateSpace {
        transition,
        loadings,
        state_noise,
        obs_noise,
        initial_mean: smoothed.initial_mean.clone(),
        initial_cov: smoothed.initial_cov.clone(),
        n_factors: r,
        error_model: model.error_model,
    })
}

/// VAR(1) update for the factor block plus, under autocorrelated errors,
/// per-series scalar AR(1) updates on the diagonal idiosyncratic block.
fn update_dynamics(
    e_curr: &Array2<f64>,
    e_prev: &Array2<f64>,
    e_cross: &Array2<f64>,
    model: &StateSpace,
    n: usize,
) -> Result<(Array2<f64>, Array2<f64>), EmError> {
    let k = model.state_dim();
    let r = model.n_factors;
    let scale = n as f64;

    let gram = symmetrize(&e_prev.slice(s![..r, ..r]).to_owned());
    let cross = e_cross.slice(s![..r, ..r]).to_owned();
    let factor_transition = solve_spd(&gram, &cross.t().to_owned())
        .map_err(|e| EmError::DegenerateEstimate(format!("factor VAR gram matrix: {e}")))?
        .t()
        .to_owned();
    let mut factor_noise = (&e_curr.slice(s![..r, ..r]) - &factor_transition.dot(&cross.t()))
        / scale;
    symmetrize_inplace(&mut factor_noise);
    if !is_positive_semidefinite(&factor_noise, PSD_TOLERANCE) {
        return Err(EmError::DegenerateEstimate(
            "factor innovation covariance is not PSD".into(),
        ));
    }

    let mut transition = Array2::<f64>::zeros((k, k));
    transition
        .slice_mut(s![..r, ..r])
        .assign(&factor_transition);
    let mut state_noise = Array2::<f64>::zeros((k, k));
    state_noise.slice_mut(s![..r, ..r]).assign(&factor_noise);

    if model.error_model == ErrorModel::AutoCorrelated {
        for d in r..k {
            let den = e_prev[[d, d]];
            if den <= 0.0 {
                return Err(EmError::DegenerateEstimate(format!(
                    "idiosyncratic state {d} has zero lagged second moment"
                )));
            }
            let phi = e_cross[[d, d]] / den;
            let var = (e_curr[[d, d]] - phi * e_cross[[d, d]]) / scale;
            if var < -DEGENERACY_TOLERANCE {
                return Err(EmError::DegenerateEstimate(format!(
                    "negative idiosyncratic innovation variance at state {d}"
                )));
            }
            transition[[d, d]] = phi;
            state_noise[[d, d]] = var.max(MIN_STATE_VARIANCE);
        }
    }

    Ok((transition, state_noise))
}

/// Missing-aware loadings update. Each observed series is regressed on the
/// smoothed factors (accounting for factor uncertainty, and for the
/// smoothed idiosyncratic estimates under autocorrelated errors); rows with
/// positive penalties go through soft-threshold coordinate descent instead
/// of the closed-form solve. Rows are independent and run in parallel.
fn update_loadings(
    panel: ArrayView2<'_, f64>,
    smoothed: &SmoothedMoments,
    model: &StateSpace,
    penalties: Option<&Array2<f64>>,
) -> Result<Array2<f64>, EmError> {
    let (n, p) = panel.dim();
    let r = model.n_factors;

    let rows: Vec<Array1<f64>> = (0..p)
        .into_par_iter()
        .map(|i| -> Result<Array1<f64>, EmError> {
            let mut gram = Array2::<f64>::zeros((r, r));
            let mut target = Array1::<f64>::zeros(r);
            let mut seen = 0usize;
            for t in 0..n {
                if panel[[t, i]].is_nan() {
                    continue;
                }
                seen += 1;
                let factors_t = smoothed.means.row(t).slice_move(s![..r]);
                gram += &smoothed.covs[t].slice(s![..r, ..r]);
                add_outer(&mut gram, factors_t.view(), factors_t.view());

                let mut y = panel[[t, i]];
                if model.error_model == ErrorModel::AutoCorrelated {
                    let d = r + i;
                    y -= smoothed.means[[t, d]];
                    target -= &smoothed.covs[t].slice(s![d, ..r]);
                }
                target.scaled_add(y, &factors_t);
            }
            if seen == 0 {
                // No information this pass; keep the current row.
                return Ok(model.factor_loadings().row(i).to_owned());
            }
            symmetrize_inplace(&mut gram);

            let penalty_row = penalties.map(|m| m.row(i));
            let penalized = penalty_row.is_some_and(|row| row.iter().any(|&a| a > 0.0));
            if penalized {
                let warm = model.factor_loadings().row(i).to_owned();
                Ok(sparse::coordinate_descent(
                    &gram,
                    &target,
                    warm,
                    penalty_row.unwrap(),
                ))
            } else {
                solve_spd(&gram, &to_column(&target))
                    .map(|x| x.column(0).to_owned())
                    .map_err(|e| {
                        EmError::DegenerateEstimate(format!(
                            "loadings row {i} is unidentified: {e}"
                        ))
                    })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut loadings = model.loadings.clone();
    for (i, row) in rows.iter().enumerate() {
        loadings.slice_mut(s![i, ..r]).assign(row);
    }
    Ok(loadings)
}

/// Observation-noise update.
///
/// Under autocorrelated errors Ση is the fixed diagonal floor and passes
/// through unchanged. Otherwise the full matrix is rebuilt from residual
/// second moments with the observed-mask recursion: observed pairs
/// contribute residual products plus the loadings-weighted factor
/// uncertainty, missing pairs carry the previous estimate forward. With
/// `diagonal_only` set the off-diagonal entries are dropped, which is the
/// exact update when Ση is constrained to be diagonal.
fn update_obs_noise(
    panel: ArrayView2<'_, f64>,
    smoothed: &SmoothedMoments,
    model: &StateSpace,
    loadings: &Array2<f64>,
    diagonal_only: bool,
) -> Result<Array2<f64>, EmError> {
    if model.error_model == ErrorModel::AutoCorrelated {
        return Ok(model.obs_noise.clone());
    }

    let (n, p) = panel.dim();
    let r = model.n_factors;
    let factor_block = loadings.slice(s![.., ..r]);

    let mut sum = Array2::<f64>::zeros((p, p));
    let mut residual = Array1::<f64>::zeros(p);
    for t in 0..n {
        let factors_t = smoothed.means.row(t).slice_move(s![..r]);
        let factor_cov = smoothed.covs[t].slice(s![..r, ..r]);
        let spread = factor_block.dot(&factor_cov).dot(&factor_block.t());

        for i in 0..p {
            residual[i] = if panel[[t, i]].is_nan() {
                f64::NAN
            } else {
                panel[[t, i]] - factor_block.row(i).dot(&factors_t)
            };
        }
        for i in 0..p {
            for j in 0..p {
                let observed = !residual[i].is_nan() && !residual[j].is_nan();
                sum[[i, j]] += if observed {
                    residual[i] * residual[j] + spread[[i, j]]
                } else if residual[i].is_nan() && residual[j].is_nan() {
                    model.obs_noise[[i, j]]
                } else {
                    0.0
                };
            }
        }
    }

    let mut obs_noise = sum / n as f64;
    symmetrize_inplace(&mut obs_noise);
    if diagonal_only {
        for i in 0..p {
            for j in 0..p {
                if i != j {
                    obs_noise[[i, j]] = 0.0;
                }
            }
        }
    }
    for i in 0..p {
        obs_noise[[i, i]] = obs_noise[[i, i]].max(OBS_NOISE_FLOOR);
    }
    if !is_positive_semidefinite(&obs_noise, DEGENERACY_TOLERANCE) {
        return Err(EmError::DegenerateEstimate(
            "observation-noise covariance is not PSD".into(),
        ));
    }
    Ok(obs_noise)
}

fn add_outer(acc: &mut Array2<f64>, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) {
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            acc[[i, j]] += ai * bj;
        }
    }
}

fn to_column(v: &Array1<f64>) -> Array2<f64> {
    let n = v.len();
    let mut col = Array2::<f64>::zeros((n, 1));
    col.column_mut(0).assign(v);
    col
}
