//! Discrete Lyapunov equation solver.
//!
//! For a stable VAR(1) transition `A` with innovation covariance `Q`, the
//! stationary state covariance `P` satisfies `P = A P A^T + Q`. The
//! fixed-point iteration below converges geometrically when the spectral
//! radius of `A` is below one; otherwise it diverges and the caller falls
//! back to a diffuse prior.

use crate::{MathError, symmetrize};
use ndarray::Array2;

const MAX_ITER: usize = 500;
const TOL: f64 = 1e-10;

/// Solve `P = A P A^T + Q` by fixed-point iteration.
///
/// Fails with [`MathError::NoConvergence`] if the iterates diverge or the
/// cap is reached, which in practice means the fitted transition is not
/// (numerically) stationary.
pub fn stationary_covariance(a: &Array2<f64>, q: &Array2<f64>) -> Result<Array2<f64>, MathError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(MathError::DimensionMismatch {
            expected: n,
            actual: a.ncols(),
        });
    }
    if q.nrows() != n || q.ncols() != n {
        return Err(MathError::DimensionMismatch {
            expected: n,
            actual: q.nrows(),
        });
    }

    let mut p = q.clone();
    for _ in 0..MAX_ITER {
        let next = symmetrize(&(a.dot(&p).dot(&a.t()) + q));
        let delta = (&next - &p).iter().map(|&x| x.abs()).fold(0.0, f64::max);
        let scale = next.iter().map(|&x| x.abs()).fold(1.0, f64::max);
        if !delta.is_finite() || scale > 1e12 {
            return Err(MathError::NoConvergence("lyapunov fixed point"));
        }
        p = next;
        if delta <= TOL * scale {
            return Ok(p);
        }
    }
    Err(MathError::NoConvergence("lyapunov fixed point"))
}
