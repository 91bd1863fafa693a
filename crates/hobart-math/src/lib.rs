//! Dense linear-algebra kernels for the Hobart dynamic factor model.
//!
//! Everything here operates on plain `ndarray` matrices without a LAPACK
//! backend: symmetric eigendecomposition via cyclic Jacobi sweeps, Cholesky
//! factorization for SPD solves and log-determinants, and a fixed-point
//! solver for the discrete Lyapunov equation used to seed the filter's
//! initial state covariance.

#![deny(unsafe_code)]

pub mod cholesky;
pub mod eigen;
pub mod lyapunov;

pub use cholesky::CholeskyFactor;
pub use eigen::{EigenPairs, eigh};
pub use lyapunov::stationary_covariance;

use ndarray::Array2;
use thiserror::Error;

/// Errors raised by the dense kernels.
#[derive(Debug, Error)]
pub enum MathError {
    /// Input matrix is not square or shapes are inconsistent.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Cholesky factorization hit a non-positive pivot.
    #[error("matrix is not positive definite (pivot {pivot} at row {row})")]
    NotPositiveDefinite {
        /// Row at which the factorization failed.
        row: usize,
        /// Offending pivot value.
        pivot: f64,
    },

    /// An iterative solver failed to converge within its cap.
    #[error("{0} did not converge")]
    NoConvergence(&'static str),
}

/// Return the symmetric part `0.5 * (m + m^T)` of a square matrix.
///
/// The filter and the M-step apply this after every covariance update to
/// keep floating-point drift from accumulating into asymmetry.
pub fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
    0.5 * (m + &m.t())
}

/// Symmetrize a square matrix in place.
pub fn symmetrize_inplace(m: &mut Array2<f64>) {
    let n = m.nrows();
    debug_assert_eq!(n, m.ncols());
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = avg;
            m[[j, i]] = avg;
        }
    }
}

/// Check whether a symmetric matrix is positive semi-definite.
///
/// Eigenvalues are allowed to dip to `-tolerance` to absorb round-off.
pub fn is_positive_semidefinite(m: &Array2<f64>, tolerance: f64) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }
    match eigh(m) {
        Ok(pairs) => pairs.values.iter().all(|&v| v >= -tolerance),
        Err(_) => false,
    }
}

/// Solve `a * x = b` for SPD `a` via Cholesky factorization.
pub fn solve_spd(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, MathError> {
    let factor = CholeskyFactor::decompose(a)?;
    factor.solve_mat(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_symmetrize_removes_drift() {
        let m = array![[1.0, 2.0 + 1e-12], [2.0, 3.0]];
        let s = symmetrize(&m);
        assert_abs_diff_eq!(s[[0, 1]], s[[1, 0]], epsilon = 0.0);
    }

    #[test]
    fn test_symmetrize_inplace_matches() {
        let m = array![[1.0, 2.5], [1.5, 3.0]];
        let mut inplace = m.clone();
        symmetrize_inplace(&mut inplace);
        let out = symmetrize(&m);
        assert_abs_diff_eq!(inplace[[0, 1]], out[[0, 1]], epsilon = 1e-15);
        assert_abs_diff_eq!(inplace[[1, 0]], out[[1, 0]], epsilon = 1e-15);
    }

    #[test]
    fn test_psd_check() {
        let good = array![[2.0, 0.5], [0.5, 1.0]];
        let bad = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(is_positive_semidefinite(&good, 1e-10));
        assert!(!is_positive_semidefinite(&bad, 1e-10));
    }

    #[test]
    fn test_solve_spd_identity() {
        let a = Array2::<f64>::eye(3);
        let b = array![[1.0], [2.0], [3.0]];
        let x = solve_spd(&a, &b).unwrap();
        assert_abs_diff_eq!(x[[1, 0]], 2.0, epsilon = 1e-12);
    }
}
