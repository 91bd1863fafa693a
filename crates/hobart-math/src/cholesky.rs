//! Cholesky factorization for symmetric positive-definite matrices.
//!
//! The factor `L` (lower triangular, `A = L L^T`) backs the filter's
//! innovation-covariance solves, the M-step's weighted least squares, and
//! the Gaussian log-likelihood's log-determinant term. A non-positive pivot
//! is reported as an error; callers decide whether that means a singular
//! innovation covariance or a degenerate parameter estimate.

use crate::MathError;
use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor of an SPD matrix.
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    l: Array2<f64>,
}

impl CholeskyFactor {
    /// Factor a symmetric positive-definite matrix.
    ///
    /// Only the lower triangle of `a` is read. Fails with
    /// [`MathError::NotPositiveDefinite`] if any pivot is non-positive.
    pub fn decompose(a: &Array2<f64>) -> Result<Self, MathError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(MathError::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }

        let mut l = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let mut sum = a[[i, j]];
                for k in 0..j {
                    sum -= l[[i, k]] * l[[j, k]];
                }
                if i == j {
                    if sum <= 0.0 || !sum.is_finite() {
                        return Err(MathError::NotPositiveDefinite { row: i, pivot: sum });
                    }
                    l[[i, i]] = sum.sqrt();
                } else {
                    l[[i, j]] = sum / l[[j, j]];
                }
            }
        }
        Ok(Self { l })
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Log-determinant of the original matrix: `2 * sum(ln L_ii)`.
    pub fn log_det(&self) -> f64 {
        (0..self.dim()).map(|i| self.l[[i, i]].ln()).sum::<f64>() * 2.0
    }

    /// Solve `A x = b` for a single right-hand side.
    pub fn solve_vec(&self, b: &Array1<f64>) -> Result<Array1<f64>, MathError> {
        let n = self.dim();
        if b.len() != n {
            return Err(MathError::DimensionMismatch {
                expected: n,
                actual: b.len(),
            });
        }

        // Forward substitution: L y = b.
        let mut y = b.clone();
        for i in 0..n {
            for k in 0..i {
                let l_ik = self.l[[i, k]];
                y[i] -= l_ik * y[k];
            }
            y[i] /= self.l[[i, i]];
        }
        // Back substitution: L^T x = y.
        for i in (0..n).rev() {
            for k in (i + 1)..n {
                let l_ki = self.l[[k, i]];
                y[i] -= l_ki * y[k];
            }
            y[i] /= self.l[[i, i]];
        }
        Ok(y)
    }

    /// Solve `A X = B` column by column.
    pub fn solve_mat(&self, b: &Array2<f64>) -> Result<Array2<f64>, MathError> {
        let n = self.dim();
        if b.nrows() != n {
            return Err(MathError::DimensionMismatch {
                expected: n,
                actual: b.nrows(),
            });
        }
        let mut x = Array2::<f64>::zeros(b.raw_dim());
        for j in 0..b.ncols() {
            let col = self.solve_vec(&b.column(j).to_owned())?;
            x.column_mut(j).assign(&col);
        }
        Ok(x)
    }

    /// Inverse of the original matrix.
    pub fn inverse(&self) -> Result<Array2<f64>, MathError> {
        self.solve_mat(&Array2::<f64>::eye(self.dim()))
    }
}
