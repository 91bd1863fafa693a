//! Symmetric eigendecomposition via cyclic Jacobi sweeps.
//!
//! A full sweep rotates away every off-diagonal pair (p, q) in row order;
//! sweeps repeat until the off-diagonal mass is below tolerance. Stable and
//! simple, and fast enough for the matrix sizes a factor model produces
//! (state dimension and panel cross-sections in the tens to low hundreds).

use crate::MathError;
use ndarray::{Array1, Array2};

/// Maximum number of full Jacobi sweeps before giving up.
const MAX_SWEEPS: usize = 64;

/// Convergence threshold on the off-diagonal Frobenius norm, relative to
/// the total Frobenius norm of the input.
const OFF_DIAG_TOL: f64 = 1e-14;

/// Eigenvalues (descending) and matching eigenvector columns.
#[derive(Debug, Clone)]
pub struct EigenPairs {
    /// Eigenvalues sorted in descending order.
    pub values: Array1<f64>,
    /// Eigenvectors; column `j` corresponds to `values[j]`.
    pub vectors: Array2<f64>,
}

impl EigenPairs {
    /// Keep only the leading `r` eigenpairs.
    pub fn truncate(&self, r: usize) -> Self {
        Self {
            values: self.values.slice(ndarray::s![..r]).to_owned(),
            vectors: self.vectors.slice(ndarray::s![.., ..r]).to_owned(),
        }
    }
}

/// Eigendecomposition of a symmetric matrix.
///
/// The input is assumed symmetric; only the upper triangle drives the
/// rotations. Returns eigenvalues in descending order with eigenvector
/// columns permuted to match.
pub fn eigh(matrix: &Array2<f64>) -> Result<EigenPairs, MathError> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(MathError::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let total_norm = frobenius(&a).max(f64::MIN_POSITIVE);

    let mut converged = n < 2;
    for _sweep in 0..MAX_SWEEPS {
        if converged {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                rotate_pair(&mut a, &mut v, p, q);
            }
        }
        converged = off_diagonal_norm(&a) <= OFF_DIAG_TOL * total_norm;
    }
    if !converged {
        return Err(MathError::NoConvergence("jacobi eigendecomposition"));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[[j, j]]
            .partial_cmp(&a[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let values = Array1::from_iter(order.iter().map(|&i| a[[i, i]]));
    let mut vectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        vectors.column_mut(dst).assign(&v.column(src));
    }

    Ok(EigenPairs { values, vectors })
}

/// Annihilate `a[[p, q]]` with one Givens rotation, updating `v` alongside.
fn rotate_pair(a: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize) {
    let apq = a[[p, q]];
    if apq.abs() < 1e-300 {
        return;
    }
    let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
    let t = if theta >= 0.0 {
        1.0 / (theta + (1.0 + theta * theta).sqrt())
    } else {
        1.0 / (theta - (1.0 + theta * theta).sqrt())
    };
    let c = 1.0 / (1.0 + t * t).sqrt();
    let s = t * c;

    let n = a.nrows();
    let app = a[[p, p]];
    let aqq = a[[q, q]];
    a[[p, p]] = app - t * apq;
    a[[q, q]] = aqq + t * apq;
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    for i in 0..n {
        if i == p || i == q {
            continue;
        }
        let aip = a[[i, p]];
        let aiq = a[[i, q]];
        a[[i, p]] = c * aip - s * aiq;
        a[[p, i]] = a[[i, p]];
        a[[i, q]] = s * aip + c * aiq;
        a[[q, i]] = a[[i, q]];
    }
    for i in 0..n {
        let vip = v[[i, p]];
        let viq = v[[i, q]];
        v[[i, p]] = c * vip - s * viq;
        v[[i, q]] = s * vip + c * viq;
    }
}

fn frobenius(m: &Array2<f64>) -> f64 {
    m.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

fn off_diagonal_norm(m: &Array2<f64>) -> f64 {
    let n = m.nrows();
    let mut sum = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += m[[i, j]] * m[[i, j]];
            }
        }
    }
    sum.sqrt()
}
