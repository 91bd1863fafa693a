//! L1-penalized coordinate descent for a single loadings row.
//!
//! Minimizes 0.5 λᵀ G λ − cᵀ λ + Σⱼ αⱼ |λⱼ| for one series, where G and c
//! are the smoothed-factor second moments accumulated over that series'
//! observed time steps. Each coordinate has the closed-form soft-threshold
//! update; coordinates cycle in place until the largest change in a full
//! cycle falls below tolerance or the cycle cap is reached.

use ndarray::{Array1, Array2, ArrayView1};

const MAX_CYCLES: usize = 1000;
const TOLERANCE: f64 = 1e-8;

/// Soft-thresholding operator: the exact minimizer of
/// 0.5 (x − z)² + α |x| in x.
#[inline]
pub(crate) fn soft_threshold(z: f64, alpha: f64) -> f64 {
    if z > alpha {
        z - alpha
    } else if z < -alpha {
        z + alpha
    } else {
        0.0
    }
}

/// Cyclic coordinate descent on one loadings row, warm-started from the
/// current estimate. Coordinates with a non-positive curvature (degenerate
/// factor second moment) are zeroed.
pub(crate) fn coordinate_descent(
    gram: &Array2<f64>,
    target: &Array1<f64>,
    warm: Array1<f64>,
    penalties: ArrayView1<'_, f64>,
) -> Array1<f64> {
    let r = target.len();
    let mut row = warm;

    for _ in 0..MAX_CYCLES {
        let mut max_delta = 0.0_f64;
        for j in 0..r {
            let curvature = gram[[j, j]];
            let old = row[j];
            if curvature <= 0.0 {
                row[j] = 0.0;
            } else {
                // Partial residual excludes coordinate j's own contribution.
                let mut partial = target[j];
                for l in 0..r {
                    if l != j {
                        partial -= gram[[j, l]] * row[l];
                    }
                }
                row[j] = soft_threshold(partial, penalties[j]) / curvature;
            }
            max_delta = max_delta.max((row[j] - old).abs());
        }
        if max_delta < TOLERANCE {
            break;
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rstest::rstest;

    #[rstest]
    #[case(2.0, 0.5, 1.5)]
    #[case(-2.0, 0.5, -1.5)]
    #[case(0.3, 0.5, 0.0)]
    #[case(-0.3, 0.5, 0.0)]
    fn test_soft_threshold(#[case] z: f64, #[case] alpha: f64, #[case] expected: f64) {
        assert_abs_diff_eq!(soft_threshold(z, alpha), expected, epsilon = 0.0);
    }

    #[test]
    fn test_unpenalized_matches_least_squares() {
        // G λ = c with no penalty is the plain normal-equation solution.
        let gram = array![[4.0, 1.0], [1.0, 3.0]];
        let target = array![1.0, 2.0];
        let zero = Array1::zeros(2);
        let row = coordinate_descent(&gram, &target, Array1::zeros(2), zero.view());

        let exact = hobart_math::solve_spd(&gram, &{
            let mut col = ndarray::Array2::zeros((2, 1));
            col.column_mut(0).assign(&target);
            col
        })
        .unwrap();
        assert_abs_diff_eq!(row[0], exact[[0, 0]], epsilon = 1e-7);
        assert_abs_diff_eq!(row[1], exact[[1, 0]], epsilon = 1e-7);
    }

    #[test]
    fn test_large_penalty_zeroes_row() {
        let gram = array![[2.0, 0.0], [0.0, 2.0]];
        let target = array![1.0, -1.0];
        let penalties = array![10.0, 10.0];
        let row = coordinate_descent(&gram, &target, array![0.5, -0.5], penalties.view());
        assert_abs_diff_eq!(row[0], 0.0, epsilon = 0.0);
        assert_abs_diff_eq!(row[1], 0.0, epsilon = 0.0);
    }

    #[test]
    fn test_penalty_shrinks_toward_zero() {
        let gram = array![[2.0, 0.0], [0.0, 2.0]];
        let target = array![2.0, 2.0];
        let none = Array1::zeros(2);
        let free = coordinate_descent(&gram, &target, Array1::zeros(2), none.view());
        let penalties = array![1.0, 1.0];
        let shrunk = coordinate_descent(&gram, &target, Array1::zeros(2), penalties.view());
        assert!(shrunk[0] < free[0]);
        assert!(shrunk[0] > 0.0);
        // Orthonormal-design shrinkage is exactly the threshold amount.
        assert_abs_diff_eq!(shrunk[0], (2.0 - 1.0) / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_curvature_zeroes_coordinate() {
        let gram = array![[0.0, 0.0], [0.0, 2.0]];
        let target = array![1.0, 1.0];
        let zero = Array1::zeros(2);
        let row = coordinate_descent(&gram, &target, array![5.0, 0.0], zero.view());
        assert_abs_diff_eq!(row[0], 0.0, epsilon = 0.0);
    }
}
