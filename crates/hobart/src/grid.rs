//! Regularization-strength grids.

/// Logarithmically-spaced grid of `count` ascending values from `min` to
/// `max` inclusive. A single-point grid collapses to `min`.
pub fn log_space(min: f64, max: f64, count: usize) -> Vec<f64> {
    debug_assert!(min > 0.0 && max >= min);
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![min];
    }
    let lo = min.log10();
    let hi = max.log10();
    let step = (hi - lo) / (count - 1) as f64;
    (0..count).map(|i| 10f64.powf(lo + step * i as f64)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_endpoints_and_order() {
        let grid = log_space(0.01, 10.0, 7);
        assert_eq!(grid.len(), 7);
        assert_abs_diff_eq!(grid[0], 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[6], 10.0, epsilon = 1e-9);
        assert!(grid.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_log_spacing_is_even() {
        let grid = log_space(0.1, 1000.0, 5);
        for w in grid.windows(2) {
            assert_abs_diff_eq!(w[1] / w[0], 10.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degenerate_counts() {
        assert!(log_space(0.1, 1.0, 0).is_empty());
        assert_eq!(log_space(0.1, 1.0, 1), vec![0.1]);
    }
}
