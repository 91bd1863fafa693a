#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/hobart/issues/")]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod fit;
pub mod grid;
pub mod standardize;

// Re-export the estimation core for callers that need direct access.
pub use hobart_math as math;
pub use hobart_model as model;

pub use config::{AlphaGrid, ConfigError, DfmConfig, FitMethod};
pub use fit::{DfmError, DfmFit, PathSummary, fit};
pub use grid::log_space;
pub use standardize::{StandardizeError, Standardizer};

// Common core types, re-exported at the top level.
pub use hobart_model::{ErrorModel, FilterMethod, SmoothedMoments, StateSpace};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
