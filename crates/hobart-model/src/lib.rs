//! Core estimation machinery for the Hobart sparse dynamic factor model.
//!
//! A small number of latent factors follow a VAR(1) and drive a panel of
//! observed series through a loadings matrix; idiosyncratic noise is either
//! independent or itself AR(1) (in which case it is folded into the state).
//! This crate provides:
//!
//! - [`state_space`]: the model parameter set Θ and its block structure,
//! - [`initialize`]: principal-component seeding of Θ,
//! - [`kalman`]: filter/smoother engine in two interchangeable formulations,
//! - [`em`]: the EM loop with closed-form and sparse (L1) M-steps,
//! - [`path`]: warm-started regularization-path search with BIC selection.
//!
//! Missing observations are marked with `f64::NAN` throughout.

#![deny(unsafe_code)]

pub mod em;
pub mod initialize;
pub mod kalman;
pub mod path;
pub mod state_space;

pub use em::{EmConfig, EmError, EmRun};
pub use initialize::{InitError, Initialization, initialize};
pub use kalman::{
    FilterError, FilterMethod, FilterPass, JointFilter, SmoothedMoments, UnivariateFilter,
    filter_smooth,
};
pub use path::{PathConfig, PathError, PathResult, PathStep, search_path};
pub use state_space::{ErrorModel, ModelError, StateSpace};
